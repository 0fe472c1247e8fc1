//! Byte-level checks of compiled BEF images.

use flowrt_bef::encoding::{
    special_flags, SectionId, PSEUDO_KERNEL_CODE, PSEUDO_KERNEL_LOCATION,
};
use flowrt_bef::layout::{
    decode_vbr, find_section, read_function_index, read_nul_string, read_sections, section_body,
};
use flowrt_bef::{compile, BefOptions, FunctionKind};
use flowrt_ir::{
    Attribute, BlockBuilder, DType, DenseAttr, FuncFlags, Module, ModuleBuilder, OpBuilder,
    NON_STRICT_ATTR,
};

fn compiled(module: &Module) -> Vec<u8> {
    compile(module, &BefOptions::default()).expect("compilation failed")
}

struct KernelHeader {
    offset: u64,
    num_operands_before_running: u64,
    stream: u64,
}

struct FunctionBody {
    register_use_counts: Vec<u64>,
    kernels: Vec<KernelHeader>,
    result_regs: Vec<u64>,
    kernel_list_start: usize,
}

/// Decodes a function body header from the Functions section. The result
/// register count is structural knowledge the caller supplies.
fn decode_function_body(
    section: &[u8],
    function_offset: usize,
    num_result_regs: usize,
) -> FunctionBody {
    let mut cursor = function_offset;
    let mut next = |cursor: &mut usize| -> u64 {
        let (value, consumed) = decode_vbr(section, *cursor).expect("vbr");
        *cursor += consumed;
        value
    };

    let _location = next(&mut cursor);
    let num_registers = next(&mut cursor);
    let register_use_counts: Vec<u64> = (0..num_registers).map(|_| next(&mut cursor)).collect();

    let num_kernels = next(&mut cursor);
    let kernels: Vec<KernelHeader> = (0..num_kernels)
        .map(|_| KernelHeader {
            offset: next(&mut cursor),
            num_operands_before_running: next(&mut cursor),
            stream: next(&mut cursor),
        })
        .collect();

    let result_regs: Vec<u64> = (0..num_result_regs).map(|_| next(&mut cursor)).collect();

    let kernel_list_start = (cursor + 3) & !3;
    FunctionBody {
        register_use_counts,
        kernels,
        result_regs,
        kernel_list_start,
    }
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

/// Scenario: one async `main` that just returns, plus an attribute the
/// body never uses.
#[test]
fn minimal_module_image() {
    let mut mb = ModuleBuilder::new();
    let mut bb = BlockBuilder::new();
    bb.ret(&[]);
    mb.add_func("main", FuncFlags::async_fn(), bb.into_region());
    let mut module = mb.finish();
    // Function-definition attributes are ignored by the compiler.
    module.ops[0]
        .attributes
        .push(("unused".into(), Attribute::I32(42)));

    let bytes = compiled(&module);
    assert_eq!(&bytes[..3], &[0xEF, 0xAB, 0xAF]);

    let sections = read_sections(&bytes).unwrap();
    let strings = section_body(&bytes, find_section(&sections, SectionId::Strings).unwrap());
    assert!(strings
        .windows(5)
        .any(|w| w == b"main\0"));

    let index = read_function_index(section_body(
        &bytes,
        find_section(&sections, SectionId::FunctionIndex).unwrap(),
    ))
    .unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].kind, FunctionKind::Bef as u8);
    assert_eq!(
        read_nul_string(strings, index[0].name_offset as usize),
        Some("main")
    );
    assert!(index[0].input_types.is_empty());
    assert!(index[0].result_types.is_empty());

    let functions = section_body(&bytes, find_section(&sections, SectionId::Functions).unwrap());
    let body = decode_function_body(functions, index[0].function_offset as usize, 0);
    assert!(body.register_use_counts.is_empty());
    assert_eq!(body.kernels.len(), 1);
    assert!(body.result_regs.is_empty());

    // The pseudo-entry record: dummy code and location, one result (the
    // trigger), nothing else.
    let record = body.kernel_list_start + body.kernels[0].offset as usize;
    assert_eq!(record % 4, 0);
    assert_eq!(u32_at(functions, record), PSEUDO_KERNEL_CODE);
    assert_eq!(u32_at(functions, record + 4), PSEUDO_KERNEL_LOCATION);
    assert_eq!(u32_at(functions, record + 8), 0); // args
    assert_eq!(u32_at(functions, record + 12), 0); // attrs
    assert_eq!(u32_at(functions, record + 16), 0); // funcs
    assert_eq!(u32_at(functions, record + 20), 1); // results: trigger only
    assert_eq!(u32_at(functions, record + 24), 0); // special flags
}

/// Scenario: a kernel carrying the non-strict marker fires as soon as one
/// operand resolves, and the record advertises the flag.
#[test]
fn non_strict_kernel_record() {
    let mut mb = ModuleBuilder::new();
    let ty = mb.intern_type("!corert.tensorhandle");
    let mut bb = BlockBuilder::new();
    let a = bb.arg(&mut mb, ty);
    let b = bb.arg(&mut mb, ty);
    let sum = bb.emit(
        &mut mb,
        OpBuilder::new("foo.add")
            .operands(&[a, b])
            .attr(NON_STRICT_ATTR, Attribute::Unit),
        &[ty],
    );
    bb.ret(&[sum[0]]);
    mb.add_func("main", FuncFlags::async_fn(), bb.into_region());

    let bytes = compiled(&mb.finish());
    let sections = read_sections(&bytes).unwrap();
    let index = read_function_index(section_body(
        &bytes,
        find_section(&sections, SectionId::FunctionIndex).unwrap(),
    ))
    .unwrap();
    let functions = section_body(&bytes, find_section(&sections, SectionId::Functions).unwrap());
    let body = decode_function_body(functions, index[0].function_offset as usize, 1);

    // Two block args plus one result.
    assert_eq!(body.register_use_counts.len(), 3);
    assert_eq!(body.kernels.len(), 2);
    assert_eq!(body.kernels[1].num_operands_before_running, 1);

    let record = body.kernel_list_start + body.kernels[1].offset as usize;
    assert_eq!(record % 4, 0);
    let num_args = u32_at(functions, record + 8);
    assert_eq!(num_args, 2);
    let flags = u32_at(functions, record + 24);
    assert_eq!(flags & special_flags::NON_STRICT, special_flags::NON_STRICT);
}

/// Scenario: a symbol reference to a function the module never defines.
#[test]
fn missing_function_reference_fails() {
    let mut mb = ModuleBuilder::new();
    let mut bb = BlockBuilder::new();
    bb.emit(
        &mut mb,
        OpBuilder::new("corert.make_composite_op")
            .attr("fn", Attribute::SymbolRef("missing_fn".into())),
        &[],
    );
    bb.ret(&[]);
    mb.add_func("main", FuncFlags::async_fn(), bb.into_region());

    let err = compile(&mb.finish(), &BefOptions::default()).unwrap_err();
    assert!(err.to_string().contains("not defined"));
}

#[test]
fn identical_attributes_intern_to_one_entry() {
    let dense = DenseAttr::new(DType::I32, vec![1], vec![9, 0, 0, 0]).unwrap();
    let mut mb = ModuleBuilder::new();
    let ty = mb.intern_type("!corert.tensorhandle");
    let mut bb = BlockBuilder::new();
    for _ in 0..2 {
        bb.emit(
            &mut mb,
            OpBuilder::new("corert.const_dense_tensor")
                .attr("value", Attribute::Dense(dense.clone())),
            &[ty],
        );
    }
    bb.ret(&[]);
    mb.add_func("main", FuncFlags::async_fn(), bb.into_region());

    let bytes = compiled(&mb.finish());
    let sections = read_sections(&bytes).unwrap();

    // One kernel name for both ops.
    let kernels = section_body(&bytes, find_section(&sections, SectionId::Kernels).unwrap());
    let (kernel_count, _) = decode_vbr(kernels, 0).unwrap();
    assert_eq!(kernel_count, 1);

    // One pooled attribute for both uses.
    let attr_types = section_body(
        &bytes,
        find_section(&sections, SectionId::AttributeTypes).unwrap(),
    );
    let (attr_count, _) = decode_vbr(attr_types, 0).unwrap();
    assert_eq!(attr_count, 1);
}

#[test]
fn identical_types_intern_to_one_entry() {
    let mut mb = ModuleBuilder::new();
    let ty = mb.intern_type("!corert.tensorhandle");
    let same = mb.intern_type("!corert.tensorhandle");
    assert_eq!(ty, same);

    let mut bb = BlockBuilder::new();
    let a = bb.arg(&mut mb, ty);
    let r = bb.emit(&mut mb, OpBuilder::new("foo.id").operand(a), &[same]);
    bb.ret(&[r[0]]);
    mb.add_func("main", FuncFlags::async_fn(), bb.into_region());

    let bytes = compile(
        &mb.finish(),
        &BefOptions {
            disable_optional_sections: true,
        },
    )
    .unwrap();
    let sections = read_sections(&bytes).unwrap();
    let types = section_body(&bytes, find_section(&sections, SectionId::Types).unwrap());
    let (type_count, _) = decode_vbr(types, 0).unwrap();
    assert_eq!(type_count, 1);
}

#[test]
fn compilation_is_byte_for_byte_deterministic() {
    let build = || {
        let mut mb = ModuleBuilder::new();
        let ty = mb.intern_type("i32");
        let th = mb.intern_type("!corert.tensorhandle");
        let mut bb = BlockBuilder::new();
        let a = bb.arg(&mut mb, th);
        let x = bb.emit(
            &mut mb,
            OpBuilder::new("foo.shape")
                .operand(a)
                .attr("rank", Attribute::I32(2))
                .debug_name("shape_of_a"),
            &[ty],
        );
        let y = bb.emit(
            &mut mb,
            OpBuilder::new("foo.mul").operands(&[x[0], x[0]]),
            &[ty],
        );
        bb.ret(&[y[0]]);
        mb.add_func("main", FuncFlags::async_fn(), bb.into_region());
        mb.finish()
    };
    assert_eq!(compiled(&build()), compiled(&build()));
}

#[test]
fn every_kernel_record_is_four_byte_aligned() {
    let mut mb = ModuleBuilder::new();
    let ty = mb.intern_type("!corert.tensorhandle");
    let mut bb = BlockBuilder::new();
    let a = bb.arg(&mut mb, ty);
    let mut cur = a;
    for i in 0..5 {
        let r = bb.emit(
            &mut mb,
            OpBuilder::new(format!("foo.step{i}")).operand(cur),
            &[ty],
        );
        cur = r[0];
    }
    bb.ret(&[cur]);
    mb.add_func("main", FuncFlags::async_fn(), bb.into_region());

    let bytes = compiled(&mb.finish());
    let sections = read_sections(&bytes).unwrap();
    let index = read_function_index(section_body(
        &bytes,
        find_section(&sections, SectionId::FunctionIndex).unwrap(),
    ))
    .unwrap();
    let functions = section_body(&bytes, find_section(&sections, SectionId::Functions).unwrap());
    let body = decode_function_body(functions, index[0].function_offset as usize, 1);
    assert_eq!(body.kernels.len(), 6);
    for kernel in &body.kernels {
        assert_eq!((body.kernel_list_start + kernel.offset as usize) % 4, 0);
    }
    // Linear pipeline: a single stream carries every step.
    let first = body.kernels[1].stream;
    assert!(body.kernels[1..].iter().all(|k| k.stream == first));
}

#[test]
fn native_function_has_no_body_but_full_signature() {
    let mut mb = ModuleBuilder::new();
    let ty = mb.intern_type("!corert.tensorhandle");
    mb.add_func_at(
        "host_helper",
        FuncFlags::native_fn(),
        flowrt_ir::Region::default(),
        flowrt_ir::Location::default(),
        &[ty, ty],
        &[ty],
    );
    let mut bb = BlockBuilder::new();
    bb.ret(&[]);
    mb.add_func("main", FuncFlags::async_fn(), bb.into_region());

    let bytes = compiled(&mb.finish());
    let sections = read_sections(&bytes).unwrap();
    let strings = section_body(&bytes, find_section(&sections, SectionId::Strings).unwrap());
    let index = read_function_index(section_body(
        &bytes,
        find_section(&sections, SectionId::FunctionIndex).unwrap(),
    ))
    .unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index[0].kind, FunctionKind::Native as u8);
    assert_eq!(
        read_nul_string(strings, index[0].name_offset as usize),
        Some("host_helper")
    );
    assert_eq!(index[0].input_types.len(), 2);
    assert_eq!(index[0].result_types.len(), 1);
    // Native bodies are not emitted: both entries point at offset 0.
    assert_eq!(index[0].function_offset, index[1].function_offset);
}

#[test]
fn sync_function_kind_is_recorded() {
    let mut mb = ModuleBuilder::new();
    let ty = mb.intern_type("i32");
    let mut bb = BlockBuilder::new();
    let r = bb.emit(&mut mb, OpBuilder::new("foo.const"), &[ty]);
    bb.ret(&[r[0]]);
    mb.add_func("fast", FuncFlags::sync_fn(), bb.into_region());

    let bytes = compiled(&mb.finish());
    let sections = read_sections(&bytes).unwrap();
    let index = read_function_index(section_body(
        &bytes,
        find_section(&sections, SectionId::FunctionIndex).unwrap(),
    ))
    .unwrap();
    assert_eq!(index[0].kind, FunctionKind::SyncBef as u8);
}
