//! Pass 3: function-body emission.
//!
//! Each function body is emitted as a header (location, register table,
//! kernel offset table, result registers) followed by 4-byte-aligned
//! kernel records. Kernel record layout, all fields `u32`:
//!
//! ```text
//! opcode, location_offset, num_args, num_attrs, num_funcs, num_results,
//! special_flags, args[], attrs[], funcs[], results[],
//! (num_users, users[])*, [debug_info_offset]
//! ```
//!
//! A pseudo-entry kernel sits at index 0; its results are a synthetic
//! trigger register (activating argument-less kernels) plus the block
//! arguments.

use std::collections::HashMap;

use tracing::trace;

use flowrt_analysis::StreamAnalysis;
use flowrt_ir::{Attribute, Operation, Value, COST_ATTR, NON_STRICT_ATTR, RETURN_OP};

use crate::emitter::Emitter;
use crate::encoding::{
    special_flags, KERNEL_ENTRY_ALIGNMENT, PSEUDO_KERNEL_CODE, PSEUDO_KERNEL_LOCATION,
};
use crate::entities::{EntityTable, RegionBody};
use crate::index::EntityIndex;
use crate::CompileError;

pub(crate) struct FunctionEmitter<'a> {
    entities: &'a EntityTable<'a>,
    index: &'a EntityIndex,
    registers: HashMap<Value, u32>,
    /// Kernel number of each block op (pseudo entry is 0).
    kernel_numbers: Vec<Option<u32>>,
    /// Per-value kernel numbers that consume it, one entry per use.
    users: HashMap<Value, Vec<u32>>,
}

impl<'a> FunctionEmitter<'a> {
    pub(crate) fn new(entities: &'a EntityTable<'a>, index: &'a EntityIndex) -> Self {
        Self {
            entities,
            index,
            registers: HashMap::new(),
            kernel_numbers: Vec::new(),
            users: HashMap::new(),
        }
    }

    /// Emits one function body onto `out`.
    pub(crate) fn emit_function(
        &mut self,
        body: &RegionBody<'a>,
        out: &mut Emitter,
        mut attribute_names: Option<&mut Emitter>,
        register_types: Option<&mut Emitter>,
    ) -> Result<(), CompileError> {
        self.reset(body);
        let block = body.block;

        out.emit_vbr(u64::from(self.index.location_offset(body.parent_op_id)));

        self.emit_register_table(body, out, register_types);

        let num_kernels = 1 + self
            .kernel_numbers
            .iter()
            .filter(|n| n.is_some())
            .count() as u64;
        out.emit_vbr(num_kernels);
        if let Some(names) = attribute_names.as_deref_mut() {
            names.emit_vbr(num_kernels);
        }

        let streams = StreamAnalysis::new(block);
        trace!(
            kernels = num_kernels,
            registers = self.registers.len(),
            "emitting function body"
        );

        let mut kernel_list = Emitter::new();

        // The pseudo-entry kernel always runs first, on the root stream,
        // with no operands to wait for.
        out.emit_vbr(kernel_list.len() as u64);
        out.emit_vbr(0);
        out.emit_vbr(u64::from(streams.root_stream().id()));
        self.emit_pseudo_entry_kernel(body, &mut kernel_list);

        let mut return_op: Option<&Operation> = None;
        for (i, op) in block.ops.iter().enumerate() {
            if op.name == RETURN_OP {
                return_op = Some(op);
                continue;
            }

            out.emit_vbr(kernel_list.len() as u64);
            let mut operands_before_running = op.operands.len() as u64;
            if op.has_marker(NON_STRICT_ATTR) {
                // Non-strict kernels fire once any operand resolves; zero
                // stays zero since a kernel with no operands is triggered
                // by the pseudo entry anyway.
                operands_before_running = operands_before_running.min(1);
            }
            out.emit_vbr(operands_before_running);
            out.emit_vbr(u64::from(streams.stream_of(i).id()));

            self.emit_kernel(op, body, i, &mut kernel_list, attribute_names.as_deref_mut())?;
        }

        // Result register list of the function.
        if let Some(ret) = return_op {
            for operand in &ret.operands {
                out.emit_vbr(u64::from(self.register(*operand)));
            }
        }

        out.emit_alignment(KERNEL_ENTRY_ALIGNMENT);
        out.emit_emitter(&kernel_list);
        Ok(())
    }

    fn reset(&mut self, body: &RegionBody<'a>) {
        self.registers.clear();
        self.users.clear();
        self.kernel_numbers.clear();

        let block = body.block;
        let mut next = 1u32;
        for op in &block.ops {
            if op.name == RETURN_OP {
                self.kernel_numbers.push(None);
            } else {
                self.kernel_numbers.push(Some(next));
                next += 1;
            }
        }

        // Use lists exclude the terminator, which never becomes a kernel.
        for (i, op) in block.ops.iter().enumerate() {
            let Some(number) = self.kernel_numbers[i] else {
                continue;
            };
            for operand in &op.operands {
                self.users.entry(*operand).or_default().push(number);
            }
        }
    }

    fn register(&self, value: Value) -> u32 {
        *self
            .registers
            .get(&value)
            .expect("value not assigned a register")
    }

    /// The synthetic trigger register is numbered one past the last real
    /// register.
    fn trigger_register(&self) -> u32 {
        self.registers.len() as u32
    }

    fn emit_register_table(
        &mut self,
        body: &RegionBody<'a>,
        out: &mut Emitter,
        register_types: Option<&mut Emitter>,
    ) {
        let block = body.block;

        // Use counts include every operand occurrence, the terminator's too.
        let mut use_counts: HashMap<Value, u64> = HashMap::new();
        for op in &block.ops {
            for operand in &op.operands {
                *use_counts.entry(*operand).or_default() += 1;
            }
        }

        // Block arguments first, then op results in program order.
        let mut entries: Vec<(Value, u32)> = Vec::new();
        for &(value, ty) in &block.args {
            entries.push((value, self.entities.type_index_of(ty)));
        }
        for op in &block.ops {
            for &(value, ty) in &op.results {
                entries.push((value, self.entities.type_index_of(ty)));
            }
        }

        let mut table = Emitter::new();
        let mut types_table = Emitter::new();
        for (number, &(value, ty_index)) in entries.iter().enumerate() {
            table.emit_vbr(use_counts.get(&value).copied().unwrap_or(0));
            types_table.emit_vbr(u64::from(ty_index));
            self.registers.insert(value, number as u32);
        }

        out.emit_vbr(entries.len() as u64);
        out.emit_emitter(&table);
        if let Some(types_out) = register_types {
            types_out.emit_vbr(entries.len() as u64);
            types_out.emit_emitter(&types_table);
        }
    }

    fn emit_pseudo_entry_kernel(&self, body: &RegionBody<'a>, kernel_list: &mut Emitter) {
        let block = body.block;
        debug_assert_eq!(kernel_list.len() % KERNEL_ENTRY_ALIGNMENT, 0);

        kernel_list.emit_fixed32(PSEUDO_KERNEL_CODE);
        kernel_list.emit_fixed32(PSEUDO_KERNEL_LOCATION);
        kernel_list.emit_fixed32(0); // arguments
        kernel_list.emit_fixed32(0); // attributes
        kernel_list.emit_fixed32(0); // functions
        kernel_list.emit_fixed32(block.args.len() as u32 + 1);
        kernel_list.emit_fixed32(0); // special flags

        // Result registers: the trigger first, then the block arguments.
        kernel_list.emit_fixed32(self.trigger_register());
        for &(value, _) in &block.args {
            kernel_list.emit_fixed32(self.register(value));
        }

        // The trigger's users are the kernels with no operands at all.
        let ready: Vec<u32> = block
            .ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.name != RETURN_OP && op.operands.is_empty())
            .map(|(i, _)| self.kernel_numbers[i].expect("non-return op is numbered"))
            .collect();
        kernel_list.emit_fixed32(ready.len() as u32);
        for user in ready {
            kernel_list.emit_fixed32(user);
        }

        for &(value, _) in &block.args {
            self.emit_result_users(value, kernel_list);
        }
    }

    fn emit_result_users(&self, value: Value, kernel_list: &mut Emitter) {
        match self.users.get(&value) {
            Some(users) => {
                kernel_list.emit_fixed32(users.len() as u32);
                for &user in users {
                    kernel_list.emit_fixed32(user);
                }
            }
            None => kernel_list.emit_fixed32(0),
        }
    }

    fn emit_kernel(
        &self,
        op: &Operation,
        body: &RegionBody<'a>,
        op_index: usize,
        kernel_list: &mut Emitter,
        attribute_names: Option<&mut Emitter>,
    ) -> Result<(), CompileError> {
        kernel_list.emit_alignment(KERNEL_ENTRY_ALIGNMENT);

        // Partition the attributes into pooled attributes, function
        // references, and header flags before the header is written.
        let mut attr_offsets: Vec<u32> = Vec::new();
        let mut function_ids: Vec<u32> = Vec::new();
        // Attribute names only exist in the string pool when the optional
        // sections were collected.
        let collect_names = attribute_names.is_some();
        let mut attr_name_offsets: Vec<u32> = Vec::new();
        let mut flags = 0u32;

        for (attr_name, attr) in &op.attributes {
            if attr_name == COST_ATTR {
                continue;
            }
            if attr_name == NON_STRICT_ATTR {
                flags |= special_flags::NON_STRICT;
                continue;
            }

            if attr.is_symbol_ref_array() {
                if let Attribute::Array(elems) = attr {
                    for elem in elems {
                        let symbol = elem.as_symbol_ref().expect("checked by is_symbol_ref_array");
                        function_ids.push(self.named_function(symbol)?);
                    }
                }
                continue;
            }
            if let Some(symbol) = attr.as_symbol_ref() {
                if !self.entities.is_compiled_symbol(symbol) {
                    function_ids.push(self.named_function(symbol)?);
                    continue;
                }
            }

            if collect_names {
                attr_name_offsets.push(self.index.string_offset(attr_name));
            }
            attr_offsets.push(self.index.attribute_offset(self.entities.attribute_index(attr)));
        }

        // Region functions follow the attribute function references.
        function_ids.extend_from_slice(&body.region_funcs[op_index]);

        let debug_offset = self.index.debug_offset(body.op_ids[op_index]);
        if debug_offset.is_some() {
            flags |= special_flags::HAS_DEBUG_INFO;
        }

        kernel_list.emit_fixed32(self.entities.kernel_id(&op.name));
        kernel_list.emit_fixed32(self.index.location_offset(body.op_ids[op_index]));
        kernel_list.emit_fixed32(op.operands.len() as u32);
        kernel_list.emit_fixed32(attr_offsets.len() as u32);
        kernel_list.emit_fixed32(function_ids.len() as u32);
        kernel_list.emit_fixed32(op.results.len() as u32);
        kernel_list.emit_fixed32(flags);

        for operand in &op.operands {
            kernel_list.emit_fixed32(self.register(*operand));
        }
        for offset in &attr_offsets {
            kernel_list.emit_fixed32(*offset);
        }
        for id in &function_ids {
            kernel_list.emit_fixed32(*id);
        }
        for &(value, _) in &op.results {
            kernel_list.emit_fixed32(self.register(value));
        }
        for &(value, _) in &op.results {
            self.emit_result_users(value, kernel_list);
        }
        if let Some(offset) = debug_offset {
            kernel_list.emit_fixed32(offset);
        }

        if let Some(names) = attribute_names {
            for offset in attr_name_offsets {
                names.emit_vbr(u64::from(offset));
            }
        }
        Ok(())
    }

    fn named_function(&self, symbol: &str) -> Result<u32, CompileError> {
        self.entities
            .function_named(symbol)
            .ok_or_else(|| CompileError::FunctionNotDefined {
                name: symbol.to_string(),
            })
    }
}
