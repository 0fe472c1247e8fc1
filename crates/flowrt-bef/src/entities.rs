//! Pass 1: entity collection.
//!
//! A single pre-order walk over the module gathers every string, type,
//! attribute, kernel name, function, location, and debug name the file will
//! need, numbering each pool in first-encounter order. The walk also
//! enforces IR well-formedness; any violation aborts compilation.

use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use flowrt_ir::{
    Attribute, Block, Handle, Module, Operation, Region, Type, Value, COMPILED_MODULE_OP,
    COST_ATTR, FUNC_NAME_ATTR, FUNC_OP, NATIVE_ATTR, NATIVE_INPUTS_ATTR, NATIVE_RESULTS_ATTR,
    NON_STRICT_ATTR, RETURN_OP, SYNC_ATTR,
};

use crate::encoding::FunctionKind;
use crate::CompileError;

/// Dense pre-order index of an operation within the module walk. Both
/// passes assign identical ids, which is what keys locations and debug
/// info across passes.
pub(crate) type OpId = u32;

/// The compilable body of a function: its block plus the walk ids the
/// emitter needs to line kernels up with pass-1 entities.
#[derive(Debug)]
pub(crate) struct RegionBody<'a> {
    /// The function's single block.
    pub block: &'a Block,
    /// Walk id of the enclosing operation (its location labels the function).
    pub parent_op_id: OpId,
    /// Walk id of each operation in `block.ops`, in order.
    pub op_ids: Vec<OpId>,
    /// For each operation in `block.ops`, the function ids of its nested
    /// regions, in order.
    pub region_funcs: Vec<Vec<u32>>,
}

/// One entry of the function table.
#[derive(Debug)]
pub(crate) struct FunctionEntry<'a> {
    /// Symbol name; empty for anonymous region functions.
    pub name: String,
    /// How the function executes.
    pub kind: FunctionKind,
    /// Input type indices into the type pool.
    pub inputs: Vec<u32>,
    /// Result type indices into the type pool.
    pub results: Vec<u32>,
    /// The body; `None` for native functions.
    pub body: Option<RegionBody<'a>>,
}

/// Everything pass 1 collects.
#[derive(Debug)]
pub(crate) struct EntityTable<'a> {
    /// String pool; sorted so offsets are deterministic.
    pub strings: BTreeSet<String>,
    /// Type pool (textual forms) in first-encounter order.
    pub types: IndexSet<String>,
    /// Attribute pool in first-encounter order, structurally uniqued.
    pub attributes: IndexSet<Attribute>,
    /// Kernel name pool; the index is the opcode.
    pub kernels: IndexSet<String>,
    /// Function table in walk order.
    pub functions: Vec<FunctionEntry<'a>>,
    /// Location file names in first-encounter order.
    pub location_filenames: IndexSet<String>,
    /// Per-op `(filename-index, line, col)` in walk order.
    pub location_positions: IndexMap<OpId, (u32, u32, u32)>,
    /// Per-op debug names in walk order.
    pub debug_info: IndexMap<OpId, String>,

    module: &'a Module,
    named_function_ids: HashMap<String, u32>,
    compiled_symbols: HashSet<String>,
    collect_optional: bool,
}

struct WalkState {
    next_op_id: OpId,
    /// Symbol-reference attributes to validate once the walk completes.
    fn_attrs: Vec<String>,
}

impl WalkState {
    fn next_id(&mut self) -> OpId {
        let id = self.next_op_id;
        self.next_op_id += 1;
        id
    }
}

impl<'a> EntityTable<'a> {
    /// Runs pass 1 over `module`.
    pub fn collect(module: &'a Module, collect_optional: bool) -> Result<Self, CompileError> {
        let mut table = Self {
            strings: BTreeSet::new(),
            types: IndexSet::new(),
            attributes: IndexSet::new(),
            kernels: IndexSet::new(),
            functions: Vec::new(),
            location_filenames: IndexSet::new(),
            location_positions: IndexMap::new(),
            debug_info: IndexMap::new(),
            module,
            named_function_ids: HashMap::new(),
            compiled_symbols: HashSet::new(),
            collect_optional,
        };

        // Symbols defined inside a compiled-module container are emitted as
        // compilation-unit attributes, not BEF functions. Collect them up
        // front so forward references classify correctly.
        for op in &module.ops {
            if op.name == COMPILED_MODULE_OP {
                for inner in op.regions.iter().flat_map(region_ops) {
                    if inner.name == FUNC_OP {
                        if let Some(Attribute::String(name)) = inner.attribute(FUNC_NAME_ATTR) {
                            table.compiled_symbols.insert(name.clone());
                        }
                    }
                }
            }
        }

        let mut state = WalkState {
            next_op_id: 0,
            fn_attrs: Vec::new(),
        };
        for op in &module.ops {
            let op_id = state.next_id();
            table.walk_op(module, op, None, op_id, &mut state)?;
        }

        for name in &state.fn_attrs {
            if !table.named_function_ids.contains_key(name) {
                return Err(CompileError::FunctionNotDefined { name: name.clone() });
            }
        }

        debug!(
            strings = table.strings.len(),
            types = table.types.len(),
            attributes = table.attributes.len(),
            kernels = table.kernels.len(),
            functions = table.functions.len(),
            "entity collection complete"
        );
        Ok(table)
    }

    /// Opcode of a collected kernel name.
    pub fn kernel_id(&self, name: &str) -> u32 {
        self.kernels
            .get_index_of(name)
            .expect("kernel not collected in pass 1") as u32
    }

    /// Pool index of a collected type.
    pub fn type_index(&self, text: &str) -> u32 {
        self.types
            .get_index_of(text)
            .expect("type not collected in pass 1") as u32
    }

    /// Pool index of a collected type, by module handle.
    pub fn type_index_of(&self, ty: Handle<Type>) -> u32 {
        self.type_index(self.module.type_text(ty))
    }

    /// Pool index of a collected attribute.
    pub fn attribute_index(&self, attr: &Attribute) -> u32 {
        self.attributes
            .get_index_of(attr)
            .expect("attribute not collected in pass 1") as u32
    }

    /// Function-table index of a named function.
    pub fn function_named(&self, name: &str) -> Option<u32> {
        self.named_function_ids.get(name).copied()
    }

    /// Whether a symbol resolves into the compiled-module subtree.
    pub fn is_compiled_symbol(&self, name: &str) -> bool {
        self.compiled_symbols.contains(name)
    }

    fn add_string(&mut self, s: &str) {
        if !self.strings.contains(s) {
            self.strings.insert(s.to_string());
        }
    }

    fn add_type(&mut self, text: &str) -> u32 {
        let (index, inserted) = self.types.insert_full(text.to_string());
        if inserted {
            self.add_string(text);
        }
        index as u32
    }

    fn walk_op(
        &mut self,
        module: &'a Module,
        op: &'a Operation,
        defined: Option<&HashSet<Value>>,
        op_id: OpId,
        state: &mut WalkState,
    ) -> Result<Vec<u32>, CompileError> {
        // The compiled-module subtree is carried by compilation-unit
        // attributes; nothing in it is collected.
        if op.name == COMPILED_MODULE_OP {
            return Ok(Vec::new());
        }
        // The terminator is special-cased at emit time; the enclosing body
        // walk has already verified its position.
        if op.name == RETURN_OP {
            return Ok(Vec::new());
        }

        self.add_location(op_id, op);
        if let Some(debug_name) = &op.debug_name {
            self.debug_info.insert(op_id, debug_name.clone());
        }

        for &(_, ty) in &op.results {
            self.add_type(module.type_text(ty));
        }

        let empty = HashSet::new();
        let defined = defined.unwrap_or(&empty);
        for operand in &op.operands {
            if !defined.contains(operand) {
                return Err(CompileError::CrossRegionReference {
                    op: op.name.clone(),
                });
            }
        }

        if op.name == FUNC_OP {
            self.walk_func(module, op, op_id, state)?;
            return Ok(Vec::new());
        }

        self.add_kernel(&op.name);
        self.collect_op_attributes(op, state)?;

        // Any region nested in a kernel becomes an anonymous function.
        let mut region_funcs = Vec::with_capacity(op.regions.len());
        for region in &op.regions {
            let func_id = self.add_function(module, region, String::new(), FunctionKind::Bef, op_id)?;
            region_funcs.push(func_id);
        }
        for (region, &func_id) in op.regions.iter().zip(&region_funcs) {
            self.walk_function_body(module, region, func_id, state)?;
        }
        Ok(region_funcs)
    }

    fn walk_func(
        &mut self,
        module: &'a Module,
        op: &'a Operation,
        op_id: OpId,
        state: &mut WalkState,
    ) -> Result<(), CompileError> {
        let name = match op.attribute(FUNC_NAME_ATTR) {
            Some(Attribute::String(name)) => name.clone(),
            _ => return Err(CompileError::MissingFunctionName),
        };
        if self.named_function_ids.contains_key(&name) {
            return Err(CompileError::FunctionRedefined { name });
        }

        if op.has_marker(NATIVE_ATTR) {
            self.add_native_function(op, name)?;
            return Ok(());
        }

        let region = match op.regions.first() {
            Some(region) if !region.blocks.is_empty() => region,
            _ => return Err(CompileError::ExternalFunction { name }),
        };

        let block = region
            .single_block()
            .ok_or_else(|| CompileError::MultiBlockRegion { name: name.clone() })?;
        let ret = match block.ops.last() {
            Some(op) if op.name == RETURN_OP => op,
            _ => return Err(CompileError::MissingTerminator { name }),
        };

        if op.has_marker(SYNC_ATTR) {
            let args: HashSet<Value> = block.args.iter().map(|&(v, _)| v).collect();
            let mut seen = HashSet::new();
            for (i, operand) in ret.operands.iter().enumerate() {
                if args.contains(operand) {
                    return Err(CompileError::SyncReturnsArgument {
                        func: name.clone(),
                        index: i,
                    });
                }
                if !seen.insert(*operand) {
                    return Err(CompileError::SyncReturnsDuplicate {
                        func: name.clone(),
                        index: i,
                    });
                }
            }
        }

        let kind = if op.has_marker(SYNC_ATTR) {
            FunctionKind::SyncBef
        } else {
            FunctionKind::Bef
        };
        let func_id = self.add_function(module, region, name, kind, op_id)?;
        self.walk_function_body(module, region, func_id, state)
    }

    fn add_native_function(&mut self, op: &Operation, name: String) -> Result<(), CompileError> {
        let type_indices = |table: &mut Self, attr: Option<&Attribute>| -> Vec<u32> {
            match attr {
                Some(Attribute::Array(elems)) => elems
                    .iter()
                    .filter_map(|a| match a {
                        Attribute::Type(text) => Some(table.add_type(text)),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            }
        };
        let inputs = type_indices(self, op.attribute(NATIVE_INPUTS_ATTR));
        let results = type_indices(self, op.attribute(NATIVE_RESULTS_ATTR));

        self.add_string(&name);
        self.named_function_ids
            .insert(name.clone(), self.functions.len() as u32);
        self.functions.push(FunctionEntry {
            name,
            kind: FunctionKind::Native,
            inputs,
            results,
            body: None,
        });
        Ok(())
    }

    /// Registers a function entry for `region` and returns its id. The body
    /// walk happens separately so entries are numbered in pre-order.
    fn add_function(
        &mut self,
        module: &'a Module,
        region: &'a Region,
        name: String,
        kind: FunctionKind,
        parent_op_id: OpId,
    ) -> Result<u32, CompileError> {
        let block = region
            .single_block()
            .ok_or_else(|| CompileError::MultiBlockRegion { name: name.clone() })?;

        let mut inputs = Vec::with_capacity(block.args.len());
        for &(_, ty) in &block.args {
            inputs.push(self.add_type(module.type_text(ty)));
        }

        // The signature's results are the types of the terminator operands.
        let ret = match block.ops.last() {
            Some(op) if op.name == RETURN_OP => op,
            _ => return Err(CompileError::MissingTerminator { name }),
        };
        let mut value_types = HashMap::new();
        for &(v, ty) in &block.args {
            value_types.insert(v, ty);
        }
        for op in &block.ops {
            for &(v, ty) in &op.results {
                value_types.insert(v, ty);
            }
        }
        let mut results = Vec::with_capacity(ret.operands.len());
        for operand in &ret.operands {
            let ty = value_types
                .get(operand)
                .ok_or_else(|| CompileError::CrossRegionReference {
                    op: RETURN_OP.to_string(),
                })?;
            results.push(self.add_type(module.type_text(*ty)));
        }

        self.add_string(&name);
        let func_id = self.functions.len() as u32;
        if !name.is_empty() {
            self.named_function_ids.insert(name.clone(), func_id);
        }
        self.functions.push(FunctionEntry {
            name,
            kind,
            inputs,
            results,
            body: Some(RegionBody {
                block,
                parent_op_id,
                op_ids: Vec::new(),
                region_funcs: Vec::new(),
            }),
        });
        Ok(func_id)
    }

    fn walk_function_body(
        &mut self,
        module: &'a Module,
        region: &'a Region,
        func_id: u32,
        state: &mut WalkState,
    ) -> Result<(), CompileError> {
        let block = region.single_block().expect("checked in add_function");

        let mut defined: HashSet<Value> = block.args.iter().map(|&(v, _)| v).collect();
        for op in &block.ops {
            for &(v, _) in &op.results {
                defined.insert(v);
            }
        }

        let last = block.ops.len().saturating_sub(1);
        let mut op_ids = Vec::with_capacity(block.ops.len());
        let mut region_funcs = Vec::with_capacity(block.ops.len());
        for (i, op) in block.ops.iter().enumerate() {
            let op_id = state.next_id();
            op_ids.push(op_id);
            if op.name == RETURN_OP && i != last {
                return Err(CompileError::ReturnNotAtEnd);
            }
            let funcs = self.walk_op(module, op, Some(&defined), op_id, state)?;
            region_funcs.push(funcs);
        }

        let body = self.functions[func_id as usize]
            .body
            .as_mut()
            .expect("body-less function cannot be walked");
        body.op_ids = op_ids;
        body.region_funcs = region_funcs;
        Ok(())
    }

    fn add_kernel(&mut self, name: &str) {
        let (_, inserted) = self.kernels.insert_full(name.to_string());
        if inserted {
            self.add_string(name);
        }
    }

    fn add_location(&mut self, op_id: OpId, op: &Operation) {
        let (filename_index, _) = self
            .location_filenames
            .insert_full(op.location.filename.clone());
        self.location_positions.insert(
            op_id,
            (filename_index as u32, op.location.line, op.location.col),
        );
    }

    fn collect_op_attributes(
        &mut self,
        op: &Operation,
        state: &mut WalkState,
    ) -> Result<(), CompileError> {
        for (attr_name, attr) in &op.attributes {
            // Scheduling costs never reach the executor.
            if attr_name == COST_ATTR {
                continue;
            }
            // The non-strict marker becomes a kernel header flag.
            if attr_name == NON_STRICT_ATTR {
                continue;
            }

            if !attribute_supported(attr) {
                return Err(CompileError::UnsupportedAttribute {
                    op: op.name.clone(),
                    attr: attr_name.clone(),
                });
            }

            // Symbol refs to BEF functions are emitted as kernel function
            // ids, not pooled attributes; remember them for validation.
            if let Some(symbol) = attr.as_symbol_ref() {
                if !self.is_compiled_symbol(symbol) {
                    state.fn_attrs.push(symbol.to_string());
                    continue;
                }
            }

            if self.collect_optional {
                self.add_string(attr_name);
                self.add_attribute_types(attr);
            }

            if attr.is_symbol_ref_array() {
                // Arrays of function references are emitted as function ids.
                if let Attribute::Array(elems) = attr {
                    for elem in elems {
                        if let Some(symbol) = elem.as_symbol_ref() {
                            state.fn_attrs.push(symbol.to_string());
                        }
                    }
                }
                continue;
            }

            self.attributes.insert(attr.clone());
        }
        Ok(())
    }

    /// Adds the element types referenced by an attribute to the type pool;
    /// only meaningful when optional sections are requested.
    fn add_attribute_types(&mut self, attr: &Attribute) {
        match attr {
            Attribute::Bool(_) => {
                self.add_type("i1");
            }
            Attribute::I8(_) => {
                self.add_type("i8");
            }
            Attribute::I32(_) => {
                self.add_type("i32");
            }
            Attribute::I64(_) => {
                self.add_type("i64");
            }
            Attribute::F32(_) => {
                self.add_type("f32");
            }
            Attribute::F64(_) => {
                self.add_type("f64");
            }
            Attribute::Array(elems) | Attribute::Aggregate(elems) => {
                for elem in elems {
                    self.add_attribute_types(elem);
                }
            }
            _ => {}
        }
    }
}

fn region_ops(region: &Region) -> impl Iterator<Item = &Operation> {
    region.blocks.iter().flat_map(|b| b.ops.iter())
}

/// Whether the attribute pool can encode this attribute.
fn attribute_supported(attr: &Attribute) -> bool {
    match attr {
        Attribute::Dense(d) => d.dtype().is_fixed_width(),
        Attribute::Type(text) => flowrt_ir::DType::parse(text).is_some(),
        Attribute::Array(elems) => {
            elems.iter().all(attribute_supported)
                && elems
                    .windows(2)
                    .all(|w| std::mem::discriminant(&w[0]) == std::mem::discriminant(&w[1]))
        }
        Attribute::Aggregate(elems) => elems.iter().all(attribute_supported),
        _ => true,
    }
}
