//! Textual dump of modules and operations.
//!
//! The dump is for humans and for compilation-unit attribute payloads; it
//! is deterministic but is not meant to be parsed back.

use std::fmt::Write;

use crate::attr::Attribute;
use crate::module::{Block, Module, Operation};

/// Renders a whole module.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();
    for op in &module.ops {
        write_op(&mut out, module, op, 0);
    }
    out
}

/// Renders a single operation (and its nested regions).
pub fn dump_op(module: &Module, op: &Operation) -> String {
    let mut out = String::new();
    write_op(&mut out, module, op, 0);
    out
}

fn write_op(out: &mut String, module: &Module, op: &Operation, depth: usize) {
    let pad = "  ".repeat(depth);
    out.push_str(&pad);

    if !op.results.is_empty() {
        let names: Vec<String> = op.results.iter().map(|(v, _)| format!("%{}", v.0)).collect();
        let _ = write!(out, "{} = ", names.join(", "));
    }
    let _ = write!(out, "\"{}\"", op.name);

    let operands: Vec<String> = op.operands.iter().map(|v| format!("%{}", v.0)).collect();
    let _ = write!(out, "({})", operands.join(", "));

    if !op.attributes.is_empty() {
        out.push_str(" {");
        for (i, (name, attr)) in op.attributes.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{name} = ");
            write_attr(out, attr);
        }
        out.push('}');
    }

    if !op.results.is_empty() {
        let types: Vec<&str> = op
            .results
            .iter()
            .map(|&(_, ty)| module.type_text(ty))
            .collect();
        let _ = write!(out, " : ({})", types.join(", "));
    }

    if !op.location.filename.is_empty() {
        let _ = write!(
            out,
            " loc(\"{}\":{}:{})",
            op.location.filename, op.location.line, op.location.col
        );
    }
    out.push('\n');

    for region in &op.regions {
        for block in &region.blocks {
            write_block(out, module, block, depth + 1);
        }
    }
}

fn write_block(out: &mut String, module: &Module, block: &Block, depth: usize) {
    let pad = "  ".repeat(depth);
    let args: Vec<String> = block
        .args
        .iter()
        .map(|&(v, ty)| format!("%{}: {}", v.0, module.type_text(ty)))
        .collect();
    let _ = writeln!(out, "{pad}^({}):", args.join(", "));
    for op in &block.ops {
        write_op(out, module, op, depth + 1);
    }
}

fn write_attr(out: &mut String, attr: &Attribute) {
    match attr {
        Attribute::Unit => out.push_str("unit"),
        Attribute::Bool(v) => {
            let _ = write!(out, "{v}");
        }
        Attribute::I8(v) => {
            let _ = write!(out, "{v} : i8");
        }
        Attribute::I32(v) => {
            let _ = write!(out, "{v} : i32");
        }
        Attribute::I64(v) => {
            let _ = write!(out, "{v} : i64");
        }
        Attribute::F32(v) => {
            let _ = write!(out, "{v} : f32");
        }
        Attribute::F64(v) => {
            let _ = write!(out, "{v} : f64");
        }
        Attribute::String(v) => {
            let _ = write!(out, "{v:?}");
        }
        Attribute::Type(v) => {
            let _ = write!(out, "{v}");
        }
        Attribute::Shape(dims) => {
            let rendered: Vec<String> = dims
                .iter()
                .map(|&d| {
                    if d < 0 {
                        "?".to_string()
                    } else {
                        d.to_string()
                    }
                })
                .collect();
            let _ = write!(out, "shape<{}>", rendered.join("x"));
        }
        Attribute::Dense(d) => {
            let _ = write!(
                out,
                "dense<{} x {:?}, {} bytes>",
                d.dtype(),
                d.shape(),
                d.data().len()
            );
        }
        Attribute::Array(elems) => {
            out.push('[');
            for (i, e) in elems.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_attr(out, e);
            }
            out.push(']');
        }
        Attribute::Aggregate(elems) => {
            out.push('(');
            for (i, e) in elems.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_attr(out, e);
            }
            out.push(')');
        }
        Attribute::SymbolRef(name) => {
            let _ = write!(out, "@{name}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BlockBuilder, FuncFlags, ModuleBuilder, OpBuilder};

    #[test]
    fn dump_contains_ops_and_attrs() {
        let mut mb = ModuleBuilder::new();
        let i32_ty = mb.intern_type("i32");
        let mut bb = BlockBuilder::new();
        let rs = bb.emit(
            &mut mb,
            OpBuilder::new("test.const").attr("value", Attribute::I32(42)),
            &[i32_ty],
        );
        bb.ret(&rs);
        mb.add_func("main", FuncFlags::async_fn(), bb.into_region());
        let module = mb.finish();

        let text = dump_module(&module);
        assert!(text.contains("\"flow.func\""));
        assert!(text.contains("\"test.const\""));
        assert!(text.contains("value = 42 : i32"));
        assert!(text.contains("\"flow.return\""));
    }

    #[test]
    fn dump_is_deterministic() {
        let build = || {
            let mut mb = ModuleBuilder::new();
            let ty = mb.intern_type("!corert.tensorhandle");
            let mut bb = BlockBuilder::new();
            let a = bb.arg(&mut mb, ty);
            bb.ret(&[a]);
            mb.add_func("id", FuncFlags::async_fn(), bb.into_region());
            dump_module(&mb.finish())
        };
        assert_eq!(build(), build());
    }
}
