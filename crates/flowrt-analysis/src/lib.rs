#![warn(missing_docs)]
//! Stream analysis for flowrt blocks.
//!
//! Assigns every operation of a block to a *stream*: an advisory
//! concurrency lane. Operations sharing a stream id must execute in
//! dataflow order; distinct streams may run in parallel, subject to data
//! dependencies. The executor is free to ignore the assignment entirely.
//!
//! The analysis is a pure function of the block: it scans def/use chains in
//! program order and chains each operation onto the stream of the first
//! producer it is the first consumer of. That keeps linear pipelines on one
//! lane while fan-out points open fresh lanes for the extra branches.

use std::collections::HashMap;

use flowrt_ir::{Block, Value, RETURN_OP};

/// An advisory concurrency lane id.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Raw id value.
    pub fn id(self) -> u32 {
        self.0
    }
}

/// The per-block result of stream analysis.
#[derive(Debug)]
pub struct StreamAnalysis {
    root: StreamId,
    streams: Vec<StreamId>,
}

impl StreamAnalysis {
    /// Analyzes one block. The assignment depends only on the block's
    /// contents; analyzing the same block twice yields identical results.
    pub fn new(block: &Block) -> Self {
        let root = StreamId(0);
        let mut next_stream = 1u32;

        // Producer of each value: None marks a block argument, which the
        // pseudo-entry kernel defines on the root stream.
        let mut producer: HashMap<Value, Option<usize>> = HashMap::new();
        for &(v, _) in &block.args {
            producer.insert(v, None);
        }
        for (index, op) in block.ops.iter().enumerate() {
            for &(v, _) in &op.results {
                producer.insert(v, Some(index));
            }
        }

        // A producer's stream can be inherited by exactly one consumer;
        // later consumers fork off new streams.
        let mut root_claimed = false;
        let mut claimed: Vec<bool> = vec![false; block.ops.len()];
        let mut streams: Vec<StreamId> = Vec::with_capacity(block.ops.len());

        for op in &block.ops {
            if op.name == RETURN_OP {
                // The terminator is handled specially by the emitter and
                // never becomes a kernel; park it on the root stream.
                streams.push(root);
                continue;
            }

            let mut assigned = None;
            for &operand in &op.operands {
                match producer.get(&operand) {
                    Some(&Some(p)) if !claimed[p] => {
                        claimed[p] = true;
                        assigned = Some(streams[p]);
                        break;
                    }
                    Some(&None) if !root_claimed => {
                        root_claimed = true;
                        assigned = Some(root);
                        break;
                    }
                    _ => {}
                }
            }

            let stream = match assigned {
                Some(s) => s,
                None if op.operands.is_empty() => root,
                None => {
                    let s = StreamId(next_stream);
                    next_stream += 1;
                    s
                }
            };
            streams.push(stream);
        }

        Self { root, streams }
    }

    /// The stream the pseudo-entry kernel executes on.
    pub fn root_stream(&self) -> StreamId {
        self.root
    }

    /// The stream of the operation at `op_index` within the analyzed block.
    pub fn stream_of(&self, op_index: usize) -> StreamId {
        self.streams[op_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrt_ir::{BlockBuilder, ModuleBuilder, OpBuilder};

    fn pipeline_block(fanout: bool) -> Block {
        let mut mb = ModuleBuilder::new();
        let ty = mb.intern_type("i32");
        let mut bb = BlockBuilder::new();
        let a = bb.emit(&mut mb, OpBuilder::new("t.source"), &[ty]);
        let b = bb.emit(&mut mb, OpBuilder::new("t.step").operand(a[0]), &[ty]);
        if fanout {
            bb.emit(&mut mb, OpBuilder::new("t.branch").operand(a[0]), &[ty]);
        }
        bb.ret(&[b[0]]);
        let region = bb.into_region();
        region.single_block().unwrap().clone()
    }

    #[test]
    fn linear_chain_shares_a_stream() {
        let block = pipeline_block(false);
        let sa = StreamAnalysis::new(&block);
        assert_eq!(sa.stream_of(0), sa.stream_of(1));
    }

    #[test]
    fn fanout_opens_a_new_stream() {
        let block = pipeline_block(true);
        let sa = StreamAnalysis::new(&block);
        // First consumer inherits, second forks.
        assert_eq!(sa.stream_of(0), sa.stream_of(1));
        assert_ne!(sa.stream_of(1), sa.stream_of(2));
    }

    #[test]
    fn argless_ops_join_the_root_stream() {
        let block = pipeline_block(false);
        let sa = StreamAnalysis::new(&block);
        assert_eq!(sa.stream_of(0), sa.root_stream());
    }

    #[test]
    fn analysis_is_deterministic() {
        let block = pipeline_block(true);
        let a = StreamAnalysis::new(&block);
        let b = StreamAnalysis::new(&block);
        for i in 0..block.ops.len() {
            assert_eq!(a.stream_of(i), b.stream_of(i));
        }
        assert_eq!(a.root_stream(), b.root_stream());
    }

    #[test]
    fn block_arg_consumer_takes_root_once() {
        let mut mb = ModuleBuilder::new();
        let ty = mb.intern_type("i32");
        let mut bb = BlockBuilder::new();
        let arg = bb.arg(&mut mb, ty);
        bb.emit(&mut mb, OpBuilder::new("t.first").operand(arg), &[ty]);
        bb.emit(&mut mb, OpBuilder::new("t.second").operand(arg), &[ty]);
        bb.ret(&[]);
        let region = bb.into_region();
        let block = region.single_block().unwrap().clone();

        let sa = StreamAnalysis::new(&block);
        assert_eq!(sa.stream_of(0), sa.root_stream());
        assert_ne!(sa.stream_of(1), sa.root_stream());
    }
}
