use std::collections::HashSet;

use super::{GraphPass, PassResult};
use crate::ir::{kinds, Graph, NodeId, Symbol};

/// Removes nodes whose outputs can never reach a graph output.
#[derive(Default)]
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    const NAME: &'static str = "dce";
}

impl GraphPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph) -> anyhow::Result<PassResult> {
        let order = graph.node_ids();

        let mut worklist: Vec<NodeId> = graph
            .outputs()
            .iter()
            .filter_map(|&v| graph.producer(v))
            .collect();
        worklist.extend(
            order
                .iter()
                .copied()
                .filter(|&n| is_side_effecting(graph.node(n).kind())),
        );

        let mut live: HashSet<NodeId> = HashSet::new();
        while let Some(node) = worklist.pop() {
            if !live.insert(node) {
                continue;
            }
            for &input in graph.node(node).inputs() {
                if let Some(producer) = graph.producer(input) {
                    worklist.push(producer);
                }
            }
        }

        let mut erased = 0;
        for &node in order.iter().rev() {
            if live.contains(&node) {
                continue;
            }
            graph.destroy(node)?;
            erased += 1;
        }
        tracing::debug!(pass = Self::NAME, erased, "dead code eliminated");

        Ok(PassResult {
            changed: erased > 0,
            erased_nodes: erased,
        })
    }
}

fn is_side_effecting(kind: &Symbol) -> bool {
    *kind == kinds::HOST_OP || *kind == kinds::NATIVE_OP || *kind == kinds::EVAL
}
