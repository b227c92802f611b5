use super::attributes::AttributeValue;
use super::graph::Graph;
use super::node::{NodeId, ValueId};
use super::symbol::Symbol;
use std::collections::HashSet;
use thiserror::Error;

/// First inconsistency found by [`Graph::lint`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LintError {
    #[error("node list is broken around {kind}: neighbours do not point back")]
    BrokenLink { kind: Symbol },
    #[error("{kind} input {offset} refers to a destroyed or foreign value")]
    DanglingInput { kind: Symbol, offset: usize },
    #[error("{kind} input {offset} uses %{value} before its definition")]
    UseBeforeDefinition {
        kind: Symbol,
        offset: usize,
        value: String,
    },
    #[error("{kind} input {offset} (%{value}) is missing from the value's use-list")]
    MissingUse {
        kind: Symbol,
        offset: usize,
        value: String,
    },
    #[error("%{value} lists a use by {user:?} input {offset} that does not exist")]
    StaleUse {
        value: String,
        user: NodeId,
        offset: usize,
    },
    #[error("%{value} lists the same use more than once")]
    DuplicateUse { value: String },
    #[error("%{value} is not owned by the node that lists it as output {offset}")]
    OutputOwnership { value: String, offset: usize },
    #[error("{kind} was created but never inserted into the graph")]
    UninsertedNode { kind: Symbol },
    #[error("{kind} at stage {stage} follows a node of stage {previous}")]
    StageOrder {
        kind: Symbol,
        stage: usize,
        previous: usize,
    },
    #[error("subgraph attribute '{attribute}' of {kind}: {source}")]
    Subgraph {
        kind: Symbol,
        attribute: String,
        source: Box<LintError>,
    },
}

impl Graph {
    /// Checks use-list duality, def-before-use order, output ownership and
    /// stage order, recursing into subgraph attributes.
    pub fn lint(&self) -> Result<(), LintError> {
        let order = self.lint_links()?;

        let mut scope: HashSet<ValueId> = HashSet::new();
        self.lint_outputs(self.param_node, &mut scope)?;

        let mut last_stage = 0;
        for &node in &order {
            let n = self.node(node);
            if n.stage() < last_stage {
                return Err(LintError::StageOrder {
                    kind: n.kind().clone(),
                    stage: n.stage(),
                    previous: last_stage,
                });
            }
            last_stage = n.stage();
            self.lint_inputs(node, &scope)?;
            self.lint_outputs(node, &mut scope)?;
            self.lint_subgraphs(node)?;
        }
        self.lint_inputs(self.return_node, &scope)?;

        let inserted: HashSet<NodeId> = order.iter().copied().collect();
        for (index, slot) in self.nodes.iter().enumerate() {
            let Some(node) = slot else { continue };
            let id = NodeId {
                graph: self.id,
                index: index as u32,
            };
            if id == self.param_node || id == self.return_node {
                continue;
            }
            if !inserted.contains(&id) {
                return Err(LintError::UninsertedNode {
                    kind: node.kind().clone(),
                });
            }
        }

        for (index, slot) in self.values.iter().enumerate() {
            let Some(value) = slot else { continue };
            let id = ValueId {
                graph: self.id,
                index: index as u32,
            };
            let owned = self
                .try_node(value.node())
                .map(|producer| producer.outputs().get(value.offset()) == Some(&id))
                .unwrap_or(false);
            if !owned {
                return Err(LintError::OutputOwnership {
                    value: value.unique_name(),
                    offset: value.offset(),
                });
            }
            let mut seen = HashSet::new();
            for entry in value.uses() {
                if !seen.insert(*entry) {
                    return Err(LintError::DuplicateUse {
                        value: value.unique_name(),
                    });
                }
                let matches = self
                    .try_node(entry.user)
                    .map(|user| user.inputs().get(entry.offset) == Some(&id))
                    .unwrap_or(false);
                if !matches {
                    return Err(LintError::StaleUse {
                        value: value.unique_name(),
                        user: entry.user,
                        offset: entry.offset,
                    });
                }
            }
        }
        Ok(())
    }

    fn lint_links(&self) -> Result<Vec<NodeId>, LintError> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = self.return_node;
        loop {
            let node = self.node(cursor);
            let (Some(next), Some(_)) = (node.next, node.prev) else {
                return Err(LintError::BrokenLink {
                    kind: node.kind().clone(),
                });
            };
            let points_back = self.try_node(next).and_then(|n| n.prev) == Some(cursor);
            if !points_back || !visited.insert(next) {
                return Err(LintError::BrokenLink {
                    kind: node.kind().clone(),
                });
            }
            if next == self.return_node {
                return Ok(order);
            }
            order.push(next);
            cursor = next;
        }
    }

    fn lint_inputs(&self, node: NodeId, scope: &HashSet<ValueId>) -> Result<(), LintError> {
        let n = self.node(node);
        for (offset, &input) in n.inputs().iter().enumerate() {
            let Some(value) = self.try_value(input) else {
                return Err(LintError::DanglingInput {
                    kind: n.kind().clone(),
                    offset,
                });
            };
            if !scope.contains(&input) {
                return Err(LintError::UseBeforeDefinition {
                    kind: n.kind().clone(),
                    offset,
                    value: value.unique_name(),
                });
            }
            let listed = value
                .uses()
                .iter()
                .filter(|u| u.user == node && u.offset == offset)
                .count();
            if listed != 1 {
                return Err(LintError::MissingUse {
                    kind: n.kind().clone(),
                    offset,
                    value: value.unique_name(),
                });
            }
        }
        Ok(())
    }

    fn lint_outputs(&self, node: NodeId, scope: &mut HashSet<ValueId>) -> Result<(), LintError> {
        for (offset, &output) in self.node(node).outputs().iter().enumerate() {
            let owned = self
                .try_value(output)
                .map(|value| value.node() == node && value.offset() == offset);
            match owned {
                Some(true) => {
                    scope.insert(output);
                }
                _ => {
                    return Err(LintError::OutputOwnership {
                        value: format!("{}", output.index),
                        offset,
                    })
                }
            }
        }
        Ok(())
    }

    fn lint_subgraphs(&self, node: NodeId) -> Result<(), LintError> {
        let n = self.node(node);
        for (name, value) in n.attributes().iter() {
            let graphs: Vec<&Graph> = match value {
                AttributeValue::G(g) => vec![g.as_ref()],
                AttributeValue::Gs(gs) => gs.iter().map(|g| g.as_ref()).collect(),
                _ => continue,
            };
            for graph in graphs {
                graph.lint().map_err(|source| LintError::Subgraph {
                    kind: n.kind().clone(),
                    attribute: name.to_string(),
                    source: Box::new(source),
                })?;
            }
        }
        Ok(())
    }
}
