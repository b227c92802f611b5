use super::attributes::{fmt_attribute, AttributeValue};
use super::graph::Graph;
use super::node::{NodeId, ValueId};
use serde_json::{json, Value as JsonValue};
use std::fmt;

struct AttrDisplay<'a>(&'a AttributeValue);

impl fmt::Display for AttrDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_attribute(f, self.0)
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "{line}")
}

impl Graph {
    fn typed_name(&self, value: ValueId) -> String {
        format!("%{} : {}", self.value_name(value), self.value_type(value))
    }

    fn name_list(&self, values: &[ValueId]) -> String {
        values
            .iter()
            .map(|&v| format!("%{}", self.value_name(v)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn fmt_node(&self, node: NodeId, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.node(node);
        let mut line = String::new();
        if !n.outputs().is_empty() {
            let outputs = n
                .outputs()
                .iter()
                .map(|&v| self.typed_name(v))
                .collect::<Vec<_>>()
                .join(", ");
            line.push_str(&outputs);
            line.push_str(" = ");
        }
        line.push_str(n.kind().as_str());
        if let Some(op) = n.host_op() {
            line.push_str(&format!("<{}>", op.name()));
        }
        if !n.attributes().is_empty() {
            let attrs = n
                .attributes()
                .iter()
                .map(|(name, value)| format!("{name}={}", AttrDisplay(value)))
                .collect::<Vec<_>>()
                .join(", ");
            line.push_str(&format!("[{attrs}]"));
        }
        line.push_str(&format!("({})", self.name_list(n.inputs())));
        if n.stage() > 0 {
            line.push_str(&format!(" # stage {}", n.stage()));
        }
        write_line(f, indent, &line)?;

        for (name, value) in n.attributes().iter() {
            match value {
                AttributeValue::G(graph) => {
                    write_line(f, indent + 1, &format!("{name} ="))?;
                    graph.fmt_graph(indent + 1, f)?;
                }
                AttributeValue::Gs(graphs) => {
                    for (idx, graph) in graphs.iter().enumerate() {
                        write_line(f, indent + 1, &format!("{name}[{idx}] ="))?;
                        graph.fmt_graph(indent + 1, f)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn fmt_graph(&self, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs = self
            .inputs()
            .iter()
            .map(|&v| self.typed_name(v))
            .collect::<Vec<_>>()
            .join(", ");
        write_line(f, indent, &format!("graph({inputs}) {{"))?;
        for node in self.nodes() {
            self.fmt_node(node, indent + 1, f)?;
        }
        write_line(
            f,
            indent + 1,
            &format!("return ({})", self.name_list(self.outputs())),
        )?;
        write_line(f, indent, "}")
    }

    /// Structured dump for debugging tools.
    pub fn to_json(&self) -> JsonValue {
        let names = |values: &[ValueId]| -> Vec<String> {
            values.iter().map(|&v| self.value_name(v)).collect()
        };
        let nodes: Vec<JsonValue> = self
            .nodes()
            .map(|id| {
                let node = self.node(id);
                let attributes: serde_json::Map<String, JsonValue> = node
                    .attributes()
                    .iter()
                    .map(|(name, value)| {
                        let rendered = match value {
                            AttributeValue::G(graph) => graph.to_json(),
                            AttributeValue::Gs(graphs) => {
                                JsonValue::Array(graphs.iter().map(|g| g.to_json()).collect())
                            }
                            other => json!(AttrDisplay(other).to_string()),
                        };
                        (name.to_string(), rendered)
                    })
                    .collect();
                json!({
                    "kind": node.kind(),
                    "inputs": names(node.inputs()),
                    "outputs": names(node.outputs()),
                    "attributes": attributes,
                    "stage": node.stage(),
                })
            })
            .collect();
        json!({
            "inputs": names(self.inputs()),
            "outputs": names(self.outputs()),
            "nodes": nodes,
        })
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_graph(0, f)
    }
}
