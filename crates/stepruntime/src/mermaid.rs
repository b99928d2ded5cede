//! Mermaid rendering of flow graphs.

use crate::flow::Flow;
use crate::runnable::RunnableKind;
use petgraph::visit::EdgeRef;

const NODE_STYLE: &str = "fill:#90EE90,stroke:#333,stroke-width:2px";
const BATCH_STYLE: &str = "fill:#ffd700,stroke:#333,stroke-width:2px";

impl Flow {
    /// Render the flow as a mermaid `graph TD` diagram.
    ///
    /// Nested flows become subgraphs; edges into a nested flow point at the
    /// subgraph. Non-default actions label their edge.
    pub fn to_mermaid(&self) -> String {
        let mut lines = vec!["graph TD".to_string()];
        let mut counter = 0;
        render(self, &mut lines, &mut counter, 1);
        lines.push(format!("    classDef node {}", NODE_STYLE));
        lines.push(format!("    classDef batch {}", BATCH_STYLE));
        lines.join("\n")
    }
}

fn render(flow: &Flow, lines: &mut Vec<String>, counter: &mut usize, depth: usize) {
    let indent = "    ".repeat(depth);
    let graph = flow.graph();

    let ids: Vec<String> = graph
        .node_indices()
        .map(|_| {
            *counter += 1;
            format!("N{}", counter)
        })
        .collect();

    for index in graph.node_indices() {
        let entry = &graph[index];
        let id = &ids[index.index()];
        let label = escape(entry.runnable.name());
        match (entry.runnable.kind(), entry.runnable.as_flow()) {
            (RunnableKind::Flow | RunnableKind::BatchFlow, Some(inner)) => {
                let tag = if entry.runnable.kind() == RunnableKind::BatchFlow {
                    "batch flow: "
                } else {
                    ""
                };
                lines.push(format!("{}subgraph {}[\"{}{}\"]", indent, id, tag, label));
                render(inner, lines, counter, depth + 1);
                lines.push(format!("{}end", indent));
            }
            (RunnableKind::BatchNode, _) => {
                lines.push(format!("{}{}[\"{}\"]:::batch", indent, id, label));
            }
            _ => {
                lines.push(format!("{}{}[\"{}\"]:::node", indent, id, label));
            }
        }
    }

    for edge in graph.edge_references() {
        let from = &ids[edge.source().index()];
        let to = &ids[edge.target().index()];
        let action = edge.weight();
        if action.is_default() {
            lines.push(format!("{}{} --> {}", indent, from, to));
        } else {
            lines.push(format!("{}{} -->|{}| {}", indent, from, escape(action.as_str()), to));
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('"', "#quot;")
}
