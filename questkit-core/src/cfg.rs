//! Control-flow graphs over dialog blocks.
//!
//! Nodes and edges refer to each other by string id only.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::commands::Flow;
use crate::script::{DialogBlock, Item, Script};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Start,
    End,
    Text,
    Command,
    Branch,
    Call,
    Memory,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Sequential,
    BranchTrue,
    BranchFalse,
    Call,
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CfgNode {
    pub id: String,
    pub kind: NodeKind,
    pub line: usize,
    pub label: String,
    pub metadata: BTreeMap<String, String>,
}

impl CfgNode {
    pub fn is_dead(&self) -> bool {
        self.metadata.get("dead").is_some_and(|v| v == "true")
    }

    /// The fall-off exit added for labels that close a block.
    pub fn is_implicit(&self) -> bool {
        self.metadata.get("implicit").is_some_and(|v| v == "true")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CfgEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFlowGraph {
    pub dialog_id: String,
    pub nodes: Vec<CfgNode>,
    pub edges: Vec<CfgEdge>,
    pub exits: Vec<String>,
    pub complexity: usize,
    /// Call targets in source order.
    pub subroutine_calls: Vec<String>,
}

const LABEL_WIDTH: usize = 40;

fn short_label(text: &str) -> String {
    if text.chars().count() > LABEL_WIDTH {
        let head: String = text.chars().take(LABEL_WIDTH - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// How control leaves a node, decided while the nodes are laid out.
#[derive(Clone, Copy)]
enum Exit {
    FallThrough,
    Conditional,
    Jump,
    Call,
    Terminal,
}

pub fn build_cfg(block: &DialogBlock) -> ControlFlowGraph {
    let start_id = format!("{}_START", block.id);
    let mut nodes = vec![CfgNode {
        id: start_id.clone(),
        kind: NodeKind::Start,
        line: block.header_line,
        label: "START".to_string(),
        metadata: BTreeMap::new(),
    }];
    let mut exits_of: Vec<(Exit, Option<String>)> = vec![(Exit::FallThrough, None)];
    let mut label_node: HashMap<&str, String> = HashMap::new();
    let mut pending_labels: Vec<(&str, usize)> = Vec::new();
    let mut complexity = 0usize;

    for item in &block.items {
        let (kind, exit, target, line) = match item {
            Item::Label { name, line } => {
                pending_labels.push((name, *line));
                continue;
            }
            Item::Text { line, .. } => (NodeKind::Text, Exit::FallThrough, None, *line),
            Item::Command(cmd) => {
                let target = cmd.target().map(str::to_string).or_else(|| {
                    // Calls through a literal address still name their target.
                    match cmd.spec().map(|s| s.flow) {
                        Some(Flow::Call) => cmd.params.first().map(|p| p.to_string()),
                        _ => None,
                    }
                });
                match cmd.spec().map(|s| (s.flow, s.memory)) {
                    Some((Flow::Branch, _)) => {
                        complexity += 2;
                        (NodeKind::Branch, Exit::Conditional, target, cmd.line)
                    }
                    Some((Flow::Jump, _)) => {
                        complexity += 2;
                        (NodeKind::Branch, Exit::Jump, target, cmd.line)
                    }
                    Some((Flow::Call, _)) => {
                        complexity += 1;
                        (NodeKind::Call, Exit::Call, target, cmd.line)
                    }
                    Some((Flow::End, _)) => (NodeKind::End, Exit::Terminal, None, cmd.line),
                    Some((Flow::Return, _)) => (NodeKind::Return, Exit::Terminal, None, cmd.line),
                    Some((Flow::Linear, true)) => (NodeKind::Memory, Exit::FallThrough, None, cmd.line),
                    _ => (NodeKind::Command, Exit::FallThrough, None, cmd.line),
                }
            }
        };

        let id = format!("{}_L{}", block.id, line);
        for (name, _) in pending_labels.drain(..) {
            label_node.insert(name, id.clone());
        }
        let mut metadata = BTreeMap::new();
        if let Item::Command(cmd) = item {
            metadata.insert("mnemonic".to_string(), cmd.mnemonic.clone());
        }
        if let Some(t) = &target {
            metadata.insert("target".to_string(), t.clone());
        }
        nodes.push(CfgNode {
            id,
            kind,
            line,
            label: short_label(&item.source()),
            metadata,
        });
        exits_of.push((exit, target));
    }

    // Labels with nothing after them name the point where the block falls off.
    if let Some(&(_, line)) = pending_labels.first() {
        let id = format!("{}_L{}", block.id, line);
        for (name, _) in pending_labels.drain(..) {
            label_node.insert(name, id.clone());
        }
        nodes.push(CfgNode {
            id,
            kind: NodeKind::End,
            line,
            label: "(end of dialog)".to_string(),
            metadata: BTreeMap::from([("implicit".to_string(), "true".to_string())]),
        });
        exits_of.push((Exit::Terminal, None));
    }

    let mut edges = Vec::new();
    let mut exits = Vec::new();
    let mut subroutine_calls = Vec::new();
    let mut local_returns_to: Vec<String> = Vec::new();
    // (node index, conditional with a resolved target)
    let mut prev: Option<(usize, bool)> = None;

    for (i, (exit, target)) in exits_of.iter().enumerate() {
        let id = nodes[i].id.clone();
        if let Some((p, resolved_branch)) = prev {
            edges.push(CfgEdge {
                from: nodes[p].id.clone(),
                to: id.clone(),
                kind: if resolved_branch {
                    EdgeKind::BranchFalse
                } else {
                    EdgeKind::Sequential
                },
                label: if resolved_branch { "false".to_string() } else { String::new() },
            });
        }

        let resolved = target.as_deref().and_then(|t| label_node.get(t));
        prev = match exit {
            Exit::FallThrough => Some((i, false)),
            Exit::Conditional | Exit::Jump => {
                if let Some(to) = resolved {
                    edges.push(CfgEdge {
                        from: id.clone(),
                        to: to.clone(),
                        kind: EdgeKind::BranchTrue,
                        label: target.clone().unwrap_or_default(),
                    });
                }
                match exit {
                    Exit::Conditional => Some((i, resolved.is_some())),
                    _ => None,
                }
            }
            Exit::Call => {
                let symbol = target.clone().unwrap_or_else(|| "?".to_string());
                subroutine_calls.push(symbol.clone());
                edges.push(CfgEdge {
                    from: id.clone(),
                    to: resolved.cloned().unwrap_or(symbol.clone()),
                    kind: EdgeKind::Call,
                    label: symbol,
                });
                if resolved.is_some() {
                    if let Some(next) = nodes.get(i + 1) {
                        local_returns_to.push(next.id.clone());
                    }
                }
                Some((i, false))
            }
            Exit::Terminal => {
                exits.push(id.clone());
                None
            }
        };
    }

    if let Some((p, _)) = prev {
        exits.push(nodes[p].id.clone());
    }

    for continuation in &local_returns_to {
        for node in nodes.iter().filter(|n| n.kind == NodeKind::Return) {
            edges.push(CfgEdge {
                from: node.id.clone(),
                to: continuation.clone(),
                kind: EdgeKind::Return,
                label: "return".to_string(),
            });
        }
    }

    mark_dead(&mut nodes, &edges, &start_id);

    ControlFlowGraph {
        dialog_id: block.id.clone(),
        nodes,
        edges,
        exits,
        complexity,
        subroutine_calls,
    }
}

fn mark_dead(nodes: &mut [CfgNode], edges: &[CfgEdge], start: &str) {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in edges {
        adjacency.entry(e.from.as_str()).or_default().push(e.to.as_str());
    }

    let mut seen: HashSet<&str> = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        for &next in adjacency.get(id).into_iter().flatten() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }

    let dead: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| !seen.contains(n.id.as_str()))
        .map(|(i, _)| i)
        .collect();
    for i in dead {
        nodes[i].metadata.insert("dead".to_string(), "true".to_string());
    }
}

pub fn build_script_cfgs(script: &Script) -> Vec<ControlFlowGraph> {
    script.dialogs.iter().map(build_cfg).collect()
}

impl ControlFlowGraph {
    pub fn node(&self, id: &str) -> Option<&CfgNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn dead_nodes(&self) -> impl Iterator<Item = &CfgNode> {
        self.nodes.iter().filter(|n| n.is_dead())
    }

    pub fn to_dot(&self) -> String {
        let mut out = format!("digraph \"{}\" {{\n", dot_escape(&self.dialog_id));
        out.push_str("    rankdir=TB;\n    node [fontname=\"Courier\"];\n");
        for n in &self.nodes {
            let shape = match n.kind {
                NodeKind::Start => "ellipse",
                NodeKind::End | NodeKind::Return => "doublecircle",
                NodeKind::Branch => "diamond",
                NodeKind::Call => "box3d",
                NodeKind::Memory => "cylinder",
                NodeKind::Text => "note",
                NodeKind::Command => "box",
            };
            let style = if n.is_dead() { ", style=dashed, color=gray" } else { "" };
            out.push_str(&format!(
                "    \"{}\" [label=\"{}\", shape={shape}{style}];\n",
                dot_escape(&n.id),
                dot_escape(&n.label)
            ));
        }
        for e in &self.edges {
            let attrs = match e.kind {
                EdgeKind::Sequential => String::new(),
                EdgeKind::BranchTrue => " [label=\"true\", color=green]".to_string(),
                EdgeKind::BranchFalse => " [label=\"false\", color=red]".to_string(),
                EdgeKind::Call => format!(" [label=\"call {}\", style=dashed, color=blue]", dot_escape(&e.label)),
                EdgeKind::Return => " [label=\"return\", style=dotted, color=gray]".to_string(),
            };
            out.push_str(&format!(
                "    \"{}\" -> \"{}\"{attrs};\n",
                dot_escape(&e.from),
                dot_escape(&e.to)
            ));
        }
        out.push_str("}\n");
        out
    }

    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("flowchart TD\n");
        for n in &self.nodes {
            let label = n.label.replace('"', "#quot;");
            let shape = match n.kind {
                NodeKind::Start | NodeKind::End | NodeKind::Return => format!("([\"{label}\"])"),
                NodeKind::Branch => format!("{{\"{label}\"}}"),
                NodeKind::Call => format!("[[\"{label}\"]]"),
                NodeKind::Memory => format!("[(\"{label}\")]"),
                NodeKind::Text => format!("[/\"{label}\"/]"),
                NodeKind::Command => format!("[\"{label}\"]"),
            };
            out.push_str(&format!("    {}{shape}\n", mermaid_id(&n.id)));
        }
        for e in &self.edges {
            let arrow = match e.kind {
                EdgeKind::Sequential => "-->".to_string(),
                EdgeKind::BranchTrue => "-->|true|".to_string(),
                EdgeKind::BranchFalse => "-->|false|".to_string(),
                EdgeKind::Call => "-.->|call|".to_string(),
                EdgeKind::Return => "-.->|return|".to_string(),
            };
            out.push_str(&format!("    {} {arrow} {}\n", mermaid_id(&e.from), mermaid_id(&e.to)));
        }
        for n in self.dead_nodes() {
            out.push_str(&format!("    style {} stroke-dasharray: 5 5\n", mermaid_id(&n.id)));
        }
        out
    }
}

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn mermaid_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_script, ParseOptions};

    fn graph(src: &str) -> ControlFlowGraph {
        let script = parse_script(src, &ParseOptions::default()).unwrap();
        build_cfg(&script.dialogs[0])
    }

    fn edge<'g>(g: &'g ControlFlowGraph, from: &str, to: &str) -> Option<&'g CfgEdge> {
        g.edges.iter().find(|e| e.from == from && e.to == to)
    }

    #[test]
    fn branching_dialog() {
        let g = graph("CHECK_FLAG 5\nJUMP_IF done\nPLAY_SOUND 3\ndone:\nEND\n");
        let kinds: Vec<NodeKind> = g.nodes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            [NodeKind::Start, NodeKind::Branch, NodeKind::Branch, NodeKind::Command, NodeKind::End]
        );
        assert_eq!(edge(&g, "MAIN_START", "MAIN_L1").unwrap().kind, EdgeKind::Sequential);
        assert_eq!(edge(&g, "MAIN_L1", "MAIN_L2").unwrap().kind, EdgeKind::Sequential);
        assert_eq!(edge(&g, "MAIN_L2", "MAIN_L5").unwrap().kind, EdgeKind::BranchTrue);
        assert_eq!(edge(&g, "MAIN_L2", "MAIN_L3").unwrap().kind, EdgeKind::BranchFalse);
        assert_eq!(edge(&g, "MAIN_L3", "MAIN_L5").unwrap().kind, EdgeKind::Sequential);
        assert_eq!(g.exits, ["MAIN_L5"]);
        assert_eq!(g.complexity, 4);
        assert_eq!(g.dead_nodes().count(), 0);
    }

    #[test]
    fn code_after_terminal_is_dead_until_jumped_to() {
        let g = graph("JUMP later\nEND\nWAIT 1\nlater:\nSET_FLAG 3\nRETURN\n");
        let dead: Vec<&str> = g.dead_nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(dead, ["MAIN_L2", "MAIN_L3"]);
        assert_eq!(g.node("MAIN_L5").unwrap().kind, NodeKind::Memory);
        assert_eq!(g.exits, ["MAIN_L2", "MAIN_L6"]);
    }

    #[test]
    fn calls_link_targets_and_returns() {
        let g = graph("CALL_SUBROUTINE helper\nCALL_SUBROUTINE SUB_1234\nEND\nhelper:\nWAIT 2\nRETURN\n");
        assert_eq!(edge(&g, "MAIN_L1", "MAIN_L5").unwrap().kind, EdgeKind::Call);
        assert_eq!(edge(&g, "MAIN_L2", "SUB_1234").unwrap().kind, EdgeKind::Call);
        assert_eq!(edge(&g, "MAIN_L6", "MAIN_L2").unwrap().kind, EdgeKind::Return);
        assert_eq!(g.subroutine_calls, ["helper", "SUB_1234"]);
        assert_eq!(g.complexity, 2);
        assert_eq!(g.dead_nodes().count(), 0);
    }

    #[test]
    fn jump_to_a_closing_label_reaches_an_exit() {
        let g = graph("CHECK_FLAG 5\nJUMP_IF done\nPLAY_SOUND 3\ndone:\n");
        let end = g.node("MAIN_L4").unwrap();
        assert_eq!(end.kind, NodeKind::End);
        assert!(end.is_implicit());
        assert_eq!(edge(&g, "MAIN_L2", "MAIN_L4").unwrap().kind, EdgeKind::BranchTrue);
        assert_eq!(edge(&g, "MAIN_L2", "MAIN_L3").unwrap().kind, EdgeKind::BranchFalse);
        assert_eq!(edge(&g, "MAIN_L3", "MAIN_L4").unwrap().kind, EdgeKind::Sequential);
        assert_eq!(g.exits, ["MAIN_L4"]);
        assert_eq!(g.dead_nodes().count(), 0);
    }

    #[test]
    fn falling_off_the_end_exits_at_last_node() {
        let g = graph("\"Hello\"\nWAIT 1\n");
        assert_eq!(g.node("MAIN_L1").unwrap().kind, NodeKind::Text);
        assert_eq!(g.exits, ["MAIN_L2"]);
    }

    #[test]
    fn long_labels_are_truncated() {
        let g = graph("\"This line of dialog is far longer than forty characters\"\nEND\n");
        let label = &g.node("MAIN_L1").unwrap().label;
        assert_eq!(label.chars().count(), 40);
        assert!(label.ends_with("..."));
    }

    #[test]
    fn renderers_mention_every_node() {
        let g = graph("CHECK_FLAG 5\nJUMP_IF done\nPLAY_SOUND 3\ndone:\nEND\n");
        let dot = g.to_dot();
        assert!(dot.starts_with("digraph \"MAIN\""));
        assert!(dot.contains("\"MAIN_L2\" -> \"MAIN_L5\" [label=\"true\", color=green];"));
        let mermaid = g.to_mermaid();
        assert!(mermaid.contains("MAIN_L2 -->|false| MAIN_L3"));
        for n in &g.nodes {
            assert!(dot.contains(&n.id) && mermaid.contains(&n.id));
        }
    }

    #[test]
    fn every_live_node_is_reachable_and_every_graph_exits() {
        let src = "DIALOG A:\nCHECK_ITEM 4\nBRANCH skip\nGIVE_ITEM 4, 1\nskip:\nEND\n\
                   DIALOG B:\nloop:\nWAIT 10\nJUMP loop\n";
        let script = parse_script(src, &ParseOptions::default()).unwrap();
        for g in build_script_cfgs(&script) {
            for n in &g.nodes {
                let incoming = g.edges.iter().any(|e| e.to == n.id);
                assert!(n.kind == NodeKind::Start || incoming || n.is_dead());
            }
            if g.dialog_id == "A" {
                assert_eq!(g.exits, ["A_L6"]);
            } else {
                assert!(g.exits.is_empty());
                assert!(edge(&g, "B_L10", "B_L9").is_some());
            }
        }
    }
}
