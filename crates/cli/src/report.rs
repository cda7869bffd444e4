use covtree_indexer::{CoverageTree, IndexReport, NodeKind, TreeNode};
use covtree_protocol::{CoverageLevel, RefreshReason};
use serde::Serialize;
use std::fmt::Write as _;

/// JSON shape of `covtree tree --json`.
#[derive(Debug, Serialize)]
pub struct TreeOutput<'a> {
    pub reason: Option<RefreshReason>,
    pub report: &'a IndexReport,
    pub roots: Vec<NodeView<'a>>,
}

#[derive(Debug, Serialize)]
pub struct NodeView<'a> {
    pub kind: &'static str,
    pub label: &'a str,
    pub path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub covered_lines: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<CoverageLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hits: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub missing: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeView<'a>>,
}

impl<'a> TreeOutput<'a> {
    pub fn new(tree: &'a CoverageTree, depth: Option<usize>) -> Self {
        Self {
            reason: tree.reason,
            report: &tree.report,
            roots: tree
                .root_children()
                .into_iter()
                .map(|node| NodeView::new(node, depth, 1))
                .collect(),
        }
    }
}

impl<'a> NodeView<'a> {
    fn new(node: &'a TreeNode, depth: Option<usize>, level: usize) -> Self {
        let (line, hits) = match node.kind {
            NodeKind::Function { line, hit_count } => (Some(line), Some(hit_count)),
            _ => (None, None),
        };
        let children = if depth.is_some_and(|max| level >= max) {
            Vec::new()
        } else {
            node.sorted_children()
                .into_iter()
                .map(|child| NodeView::new(child, depth, level + 1))
                .collect()
        };
        Self {
            kind: kind_name(&node.kind),
            label: &node.label,
            path: &node.path,
            total_lines: node.total_lines(),
            covered_lines: node.covered_lines(),
            coverage_percent: node.coverage_percent(),
            level: node.coverage_level(),
            line,
            hits,
            missing: is_missing(node),
            children,
        }
    }
}

fn kind_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Root => "root",
        NodeKind::Folder { .. } => "folder",
        NodeKind::File { .. } => "file",
        NodeKind::Function { .. } => "function",
    }
}

fn is_missing(node: &TreeNode) -> bool {
    matches!(node.kind, NodeKind::File { exists: false, .. })
}

/// Indented text rendering of the tree, one node per line, followed by the diagnostics.
pub fn render_tree(tree: &CoverageTree, depth: Option<usize>) -> String {
    let mut out = String::new();
    for node in tree.root_children() {
        render_node(&mut out, node, depth, 1);
    }
    out.push_str(&render_summary(&tree.report));
    if tree.report.has_diagnostics() {
        out.push_str("\nDiagnostics:");
        for diagnostic in &tree.report.diagnostics {
            let _ = write!(out, "\n  - {diagnostic}");
        }
    }
    out
}

fn render_node(out: &mut String, node: &TreeNode, depth: Option<usize>, level: usize) {
    let indent = "  ".repeat(level - 1);
    let _ = write!(out, "{indent}{}  {}", node.label, node.describe());
    if let Some(coverage) = node.coverage_level() {
        if !node.is_function() {
            let _ = write!(out, " [{coverage}]");
        }
    }
    if is_missing(node) {
        out.push_str(" (missing)");
    }
    out.push('\n');

    if depth.is_some_and(|max| level >= max) {
        return;
    }
    for child in node.sorted_children() {
        render_node(out, child, depth, level + 1);
    }
}

/// One-line rebuild summary.
pub fn render_summary(report: &IndexReport) -> String {
    format!(
        "{} files, {} functions in {} roots ({}ms, {} diagnostics)",
        report.files,
        report.functions,
        report.roots,
        report.time_ms,
        report.diagnostics.len()
    )
}
