//! Coverage tree nodes.
//!
//! A tree is rebuilt from scratch on every refresh, so nodes are plain owned
//! values. Folder and root line counts are never stored: they are summed from
//! the children whenever they are read.

use covtree_protocol::{CoverageLevel, CoverageLevelThresholds};
use std::cmp::Ordering;

/// Variant payload of a [`TreeNode`].
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Folder {
        thresholds: CoverageLevelThresholds,
    },
    File {
        lines_found: u64,
        lines_hit: u64,
        thresholds: CoverageLevelThresholds,
        /// False when the file was not part of the live listing of its root.
        exists: bool,
    },
    Function {
        line: u32,
        hit_count: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub path: String,
    pub label: String,
    pub kind: NodeKind,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn root() -> Self {
        Self {
            path: String::new(),
            label: String::new(),
            kind: NodeKind::Root,
            children: Vec::new(),
        }
    }

    pub fn folder(
        path: impl Into<String>,
        label: impl Into<String>,
        thresholds: CoverageLevelThresholds,
    ) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            kind: NodeKind::Folder { thresholds },
            children: Vec::new(),
        }
    }

    pub fn file(
        path: impl Into<String>,
        label: impl Into<String>,
        lines_found: u64,
        lines_hit: u64,
        thresholds: CoverageLevelThresholds,
        exists: bool,
    ) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            kind: NodeKind::File {
                lines_found,
                lines_hit,
                thresholds,
                exists,
            },
            children: Vec::new(),
        }
    }

    pub fn function(
        path: impl Into<String>,
        label: impl Into<String>,
        line: u32,
        hit_count: u64,
    ) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            kind: NodeKind::Function { line, hit_count },
            children: Vec::new(),
        }
    }

    pub const fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder { .. })
    }

    pub const fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    pub const fn is_function(&self) -> bool {
        matches!(self.kind, NodeKind::Function { .. })
    }

    /// Lines covered by the instrumentation. `None` for functions, which only carry hit counts.
    pub fn total_lines(&self) -> Option<u64> {
        match &self.kind {
            NodeKind::Function { .. } => None,
            NodeKind::File { lines_found, .. } => Some(*lines_found),
            NodeKind::Root | NodeKind::Folder { .. } => Some(
                self.children
                    .iter()
                    .map(|child| child.total_lines().unwrap_or(0))
                    .sum(),
            ),
        }
    }

    pub fn covered_lines(&self) -> Option<u64> {
        match &self.kind {
            NodeKind::Function { .. } => None,
            NodeKind::File { lines_hit, .. } => Some(*lines_hit),
            NodeKind::Root | NodeKind::Folder { .. } => Some(
                self.children
                    .iter()
                    .map(|child| child.covered_lines().unwrap_or(0))
                    .sum(),
            ),
        }
    }

    /// Percentage of covered lines; an empty subtree counts as fully covered.
    pub fn coverage_percent(&self) -> Option<f64> {
        let total = self.total_lines()?;
        let covered = self.covered_lines()?;
        if total == 0 {
            return Some(100.0);
        }
        #[allow(clippy::cast_precision_loss)]
        let percent = covered as f64 * 100.0 / total as f64;
        Some(percent.min(100.0))
    }

    pub fn coverage_level(&self) -> Option<CoverageLevel> {
        match &self.kind {
            NodeKind::Root => None,
            NodeKind::Function { hit_count, .. } => Some(if *hit_count > 0 {
                CoverageLevel::High
            } else {
                CoverageLevel::Low
            }),
            NodeKind::Folder { thresholds } | NodeKind::File { thresholds, .. } => {
                self.coverage_percent().map(|p| thresholds.classify(p))
            }
        }
    }

    pub fn describe(&self) -> String {
        if let NodeKind::Function { hit_count, .. } = self.kind {
            return format!("{hit_count} hits");
        }
        self.coverage_percent()
            .map(format_percent)
            .unwrap_or_default()
    }

    pub fn tooltip(&self) -> String {
        format!("{}: {}", self.label, self.describe())
    }

    /// Children ordered by display path. Stable, so functions of one file keep source order.
    pub fn sorted_children(&self) -> Vec<&TreeNode> {
        let mut children: Vec<&TreeNode> = self.children.iter().collect();
        children.sort_by(|a, b| locale_compare(&a.path, &b.path));
        children
    }

    /// Preorder traversal including `self`.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        self.walk().find(|node| node.path == path && !node.is_function())
    }

    pub fn file_count(&self) -> usize {
        self.walk().filter(|node| node.is_file()).count()
    }

    pub fn function_count(&self) -> usize {
        self.walk().filter(|node| node.is_function()).count()
    }
}

pub struct Walk<'a> {
    stack: Vec<&'a TreeNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Case-insensitive ordering; on a tie lowercase sorts first.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
        .then_with(|| b.cmp(a))
}

fn format_percent(percent: f64) -> String {
    let rounded = (percent * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}%")
    } else {
        format!("{rounded:.1}%")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn thresholds() -> CoverageLevelThresholds {
        CoverageLevelThresholds::new(80.0, 50.0).unwrap()
    }

    fn file(path: &str, found: u64, hit: u64) -> TreeNode {
        let label = path.rsplit('/').next().unwrap_or(path);
        TreeNode::file(path, label, found, hit, thresholds(), true)
    }

    #[test]
    fn folders_sum_their_children() {
        let mut inner = TreeNode::folder("/r/src/foo", "foo", thresholds());
        inner.children.push(file("/r/src/foo/a.ts", 10, 5));
        inner.children.push(file("/r/src/foo/b.ts", 30, 25));
        let mut outer = TreeNode::folder("/r/src", "src", thresholds());
        outer.children.push(inner);
        outer.children.push(file("/r/src/c.ts", 60, 0));
        let mut root = TreeNode::root();
        root.children.push(outer);

        assert_eq!(root.total_lines(), Some(100));
        assert_eq!(root.covered_lines(), Some(30));
        assert_eq!(root.children[0].children[0].total_lines(), Some(40));
        assert_eq!(root.coverage_level(), None);
        assert_eq!(root.children[0].coverage_level(), Some(CoverageLevel::Low));
    }

    #[test]
    fn functions_do_not_report_line_counts() {
        let mut f = file("/r/a.ts", 10, 10);
        f.children.push(TreeNode::function("/r/a.ts", "main", 1, 0));
        let function = &f.children[0];
        assert_eq!(function.total_lines(), None);
        assert_eq!(function.covered_lines(), None);
        assert_eq!(function.coverage_percent(), None);
        assert_eq!(function.coverage_level(), Some(CoverageLevel::Low));
        assert_eq!(function.describe(), "0 hits");
        assert_eq!(f.total_lines(), Some(10));
    }

    #[test]
    fn function_level_is_high_once_hit() {
        let function = TreeNode::function("/r/a.ts", "main", 1, 3);
        assert_eq!(function.coverage_level(), Some(CoverageLevel::High));
        assert_eq!(function.tooltip(), "main: 3 hits");
    }

    #[test]
    fn empty_file_is_fully_covered() {
        let empty = file("/r/empty.ts", 0, 0);
        assert_eq!(empty.coverage_percent(), Some(100.0));
        assert_eq!(empty.coverage_level(), Some(CoverageLevel::High));
        let odd = file("/r/odd.ts", 0, 7);
        assert_eq!(odd.coverage_percent(), Some(100.0));
        let empty_folder = TreeNode::folder("/r/none", "none", thresholds());
        assert_eq!(empty_folder.coverage_percent(), Some(100.0));
    }

    #[test]
    fn file_levels_follow_thresholds() {
        assert_eq!(file("/r/a", 50, 40).coverage_level(), Some(CoverageLevel::High));
        assert_eq!(file("/r/a", 50, 30).coverage_level(), Some(CoverageLevel::Medium));
        assert_eq!(file("/r/a", 50, 25).coverage_level(), Some(CoverageLevel::Medium));
        assert_eq!(file("/r/a", 50, 10).coverage_level(), Some(CoverageLevel::Low));
    }

    #[test]
    fn boundaries_hold_for_inexact_fractions() {
        let at_low = CoverageLevelThresholds::new(50.0, 29.0).unwrap();
        let node = TreeNode::file("/r/a", "a", 100, 29, at_low, true);
        assert_eq!(node.coverage_percent(), Some(29.0));
        assert_eq!(node.coverage_level(), Some(CoverageLevel::Medium));

        let at_sufficient = CoverageLevelThresholds::new(57.0, 20.0).unwrap();
        let node = TreeNode::file("/r/a", "a", 100, 57, at_sufficient, true);
        assert_eq!(node.coverage_percent(), Some(57.0));
        assert_eq!(node.coverage_level(), Some(CoverageLevel::High));
    }

    #[test]
    fn description_uses_one_decimal() {
        assert_eq!(file("/r/a", 50, 40).describe(), "80%");
        assert_eq!(file("/r/a", 3, 2).describe(), "66.7%");
        assert_eq!(file("/r/a", 3, 2).tooltip(), "a: 66.7%");
    }

    #[test]
    fn children_are_sorted_at_read_time() {
        let mut folder = TreeNode::folder("/r", "r", thresholds());
        folder.children.push(file("/r/b.ts", 1, 1));
        folder.children.push(file("/r/C.ts", 1, 1));
        folder.children.push(file("/r/a.ts", 1, 1));
        let order: Vec<&str> = folder
            .sorted_children()
            .iter()
            .map(|n| n.label.as_str())
            .collect();
        assert_eq!(order, vec!["a.ts", "b.ts", "C.ts"]);
        assert_eq!(folder.children[0].label, "b.ts");
    }

    #[test]
    fn functions_keep_source_order_when_sorted() {
        let mut f = file("/r/a.ts", 10, 10);
        f.children.push(TreeNode::function("/r/a.ts", "zeta", 1, 1));
        f.children.push(TreeNode::function("/r/a.ts", "alpha", 9, 1));
        let names: Vec<&str> = f.sorted_children().iter().map(|n| n.label.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn locale_compare_is_case_insensitive() {
        assert_eq!(locale_compare("apple", "Banana"), Ordering::Less);
        assert_eq!(locale_compare("a", "A"), Ordering::Less);
        assert_eq!(locale_compare("same", "same"), Ordering::Equal);
    }

    #[test]
    fn walk_and_find_cover_the_whole_tree() {
        let mut folder = TreeNode::folder("/r/src", "src", thresholds());
        let mut f = file("/r/src/a.ts", 4, 2);
        f.children.push(TreeNode::function("/r/src/a.ts", "run", 2, 1));
        folder.children.push(f);
        let mut root = TreeNode::root();
        root.children.push(folder);

        assert_eq!(root.walk().count(), 4);
        assert_eq!(root.file_count(), 1);
        assert_eq!(root.function_count(), 1);
        assert!(root.find("/r/src/a.ts").is_some_and(TreeNode::is_file));
        assert!(root.find("/r/missing.ts").is_none());
    }
}
