//! Builds the directory-shaped coverage tree from reconciled records.

use crate::report::IndexDiagnostic;
use crate::tree::TreeNode;
use covtree_protocol::path_filters::path_segments;
use covtree_protocol::{CoverageLevelThresholds, CoverageRecord, CoverageRecordSet, MonitoredRoot};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Everything the builder needs to know about one monitored root.
#[derive(Debug, Clone)]
pub struct RootCoverage {
    pub root: MonitoredRoot,
    pub thresholds: CoverageLevelThresholds,
    /// Records with reconciled paths.
    pub records: CoverageRecordSet,
    /// Absolute paths of every file currently in the root. A file outside the listing
    /// still counts as existing when it is present on disk.
    pub live_files: Vec<PathBuf>,
}

/// Builds a fresh tree: a root node with one folder per monitored root.
pub fn build_tree(inputs: &[RootCoverage]) -> (TreeNode, Vec<IndexDiagnostic>) {
    let mut root = TreeNode::root();
    let mut diagnostics = Vec::new();
    for input in inputs {
        let folder = build_root_folder(input, &mut diagnostics);
        root.children.push(folder);
    }
    (root, diagnostics)
}

fn build_root_folder(input: &RootCoverage, diagnostics: &mut Vec<IndexDiagnostic>) -> TreeNode {
    let root_name = input.root.name.clone();
    let mut arena = Arena::new(TreeNode::folder(
        path_string(&input.root.path),
        root_name.clone(),
        input.thresholds,
    ));
    let live: HashSet<&Path> = input.live_files.iter().map(PathBuf::as_path).collect();

    for record in input.records.records() {
        let segments = path_segments(&record.file_path);
        if segments.is_empty() {
            warn!("Coverage record with empty path in {root_name}");
            diagnostics.push(IndexDiagnostic::StructuralInconsistency {
                root: root_name.clone(),
                reported: record.file_path.clone(),
                conflict: root_name.clone(),
            });
            continue;
        }

        // Display path in the tree, and physical path on disk.
        let mut parent_key = root_name.clone();
        let mut parent = Arena::ROOT;
        let mut absolute = input.root.path.clone();

        for (index, step) in segments.iter().enumerate() {
            let node_key = format!("{parent_key}/{step}");
            absolute.push(step);
            let is_last = index + 1 == segments.len();

            if let Some(existing) = arena.lookup(&node_key) {
                let node = arena.node(existing);
                if is_last {
                    if node.is_file() {
                        debug!("Duplicate coverage entry for {node_key}; keeping the first one");
                    } else {
                        diagnostics.push(structural(&root_name, record, &node_key));
                    }
                    break;
                }
                if !node.is_folder() {
                    diagnostics.push(structural(&root_name, record, &node_key));
                    break;
                }
                parent = existing;
            } else if is_last {
                let exists = live.contains(absolute.as_path()) || absolute.is_file();
                if !exists {
                    warn!("{} does not exist", absolute.display());
                    diagnostics.push(IndexDiagnostic::MissingFile {
                        root: root_name.clone(),
                        path: absolute.clone(),
                    });
                }
                let node = file_node(&absolute, step, record, input.thresholds, exists);
                arena.insert(parent, node_key.clone(), node);
            } else {
                let node =
                    TreeNode::folder(path_string(&absolute), (*step).to_string(), input.thresholds);
                parent = arena.insert(parent, node_key.clone(), node);
            }

            parent_key = node_key;
        }
    }

    arena.into_tree()
}

fn file_node(
    absolute: &Path,
    label: &str,
    record: &CoverageRecord,
    thresholds: CoverageLevelThresholds,
    exists: bool,
) -> TreeNode {
    let path = path_string(absolute);
    let mut node = TreeNode::file(
        path.clone(),
        label,
        record.lines_found,
        record.lines_hit,
        thresholds,
        exists,
    );
    node.children = record
        .functions
        .iter()
        .map(|detail| TreeNode::function(path.clone(), detail.name.clone(), detail.line, detail.hit))
        .collect();
    node
}

fn structural(root: &str, record: &CoverageRecord, conflict: &str) -> IndexDiagnostic {
    warn!("Skipping {}: {conflict} is already taken by a node of another kind", record.file_path);
    IndexDiagnostic::StructuralInconsistency {
        root: root.to_string(),
        reported: record.file_path.clone(),
        conflict: conflict.to_string(),
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Build-time registry of nodes keyed by display path. Dropped once the tree is assembled.
struct Arena {
    nodes: Vec<Option<TreeNode>>,
    children: Vec<Vec<usize>>,
    by_path: HashMap<String, usize>,
}

impl Arena {
    const ROOT: usize = 0;

    fn new(root: TreeNode) -> Self {
        let mut by_path = HashMap::new();
        by_path.insert(root.label.clone(), Self::ROOT);
        Self {
            nodes: vec![Some(root)],
            children: vec![Vec::new()],
            by_path,
        }
    }

    fn lookup(&self, key: &str) -> Option<usize> {
        self.by_path.get(key).copied()
    }

    fn node(&self, index: usize) -> &TreeNode {
        self.nodes[index]
            .as_ref()
            .unwrap_or_else(|| unreachable!("arena node {index} taken before assembly"))
    }

    fn insert(&mut self, parent: usize, key: String, node: TreeNode) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Some(node));
        self.children.push(Vec::new());
        self.children[parent].push(index);
        self.by_path.insert(key, index);
        index
    }

    fn into_tree(mut self) -> TreeNode {
        self.assemble(Self::ROOT)
    }

    fn assemble(&mut self, index: usize) -> TreeNode {
        let mut node = self.nodes[index]
            .take()
            .unwrap_or_else(|| unreachable!("arena node {index} assembled twice"));
        let child_ids = std::mem::take(&mut self.children[index]);
        for child in child_ids {
            let child = self.assemble(child);
            node.children.push(child);
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;
    use pretty_assertions::assert_eq;

    fn input(records: Vec<CoverageRecord>, live: &[&str]) -> RootCoverage {
        RootCoverage {
            root: MonitoredRoot::new("ws", "/ws"),
            thresholds: CoverageLevelThresholds::new(80.0, 50.0).unwrap(),
            records: records.into_iter().collect(),
            live_files: live.iter().map(|p| PathBuf::from("/ws").join(p)).collect(),
        }
    }

    #[test]
    fn shared_prefixes_produce_one_folder() {
        let (tree, diagnostics) = build_tree(&[input(
            vec![
                CoverageRecord::new("src/foo/bar.ts", 10, 5),
                CoverageRecord::new("src/foo/baz.ts", 10, 10),
            ],
            &["src/foo/bar.ts", "src/foo/baz.ts"],
        )]);
        assert!(diagnostics.is_empty());

        let ws = &tree.children[0];
        assert_eq!(ws.label, "ws");
        assert_eq!(ws.children.len(), 1);
        let src = &ws.children[0];
        assert_eq!(src.children.len(), 1);
        let foo = &src.children[0];
        assert_eq!(foo.label, "foo");
        assert!(foo.is_folder());
        assert_eq!(foo.path, path_string(Path::new("/ws/src/foo")));
        let labels: Vec<&str> = foo.children.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["bar.ts", "baz.ts"]);
        assert_eq!(tree.total_lines(), Some(20));
        assert_eq!(tree.covered_lines(), Some(15));
    }

    #[test]
    fn functions_become_children_in_source_order() {
        let record = CoverageRecord::new("lib.rs", 20, 10)
            .with_function("parse", 10, 0)
            .with_function("emit", 3, 4);
        let (tree, _) = build_tree(&[input(vec![record], &["lib.rs"])]);
        let file = &tree.children[0].children[0];
        let names: Vec<&str> = file.children.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(names, vec!["parse", "emit"]);
        assert_eq!(
            file.children[1].kind,
            NodeKind::Function {
                line: 3,
                hit_count: 4
            }
        );
        assert_eq!(file.children[0].path, file.path);
        assert_eq!(file.total_lines(), Some(20));
    }

    #[test]
    fn missing_file_is_flagged_but_indexed() {
        let (tree, diagnostics) =
            build_tree(&[input(vec![CoverageRecord::new("gone.ts", 4, 1)], &[])]);
        let file = &tree.children[0].children[0];
        assert!(matches!(file.kind, NodeKind::File { exists: false, .. }));
        assert!(matches!(
            diagnostics.as_slice(),
            [IndexDiagnostic::MissingFile { .. }]
        ));
    }

    #[test]
    fn file_on_disk_exists_even_when_not_listed() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("generated")).unwrap();
        std::fs::write(temp.path().join("generated").join("api.ts"), b"export {}").unwrap();
        let coverage = RootCoverage {
            root: MonitoredRoot::from_path(temp.path()),
            thresholds: CoverageLevelThresholds::default(),
            records: vec![CoverageRecord::new("generated/api.ts", 4, 4)]
                .into_iter()
                .collect(),
            live_files: Vec::new(),
        };

        let (tree, diagnostics) = build_tree(&[coverage]);
        assert!(diagnostics.is_empty());
        let file = &tree.children[0].children[0].children[0];
        assert!(matches!(file.kind, NodeKind::File { exists: true, .. }));
    }

    #[test]
    fn file_used_as_folder_is_skipped() {
        let (tree, diagnostics) = build_tree(&[input(
            vec![
                CoverageRecord::new("src/a", 4, 4),
                CoverageRecord::new("src/a/b.ts", 6, 0),
                CoverageRecord::new("src/c.ts", 2, 1),
            ],
            &["src/a", "src/c.ts"],
        )]);

        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            &diagnostics[0],
            IndexDiagnostic::StructuralInconsistency { reported, .. } if reported == "src/a/b.ts"
        ));
        let src = &tree.children[0].children[0];
        assert_eq!(src.children.len(), 2);
        assert_eq!(tree.total_lines(), Some(6));
    }

    #[test]
    fn folder_at_terminal_segment_is_skipped() {
        let (tree, diagnostics) = build_tree(&[input(
            vec![
                CoverageRecord::new("src", 3, 3),
                CoverageRecord::new("src/x.ts", 5, 5),
            ],
            &["src/x.ts"],
        )]);
        // "src" sorts before "src/x.ts", so it becomes a file first.
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(tree.children[0].children.len(), 1);
        assert!(tree.children[0].children[0].is_file());
    }

    #[test]
    fn each_root_gets_its_own_folder() {
        let mut second = input(vec![CoverageRecord::new("main.go", 8, 8)], &[]);
        second.root = MonitoredRoot::new("api", "/api");
        second.live_files = vec![PathBuf::from("/api/main.go")];
        let first = input(vec![CoverageRecord::new("main.go", 2, 0)], &["main.go"]);

        let (tree, diagnostics) = build_tree(&[first, second]);
        assert!(diagnostics.is_empty());
        assert_eq!(tree.children.len(), 2);
        let per_root: u64 = tree.children.iter().filter_map(TreeNode::total_lines).sum();
        assert_eq!(tree.total_lines(), Some(per_root));
        assert_eq!(tree.total_lines(), Some(10));
    }

    #[test]
    fn empty_root_yields_empty_folder() {
        let (tree, diagnostics) = build_tree(&[input(Vec::new(), &[])]);
        assert!(diagnostics.is_empty());
        assert!(tree.children[0].children.is_empty());
        assert_eq!(tree.children[0].coverage_percent(), Some(100.0));
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let make = || {
            input(
                vec![
                    CoverageRecord::new("b/z.ts", 3, 1).with_function("z", 1, 1),
                    CoverageRecord::new("a/y.ts", 7, 7),
                    CoverageRecord::new("a/x.ts", 0, 0),
                ],
                &["b/z.ts", "a/y.ts", "a/x.ts"],
            )
        };
        let (first, _) = build_tree(&[make()]);
        let (second, _) = build_tree(&[make()]);
        assert_eq!(first, second);
        let order = |t: &TreeNode| {
            t.walk()
                .map(|n| (n.path.clone(), n.total_lines()))
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&first), order(&second));
    }
}
