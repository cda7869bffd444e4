//! Matches coverage-reported paths against the files that actually exist in a root.

use crate::report::IndexDiagnostic;
use covtree_protocol::path_filters::{normalize_reported_path, relative_slash_path};
use covtree_protocol::{CoverageRecordSet, MonitoredRoot};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub records: CoverageRecordSet,
    pub diagnostics: Vec<IndexDiagnostic>,
}

/// Rewrites every record whose reported path is a suffix of exactly one live file
/// to that file's root-relative path. Other records keep their path and produce a diagnostic.
/// When several records resolve to the same path, the last one in key order is kept.
pub fn reconcile_paths(
    root: &MonitoredRoot,
    records: &CoverageRecordSet,
    live_files: &[PathBuf],
) -> Reconciliation {
    let mut out = CoverageRecordSet::new();
    let mut diagnostics = Vec::new();
    let mut reported_as: HashMap<String, String> = HashMap::new();

    for record in records.records() {
        let reported = normalize_reported_path(&record.file_path);
        let matches: Vec<&PathBuf> = if reported.is_empty() {
            Vec::new()
        } else {
            live_files
                .iter()
                .filter(|file| path_ends_with(file, &reported))
                .collect()
        };

        let reported_from = record.file_path.clone();
        let mut record = record.clone();
        match matches.as_slice() {
            [only] => match relative_slash_path(&root.path, only) {
                Some(matched) => {
                    if record.file_path != matched {
                        debug!(
                            "Replacing coverage path {} by {matched}",
                            record.file_path
                        );
                        record.file_path = matched;
                    }
                }
                None => {
                    warn!(
                        "{} matched {} outside of root {}",
                        record.file_path,
                        only.display(),
                        root.path.display()
                    );
                    diagnostics.push(IndexDiagnostic::UnmatchedPath {
                        root: root.name.clone(),
                        reported: record.file_path.clone(),
                    });
                }
            },
            [] => {
                warn!(
                    "No file in {} ends with {}",
                    root.name, record.file_path
                );
                diagnostics.push(IndexDiagnostic::UnmatchedPath {
                    root: root.name.clone(),
                    reported: record.file_path.clone(),
                });
            }
            many => {
                warn!(
                    "{} is ambiguous: {} files match",
                    record.file_path,
                    many.len()
                );
                diagnostics.push(IndexDiagnostic::AmbiguousPath {
                    root: root.name.clone(),
                    reported: record.file_path.clone(),
                    candidates: many.iter().map(|p| p.display().to_string()).collect(),
                });
            }
        }
        let path = record.file_path.clone();
        let previous = reported_as.insert(path.clone(), reported_from.clone());
        if out.insert(record).is_some() {
            let dropped = previous.unwrap_or_default();
            warn!("{dropped} and {reported_from} both resolve to {path}; keeping {reported_from}");
            diagnostics.push(IndexDiagnostic::PathCollision {
                root: root.name.clone(),
                path,
                kept: reported_from,
                dropped,
            });
        }
    }

    Reconciliation {
        records: out,
        diagnostics,
    }
}

/// Component-wise suffix test, so `a.ts` does not match `ba.ts`.
fn path_ends_with(file: &Path, suffix: &str) -> bool {
    let normalized = file.to_string_lossy().replace('\\', "/");
    Path::new(&normalized).ends_with(Path::new(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use covtree_protocol::CoverageRecord;
    use pretty_assertions::assert_eq;

    fn root() -> MonitoredRoot {
        MonitoredRoot::new("root", "/root")
    }

    fn set(paths: &[&str]) -> CoverageRecordSet {
        paths
            .iter()
            .map(|p| CoverageRecord::new(*p, 10, 5))
            .collect()
    }

    #[test]
    fn ambiguous_suffix_keeps_reported_path() {
        let files = vec![
            PathBuf::from("/root/src/a.ts"),
            PathBuf::from("/root/src/b/a.ts"),
        ];
        let out = reconcile_paths(&root(), &set(&["a.ts"]), &files);

        assert!(out.records.get("a.ts").is_some());
        assert_eq!(out.diagnostics.len(), 1);
        assert!(matches!(
            &out.diagnostics[0],
            IndexDiagnostic::AmbiguousPath { candidates, .. } if candidates.len() == 2
        ));
    }

    #[test]
    fn unique_suffix_is_resolved() {
        let files = vec![PathBuf::from("/root/src/a.ts")];
        let out = reconcile_paths(&root(), &set(&["src/a.ts"]), &files);
        assert!(out.diagnostics.is_empty());
        assert_eq!(
            out.records.get("src/a.ts").map(|r| r.file_path.as_str()),
            Some("src/a.ts")
        );
    }

    #[test]
    fn truncated_path_is_expanded_to_root_relative() {
        let files = vec![
            PathBuf::from("/root/packages/web/src/app.ts"),
            PathBuf::from("/root/packages/web/src/main.ts"),
        ];
        let out = reconcile_paths(&root(), &set(&["src\\app.ts"]), &files);
        assert!(out.diagnostics.is_empty());
        let record = out.records.get("packages/web/src/app.ts").unwrap();
        assert_eq!(record.file_path, "packages/web/src/app.ts");
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn missing_file_is_reported_and_kept() {
        let files = vec![PathBuf::from("/root/src/a.ts")];
        let out = reconcile_paths(&root(), &set(&["lib/gone.ts"]), &files);
        assert_eq!(
            out.diagnostics,
            vec![IndexDiagnostic::UnmatchedPath {
                root: "root".to_string(),
                reported: "lib/gone.ts".to_string(),
            }]
        );
        assert!(out.records.get("lib/gone.ts").is_some());
    }

    #[test]
    fn suffix_match_respects_component_boundaries() {
        let files = vec![
            PathBuf::from("/root/src/ba.ts"),
            PathBuf::from("/root/src/a.ts"),
        ];
        let out = reconcile_paths(&root(), &set(&["a.ts"]), &files);
        assert!(out.diagnostics.is_empty());
        assert!(out.records.get("src/a.ts").is_some());
    }

    #[test]
    fn paths_resolving_to_one_file_are_reported() {
        let files = vec![PathBuf::from("/root/src/a.ts")];
        let records: CoverageRecordSet = vec![
            CoverageRecord::new("a.ts", 10, 1),
            CoverageRecord::new("src/a.ts", 10, 9),
        ]
        .into_iter()
        .collect();
        let out = reconcile_paths(&root(), &records, &files);

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records.get("src/a.ts").map(|r| r.lines_hit), Some(9));
        assert_eq!(
            out.diagnostics,
            vec![IndexDiagnostic::PathCollision {
                root: "root".to_string(),
                path: "src/a.ts".to_string(),
                kept: "src/a.ts".to_string(),
                dropped: "a.ts".to_string(),
            }]
        );
    }

    #[test]
    fn match_outside_root_is_reported() {
        let files = vec![PathBuf::from("/elsewhere/lib/a.ts")];
        let out = reconcile_paths(&root(), &set(&["lib/a.ts"]), &files);
        assert_eq!(
            out.diagnostics,
            vec![IndexDiagnostic::UnmatchedPath {
                root: "root".to_string(),
                reported: "lib/a.ts".to_string(),
            }]
        );
        assert!(out.records.get("lib/a.ts").is_some());
    }

    #[test]
    fn input_is_left_untouched() {
        let files = vec![PathBuf::from("/root/src/a.ts")];
        let input = set(&["a.ts"]);
        let before = input.clone();
        let out = reconcile_paths(&root(), &input, &files);
        assert_eq!(input, before);
        assert_ne!(out.records, input);
    }
}
