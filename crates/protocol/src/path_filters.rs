use crate::ProtocolError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Normalizes a path reported by a coverage tool: `/` separators, no leading `./` or `/`.
pub fn normalize_reported_path(raw: &str) -> String {
    let mut value = raw.trim().replace('\\', "/");
    while let Some(rest) = value.strip_prefix("./") {
        value = rest.to_string();
    }
    value.trim_start_matches('/').to_string()
}

/// Non-empty path segments, ignoring `.` components.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect()
}

/// `path` relative to `root`, with `/` separators.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            std::path::Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Glob filter selecting the coverage files of a root.
#[derive(Debug, Clone)]
pub struct CoverageFileFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl CoverageFileFilter {
    pub fn new(patterns: &[String]) -> Result<Self, ProtocolError> {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let normalized = normalize_reported_path(pattern);
            if normalized.is_empty() {
                continue;
            }
            let glob = Glob::new(&normalized).map_err(|err| ProtocolError::InvalidPattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
            builder.add(glob);
            kept.push(normalized);
        }
        let set = builder.build().map_err(|err| ProtocolError::InvalidPattern {
            pattern: kept.join(","),
            message: err.to_string(),
        })?;
        Ok(Self {
            patterns: kept,
            set,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Matches an absolute path that lives under `root`.
    pub fn matches(&self, root: &Path, path: &Path) -> bool {
        relative_slash_path(root, path).is_some_and(|rel| self.set.is_match(rel))
    }
}
