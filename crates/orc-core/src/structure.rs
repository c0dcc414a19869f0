use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sentinel returned by the Repository Gateway for binary files on read-back
/// (§4.5, §6). The Structurer passes it through verbatim; the UI renders a
/// placeholder instead of attempting to display the bytes.
pub fn binary_sentinel(path: &str) -> String {
    format!("[Binary file: {path}]")
}

/// Parse a Provider response naming one file path per line into a flat list
/// (§4.2, §4.5 Alignment phase). Tolerates common list markers (`-`, `*`,
/// `1.`) and surrounding markdown code fences; blank lines are skipped.
pub fn parse_file_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "```" && !line.starts_with("```"))
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start_matches(['-', '*']).trim_start();
    let digits_end = line.find(|c: char| !c.is_ascii_digit()).unwrap_or(0);
    if digits_end > 0 {
        if let Some(rest) = line[digits_end..].strip_prefix('.').or_else(|| line[digits_end..].strip_prefix(')')) {
            return rest.trim_start();
        }
    }
    line
}

/// Parse a Provider response into a structure snapshot (§4.2, §4.5).
pub fn parse_tree(text: &str) -> StructureSnapshot {
    StructureSnapshot::from_paths(parse_file_list(text))
}

/// A node in the authoritative file-tree view (§3). A `BTreeMap` is used
/// (rather than a `HashMap`) so that two snapshots built from the same set
/// of paths compare equal regardless of insertion order, and so that
/// serialized snapshots are stable for diffing and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StructureNode {
    /// A directory: further path segments mapping to further nodes.
    Dir(BTreeMap<String, StructureNode>),
    /// A leaf file marker. Carries no content — the snapshot only records
    /// shape; file bytes are fetched separately via `GET /file_content`.
    File,
}

/// The structure snapshot (§3): a nested mapping from path segment to leaf
/// or directory, mirroring the Repository Gateway's `tree()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureSnapshot {
    root: BTreeMap<String, StructureNode>,
}

impl StructureSnapshot {
    /// An empty tree.
    pub fn empty() -> Self {
        Self {
            root: BTreeMap::new(),
        }
    }

    /// Build a snapshot from a flat list of repo-relative file paths,
    /// splitting each on `/` to build the nested directory shape.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut snapshot = Self::empty();
        for path in paths {
            snapshot.insert_file(path.as_ref());
        }
        snapshot
    }

    /// Insert a file at the given repo-relative path, creating any missing
    /// intermediate directories.
    pub fn insert_file(&mut self, path: &str) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        insert_into(&mut self.root, &segments);
    }

    /// Whether `path` names a file (leaf) present in the snapshot. This is
    /// the check behind the invariant "every accepted subtask's filename has
    /// a corresponding leaf in the snapshot" (§3, §8).
    pub fn contains_file(&self, path: &str) -> bool {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        lookup(&self.root, &segments)
    }

    /// The root mapping, for serialization into `full_status_update`.
    pub fn root(&self) -> &BTreeMap<String, StructureNode> {
        &self.root
    }
}

impl Default for StructureSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

fn insert_into(map: &mut BTreeMap<String, StructureNode>, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert((*head).to_string(), StructureNode::File);
        return;
    }
    let entry = map
        .entry((*head).to_string())
        .or_insert_with(|| StructureNode::Dir(BTreeMap::new()));
    if let StructureNode::Dir(child) = entry {
        insert_into(child, rest);
    } else {
        // A file already occupies this segment; a directory was requested
        // under it. Replace it rather than silently dropping the insert.
        let mut child = BTreeMap::new();
        insert_into(&mut child, rest);
        *entry = StructureNode::Dir(child);
    }
}

fn lookup(map: &BTreeMap<String, StructureNode>, segments: &[&str]) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        return false;
    };
    match map.get(*head) {
        Some(StructureNode::File) => rest.is_empty(),
        Some(StructureNode::Dir(child)) => !rest.is_empty() && lookup(child, rest),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_contains_nothing() {
        let snap = StructureSnapshot::empty();
        assert!(!snap.contains_file("add.py"));
    }

    #[test]
    fn inserting_a_nested_path_creates_intermediate_directories() {
        let mut snap = StructureSnapshot::empty();
        snap.insert_file("src/lib/add.py");
        assert!(snap.contains_file("src/lib/add.py"));
        assert!(!snap.contains_file("src/lib"));
        assert!(!snap.contains_file("src"));
    }

    #[test]
    fn from_paths_and_order_independence() {
        let a = StructureSnapshot::from_paths(["a.py", "b.py"]);
        let b = StructureSnapshot::from_paths(["b.py", "a.py"]);
        assert_eq!(a, b);
    }

    #[test]
    fn binary_sentinel_carries_the_path() {
        assert_eq!(binary_sentinel("logo.png"), "[Binary file: logo.png]");
    }

    #[test]
    fn parse_file_list_strips_bullets_numbering_and_fences() {
        let text = "```\n- add.py\n* src/lib.py\n1. README.md\n2) docs/guide.md\n\n```";
        assert_eq!(
            parse_file_list(text),
            vec![
                "add.py".to_string(),
                "src/lib.py".to_string(),
                "README.md".to_string(),
                "docs/guide.md".to_string(),
            ]
        );
    }

    #[test]
    fn parse_file_list_passes_through_bare_paths() {
        assert_eq!(parse_file_list("add.py\nb.py"), vec!["add.py".to_string(), "b.py".to_string()]);
    }

    #[test]
    fn parse_tree_builds_a_snapshot_from_a_bulleted_list() {
        let tree = parse_tree("- a.py\n- b.py");
        assert!(tree.contains_file("a.py"));
        assert!(tree.contains_file("b.py"));
    }
}
