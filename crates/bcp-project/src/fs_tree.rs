use std::collections::BTreeMap;

/// A tree of relative paths, used to pick a small set of directories that
/// cover a scattered set of files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsTree {
    children: BTreeMap<String, FsTree>,
    is_file: bool,
}

impl FsTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a `/`-separated path. The last segment is marked as a file when `is_file`.
    pub fn add(&mut self, path: &str, is_file: bool) {
        let mut node = self;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.is_file = is_file;
    }

    pub fn child(&self, name: &str) -> Option<&FsTree> {
        self.children.get(name)
    }

    pub fn children_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_file(&self) -> bool {
        self.is_file
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// For each top-level entry, walk down while a directory has a single
    /// child and keep the first directory with several children. A lone file
    /// contributes its parent directory unless that parent is the root.
    pub fn meaningful_directories(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for (name, child) in &self.children {
            child.collect_meaningful(name.clone(), None, &mut paths);
        }
        paths
    }

    fn collect_meaningful(&self, path: String, parent: Option<&str>, paths: &mut Vec<String>) {
        match self.children.len() {
            0 => {
                if self.is_file {
                    if let Some(parent) = parent {
                        paths.push(parent.to_string());
                    }
                }
            }
            1 => {
                if let Some((name, child)) = self.children.iter().next() {
                    child.collect_meaningful(format!("{path}/{name}"), Some(path.as_str()), paths);
                }
            }
            _ => paths.push(path),
        }
    }
}
