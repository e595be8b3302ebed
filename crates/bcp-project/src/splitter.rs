//! Splitting a source file path into its source root and the
//! package-relative file path (`src/main/java` + `demo/Foo.java`).

use std::{collections::HashMap, fs, path::Path, sync::Arc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSourcePath {
    /// e.g. `source/java`
    pub source_dir: String,
    /// e.g. `com/example/foo/Foo.java`
    pub file_path: String,
}

/// Split `relative_path` at the directory matching `package_path`.
///
/// `package_path` uses `/` separators and is empty for the default package.
/// Returns `None` when the file sits directly in the package root or its
/// directory does not end with the package path.
pub fn split_namespaced_path(relative_path: &str, package_path: &str) -> Option<SplitSourcePath> {
    let relative_path = relative_path.trim_matches('/');
    let (dir, _) = relative_path.rsplit_once('/')?;

    let source_dir = if package_path.is_empty() {
        dir
    } else if dir == package_path {
        ""
    } else {
        dir.strip_suffix(package_path)?.strip_suffix('/')?
    };

    let file_path = relative_path[source_dir.len()..].trim_start_matches('/');
    Some(SplitSourcePath {
        source_dir: source_dir.to_string(),
        file_path: file_path.to_string(),
    })
}

pub trait SourcePathSplitter: Send + Sync {
    /// File extensions handled, without the dot.
    fn extensions(&self) -> &[&'static str];

    /// Split `path` (relative to `package_dir`); `None` when it cannot be classified.
    fn split(&self, package_dir: &Path, path: &str) -> Option<SplitSourcePath>;
}

/// Reads the `package` declaration of a Java file.
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaSourcePathSplitter;

impl SourcePathSplitter for JavaSourcePathSplitter {
    fn extensions(&self) -> &[&'static str] {
        &["java"]
    }

    fn split(&self, package_dir: &Path, path: &str) -> Option<SplitSourcePath> {
        let text = match fs::read_to_string(package_dir.join(path)) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(target = "bcp.project", path, error = %err, "cannot read source file");
                return None;
            }
        };
        let package = java_package_name(&text).unwrap_or_default();
        split_namespaced_path(path, &package.replace('.', "/"))
    }
}

/// The package named by the first `package` statement, ignoring comments
/// and annotations. `None` for the default package.
pub fn java_package_name(source: &str) -> Option<String> {
    let stripped = strip_comments(source);
    let mut rest = stripped.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix('@') {
            rest = skip_annotation(after).trim_start();
            continue;
        }
        let after = rest.strip_prefix("package")?;
        if !after.starts_with(|c: char| c.is_whitespace()) {
            return None;
        }
        let (name, _) = after.split_once(';')?;
        let name: String = name.chars().filter(|c| !c.is_whitespace()).collect();
        return (!name.is_empty()).then_some(name);
    }
}

fn skip_annotation(text: &str) -> &str {
    let end = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(text.len());
    let rest = &text[end..];
    let trimmed = rest.trim_start();
    if !trimmed.starts_with('(') {
        return rest;
    }
    let mut depth = 0usize;
    for (index, c) in trimmed.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &trimmed[index + 1..];
                }
            }
            _ => {}
        }
    }
    ""
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for c in chars.by_ref() {
                    if previous == '*' && c == '/' {
                        break;
                    }
                    previous = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Splitters keyed by file extension.
#[derive(Clone)]
pub struct SplitterRegistry {
    by_extension: HashMap<String, Arc<dyn SourcePathSplitter>>,
}

impl std::fmt::Debug for SplitterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut extensions: Vec<_> = self.by_extension.keys().collect();
        extensions.sort();
        f.debug_struct("SplitterRegistry")
            .field("extensions", &extensions)
            .finish()
    }
}

impl Default for SplitterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JavaSourcePathSplitter));
        registry
    }
}

impl SplitterRegistry {
    pub fn empty() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    pub fn register(&mut self, splitter: Arc<dyn SourcePathSplitter>) {
        for extension in splitter.extensions() {
            self.by_extension
                .insert((*extension).to_string(), splitter.clone());
        }
    }

    pub fn splitter_for(&self, path: &str) -> Option<&dyn SourcePathSplitter> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let (_, extension) = file_name.rsplit_once('.')?;
        self.by_extension.get(extension).map(|splitter| &**splitter)
    }

    pub fn has_source_extension(&self, path: &str) -> bool {
        self.splitter_for(path).is_some()
    }
}
