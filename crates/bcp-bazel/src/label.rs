use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Target name matching every rule in a package.
pub const WILDCARD_ALL: &str = "all";
/// Target name matching every target (rules and files) in a package.
pub const WILDCARD_STAR: &str = "*";
/// Package suffix matching all packages beneath a directory.
pub const WILDCARD_RECURSIVE: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("label is empty")]
    Empty,
    #[error("label `{0}` must not end with `:` or `/`")]
    TrailingSeparator(String),
    #[error("label `{0}` must use forward slashes")]
    Backslash(String),
    #[error("label `{0}` is malformed: {1}")]
    Malformed(String, &'static str),
}

/// A Bazel label: `[@repo]//package/path[:target]`.
///
/// The package and target name are addressable independently. A label without
/// an explicit target names the package's default target (the rule named after
/// the last package segment); `...`, `*` and `all` make it a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label {
    repository: Option<String>,
    package: String,
    target: Option<String>,
}

impl Label {
    pub fn parse(text: &str) -> Result<Self, LabelError> {
        if text.is_empty() {
            return Err(LabelError::Empty);
        }
        if text.contains('\\') {
            return Err(LabelError::Backslash(text.to_string()));
        }
        if text.ends_with(':') || text.ends_with('/') {
            return Err(LabelError::TrailingSeparator(text.to_string()));
        }

        let (repository, rest) = match text.strip_prefix('@') {
            Some(after_at) => {
                let Some(slashes) = after_at.find("//") else {
                    return Err(LabelError::Malformed(
                        text.to_string(),
                        "external labels need `//` after the repository name",
                    ));
                };
                (Some(after_at[..slashes].to_string()), &after_at[slashes..])
            }
            None => (None, text),
        };

        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let (package, target) = match rest.split_once(':') {
            Some((package, target)) => (package, Some(target)),
            None => (rest, None),
        };

        if target.is_some_and(|target| target.contains(':')) {
            return Err(LabelError::Malformed(text.to_string(), "more than one `:`"));
        }
        if package.starts_with('/') || package.contains("//") {
            return Err(LabelError::Malformed(text.to_string(), "empty package segment"));
        }
        if package.is_empty() && target.is_none() && repository.is_none() {
            return Err(LabelError::Malformed(text.to_string(), "no package or target"));
        }

        Ok(Self {
            repository,
            package: package.to_string(),
            target: target.map(str::to_string),
        })
    }

    /// Label for the default target of `package` (no `:` part).
    pub fn for_package(package: &str) -> Result<Self, LabelError> {
        Self::parse(&format!("//{}", package.trim_matches('/')))
    }

    /// Repository name without the leading `@`, for external labels.
    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    pub fn is_external(&self) -> bool {
        self.repository.as_deref().is_some_and(|repo| !repo.is_empty())
    }

    /// Package path without `//`, the repository, or a trailing `/...`.
    pub fn package_path(&self) -> &str {
        if self.package == WILDCARD_RECURSIVE {
            return "";
        }
        self.package
            .strip_suffix("/...")
            .unwrap_or(&self.package)
    }

    /// Explicit target name, or the implied one when the label has no `:`.
    pub fn target_name(&self) -> &str {
        if let Some(target) = &self.target {
            return target;
        }
        if self.is_recursive() {
            return WILDCARD_RECURSIVE;
        }
        self.package.rsplit('/').next().unwrap_or_default()
    }

    pub fn has_explicit_target(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_recursive(&self) -> bool {
        self.package == WILDCARD_RECURSIVE || self.package.ends_with("/...")
    }

    /// `false` when the label is a wildcard (`...`, `:*`, `:all`).
    pub fn is_concrete(&self) -> bool {
        if self.is_recursive() {
            return false;
        }
        !matches!(
            self.target.as_deref(),
            Some(WILDCARD_ALL) | Some(WILDCARD_STAR) | Some("all-targets")
        )
    }

    /// The package of this label with no target, e.g. `//a/b` for `//a/b:c`.
    pub fn package_label(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            package: self.package_path().to_string(),
            target: None,
        }
    }

    pub fn with_target(&self, target: &str) -> Self {
        Self {
            repository: self.repository.clone(),
            package: self.package_path().to_string(),
            target: Some(target.to_string()),
        }
    }

    /// Directory of the package relative to the workspace (or the execution
    /// root for external repositories: `external/<repo>/<package>`).
    pub fn package_dir(&self) -> String {
        match self.repository.as_deref().filter(|repo| !repo.is_empty()) {
            Some(repo) if self.package_path().is_empty() => format!("external/{repo}"),
            Some(repo) => format!("external/{repo}/{}", self.package_path()),
            None => self.package_path().to_string(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(repo) = &self.repository {
            write!(f, "@{repo}")?;
        }
        write!(f, "//{}", self.package)?;
        if let Some(target) = &self.target {
            write!(f, ":{target}")?;
        }
        Ok(())
    }
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Label {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.to_string()
    }
}
