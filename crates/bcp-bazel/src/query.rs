//! Parsers for `bazel query` output.
//!
//! Plain label listings (`--output=label`, `--output=label_kind`) are used for
//! simple lookups. Anything that needs rule attributes uses
//! `--output=streamed_jsonproto`, which prints one JSON-encoded `Target`
//! message per line.

use serde::{Deserialize, Serialize};

use crate::label::Label;

/// `--output=label`: one label per line. Unparseable lines are skipped.
pub fn parse_label_output(stdout: &str) -> Vec<Label> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match Label::parse(line) {
            Ok(label) => Some(label),
            Err(err) => {
                tracing::debug!(target = "bcp.bazel", line, error = %err, "skipping query line");
                None
            }
        })
        .collect()
}

/// `--output=label_kind`: `java_library rule //a:b`, `source file //a:B.java`.
pub fn parse_label_kind_output(stdout: &str) -> Vec<(String, Label)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (kind, label) = line.trim().rsplit_once(' ')?;
            let kind = kind.strip_suffix(" rule").unwrap_or(kind);
            Some((kind.to_string(), Label::parse(label).ok()?))
        })
        .collect()
}

/// Workspace source files named by `kind('source file', deps(//pkg:*))`,
/// as paths relative to the queried package.
///
/// Only `//`-rooted results belong to the workspace; results from other
/// packages are kept (the caller filters by existence on disk) but BUILD
/// files are dropped.
pub fn parse_source_file_output(stdout: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for line in stdout.lines().map(str::trim) {
        if !line.starts_with("//") {
            continue;
        }
        let Some((_, path)) = line.split_once(':') else {
            continue;
        };
        if is_build_file(path) || paths.iter().any(|seen| seen == path) {
            continue;
        }
        paths.push(path.to_string());
    }
    paths
}

pub fn is_build_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    matches!(name, "BUILD" | "BUILD.bazel")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QueryTarget {
    Rule(QueryRule),
    SourceFile { name: Label },
    GeneratedFile { name: Label, generating_rule: Label },
    /// Package groups, environment groups and anything newer.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRule {
    pub name: Label,
    pub rule_class: String,
    pub attributes: Vec<QueryAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAttribute {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub string_list_value: Vec<String>,
    #[serde(default)]
    pub boolean_value: Option<bool>,
    #[serde(default)]
    pub int_value: Option<i64>,
}

impl QueryRule {
    pub fn attribute(&self, name: &str) -> Option<&QueryAttribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    /// Label/string attribute value (e.g. `srcjar`).
    pub fn string_attr(&self, name: &str) -> Option<&str> {
        self.attribute(name)
            .and_then(|attr| attr.string_value.as_deref())
            .filter(|value| !value.is_empty())
    }

    /// Label-list/string-list attribute value (e.g. `jars`, `tags`).
    pub fn string_list_attr(&self, name: &str) -> &[String] {
        self.attribute(name)
            .map(|attr| attr.string_list_value.as_slice())
            .unwrap_or_default()
    }

    /// Boolean attribute; Bazel encodes these as `intValue` in older releases.
    pub fn bool_attr(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|attr| {
            attr.boolean_value
                .unwrap_or_else(|| attr.int_value.is_some_and(|v| v != 0))
        })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.string_list_attr("tags").iter().any(|t| t == tag)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTarget {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    rule: Option<RawRule>,
    #[serde(default)]
    source_file: Option<RawFile>,
    #[serde(default)]
    generated_file: Option<RawFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
    name: String,
    rule_class: String,
    #[serde(default)]
    attribute: Vec<QueryAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFile {
    name: String,
    #[serde(default)]
    generating_rule: Option<String>,
}

fn convert(raw: RawTarget) -> Option<QueryTarget> {
    match raw.kind.as_str() {
        "RULE" => {
            let rule = raw.rule?;
            Some(QueryTarget::Rule(QueryRule {
                name: Label::parse(&rule.name).ok()?,
                rule_class: rule.rule_class,
                attributes: rule.attribute,
            }))
        }
        "SOURCE_FILE" => Some(QueryTarget::SourceFile {
            name: Label::parse(&raw.source_file?.name).ok()?,
        }),
        "GENERATED_FILE" => {
            let file = raw.generated_file?;
            Some(QueryTarget::GeneratedFile {
                name: Label::parse(&file.name).ok()?,
                generating_rule: Label::parse(file.generating_rule.as_deref()?).ok()?,
            })
        }
        _ => Some(QueryTarget::Other),
    }
}

/// Parse `--output=streamed_jsonproto`. Malformed lines are logged and skipped.
pub fn parse_streamed_jsonproto(stdout: &str) -> Vec<QueryTarget> {
    let mut targets = Vec::new();
    for (index, line) in stdout.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<RawTarget>(line)
            .map_err(|err| err.to_string())
            .and_then(|raw| convert(raw).ok_or_else(|| "incomplete target".to_string()));
        match parsed {
            Ok(target) => targets.push(target),
            Err(error) => {
                tracing::warn!(target = "bcp.bazel", line = index + 1, %error, "skipping malformed query result");
            }
        }
    }
    targets
}

/// Just the rules of a structured query result.
pub fn rules(targets: Vec<QueryTarget>) -> impl Iterator<Item = QueryRule> {
    targets.into_iter().filter_map(|target| match target {
        QueryTarget::Rule(rule) => Some(rule),
        _ => None,
    })
}
