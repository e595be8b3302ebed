//! Test-runner params files (`<rule>_deploy.jar-0.params`).
//!
//! Bazel writes these next to a test's deploy jar. Lines after `--output` or
//! `--sources` list classpath jars as `<jar-path>,<label>` until the next
//! `--` marker.

use std::{
    collections::{BTreeSet, HashSet},
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use serde::Serialize;

pub const BINARY_PARAMS_SUFFIX: &str = "_deploy.jar-0.params";
pub const SOURCE_PARAMS_SUFFIX: &str = "_deploy-src.jar-0.params";
const DEPLOY_JAR_SUFFIX: &str = "_deploy.jar";

/// Which classpath a params file describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamsKind {
    Binary,
    Source,
}

impl ParamsKind {
    pub fn from_is_source(is_source: bool) -> Self {
        if is_source {
            Self::Source
        } else {
            Self::Binary
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Binary => BINARY_PARAMS_SUFFIX,
            Self::Source => SOURCE_PARAMS_SUFFIX,
        }
    }

    pub fn file_name(self, rule_name: &str) -> String {
        format!("{rule_name}{}", self.suffix())
    }
}

/// Params files found for a set of test targets, plus the labels whose
/// params file does not exist (not built, or not a runnable test).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParamFileResult {
    pub params_files: Vec<PathBuf>,
    pub unrunnable: BTreeSet<String>,
}

/// Parse one params file into its jar paths, in file order.
pub fn parse_params_file(reader: impl BufRead) -> io::Result<Vec<String>> {
    let mut jars = Vec::new();
    let mut capturing = false;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();

        let candidate = if let Some(marker) = line.strip_prefix("--") {
            let (name, rest) = marker.split_once(char::is_whitespace).unwrap_or((marker, ""));
            capturing = matches!(name, "output" | "sources");
            rest.trim()
        } else {
            line
        };

        if !capturing || candidate.is_empty() {
            continue;
        }
        let path = candidate.split(',').next().unwrap_or_default().trim();
        if path.ends_with(".jar") {
            jars.push(path.to_string());
        }
    }

    Ok(jars)
}

pub fn parse_params_path(path: &Path) -> io::Result<Vec<String>> {
    parse_params_file(BufReader::new(File::open(path)?))
}

/// Combine the jars of several params files, dropping duplicates while
/// keeping first-seen order.
///
/// With `include_deploy_jars == false`, `*_deploy.jar` aggregates are left
/// out. Unreadable files are logged and skipped.
pub fn aggregate_jar_files(files: &[PathBuf], include_deploy_jars: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut jars = Vec::new();
    for file in files {
        let parsed = match parse_params_path(file) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(target = "bcp.bazel", path = %file.display(), error = %err, "skipping unreadable params file");
                continue;
            }
        };
        for jar in parsed {
            if !include_deploy_jars && jar.ends_with(DEPLOY_JAR_SUFFIX) {
                continue;
            }
            if seen.insert(jar.clone()) {
                jars.push(jar);
            }
        }
    }
    jars
}
