//! Source layout of Bazel packages.
//!
//! A package's layout is resolved by an ordered list of strategies; the
//! cheap Maven-convention check runs first and the query-based strategy,
//! which handles arbitrary layouts, runs last.

use std::path::PathBuf;

use bcp_bazel::{BazelError, LabelError};
use serde::Serialize;
use thiserror::Error;

mod fs_tree;
mod maven;
mod query;
mod splitter;
mod strategy;

pub use crate::{
    fs_tree::FsTree,
    maven::MavenStructureStrategy,
    query::{QueryStructureStrategy, DEFAULT_TEST_FOLDER_MARKERS},
    splitter::{
        java_package_name, split_namespaced_path, JavaSourcePathSplitter, SourcePathSplitter,
        SplitSourcePath, SplitterRegistry,
    },
    strategy::{PackageLocation, ProjectStructureStrategy, SourceFileQuery, StrategyRegistry},
};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Bazel(#[from] BazelError),
    #[error("invalid package: {0}")]
    Label(#[from] LabelError),
}

impl ProjectError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Bazel(err) if err.is_cancelled())
    }
}

/// Source roots of one package, as workspace-relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectStructure {
    pub project_path: PathBuf,
    pub main_source_dirs: Vec<String>,
    pub test_source_dirs: Vec<String>,
}

impl ProjectStructure {
    pub fn new(project_path: PathBuf) -> Self {
        Self {
            project_path,
            ..Self::default()
        }
    }

    /// Overlay `newer`: each of its non-empty root lists replaces ours.
    pub fn merge(&mut self, newer: ProjectStructure) {
        if !newer.main_source_dirs.is_empty() {
            self.main_source_dirs = newer.main_source_dirs;
        }
        if !newer.test_source_dirs.is_empty() {
            self.test_source_dirs = newer.test_source_dirs;
        }
    }

    /// Main roots first, then test roots.
    pub fn source_dirs(&self) -> impl Iterator<Item = &str> {
        self.main_source_dirs
            .iter()
            .chain(&self.test_source_dirs)
            .map(String::as_str)
    }
}

impl StrategyRegistry {
    /// Maven layout check (optional) followed by the query strategy.
    pub fn standard(test_folder_markers: Vec<String>, maven: bool) -> Self {
        let mut registry = Self::new(Some(Box::new(QueryStructureStrategy::new(test_folder_markers))));
        registry.register(Box::new(MavenStructureStrategy));
        if !maven {
            registry.set_enabled("maven", false);
        }
        registry
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::standard(
            DEFAULT_TEST_FOLDER_MARKERS.iter().map(|m| m.to_string()).collect(),
            true,
        )
    }
}
