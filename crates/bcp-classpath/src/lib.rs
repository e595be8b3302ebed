//! Java classpaths for IDE projects backed by Bazel targets.
//!
//! A project's classpath is assembled from the aspect output of its targets:
//! dependencies whose sources belong to another project become project
//! entries, everything else contributes its jars. Jars of external
//! repositories and generated jars are discovered separately through
//! `bazel query`.

use bcp_bazel::BazelError;
use thiserror::Error;

mod assembly;
mod discovery;
mod engine;
mod entry;
mod external;
mod generated;
mod implicit;
mod projects;

pub use crate::{
    assembly::ClasspathAssembler,
    engine::{ClasspathEngine, AD_HOC_PROJECT},
    entry::{
        label_file_path, ClasspathEntry, ClasspathResult, JarResolver, LibraryEntry,
        MissingArtifacts, ProjectEntry,
    },
    external::{
        external_repositories, ExternalLibrariesDiscovery, COURSIER_REPOSITORY_RULES,
        JAVA_IMPORT_REPOSITORY_RULES, NO_IDE_TAG, UNPINNED_PREFIX,
    },
    generated::{
        group_by_generating_rule, is_potential_source_jar, GeneratedLibrariesDiscovery,
        GENERATED_JARS_QUERY,
    },
    implicit::{BazelToolsTestRunner, ImplicitDependencies, NoImplicitDependencies},
    projects::{ProjectDefinition, ProjectIndex, SourceRoot},
};

#[derive(Debug, Error)]
pub enum ClasspathError {
    #[error(transparent)]
    Bazel(#[from] BazelError),
    #[error("invalid glob {pattern:?}: {message}")]
    InvalidGlob { pattern: String, message: String },
    #[error("unknown project `{0}`")]
    UnknownProject(String),
}

impl ClasspathError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Bazel(err) if err.is_cancelled())
    }
}
