//! Bazel layer of the classpath resolver.
//!
//! Everything that talks to the `bazel` binary or parses what it writes:
//! - labels and wildcard handling
//! - the command runner seam, version detection and `--announce_rc` options
//! - aspect JSON (`*.bzljavasdk-data.json`) and structured query output
//! - test-runner params files and the generational lookup cache

mod aspect;
mod cache;
mod command;
mod error;
mod label;
mod options;
mod params;
mod query;
mod test_classpath;
mod version;
mod workspace;

pub use bcp_process::CancellationToken;

pub use crate::{
    aspect::{
        aspect_file_location, aspect_files_from_stderr, label_from_aspect_path,
        parse_aspect_file, parse_aspect_json, AspectIndex, JarSet, TargetInfo,
        ASPECT_BATCH_SIZE, ASPECT_FILE_SUFFIX, DEFAULT_ASPECT_LABEL,
    },
    cache::{CacheKey, ParamFileCache, DEFAULT_PARAMS_CACHE_TTL},
    command::{CommandError, CommandOutput, CommandRunner, DefaultCommandRunner, ExecutorOptions},
    error::{check_cancelled, BazelError, Result},
    label::{Label, LabelError, WILDCARD_ALL, WILDCARD_RECURSIVE, WILDCARD_STAR},
    options::CommandOptions,
    params::{
        aggregate_jar_files, parse_params_file, parse_params_path, ParamFileResult, ParamsKind,
        BINARY_PARAMS_SUFFIX, SOURCE_PARAMS_SUFFIX,
    },
    query::{
        is_build_file, parse_label_kind_output, parse_label_output, parse_source_file_output,
        parse_streamed_jsonproto, rules, QueryAttribute, QueryRule, QueryTarget,
    },
    version::{detect_version, BazelVersion, ToolSnapshot, ToolState, ToolVersion},
    workspace::{
        bazel_workspace_root, is_bazel_workspace, AspectOptions, BazelInfo, BazelWorkspace,
    },
};
