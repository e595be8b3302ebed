use std::{fmt, path::Path, sync::Arc};

use bcp_process::CancellationToken;
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    command::CommandRunner,
    error::{BazelError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BazelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl BazelVersion {
    pub const MINIMUM: Self = Self::new(1, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `6.4.0`, `7.0.0rc2` or `6.4.0-homebrew`; missing components are zero.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().splitn(3, '.');
        let major = leading_number(parts.next()?)?;
        let minor = parts.next().and_then(leading_number).unwrap_or(0);
        let patch = parts.next().and_then(leading_number).unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }

    /// Find the `Build label:` line of `bazel version` output.
    pub fn from_version_output(stdout: &str) -> Option<Self> {
        stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix("Build label:"))
            .and_then(Self::parse)
    }
}

fn leading_number(text: &str) -> Option<u32> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

impl fmt::Display for BazelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "version")]
pub enum ToolVersion {
    Known(BazelVersion),
    /// Detection failed or has not finished; operations proceed anyway.
    Unknown,
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(version) => version.fmt(f),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Immutable view of the configured build tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSnapshot {
    pub executable: String,
    pub version: ToolVersion,
    generation: u64,
}

impl ToolSnapshot {
    /// Fails only when the version is known to be too old.
    pub fn check_supported(&self) -> Result<()> {
        match self.version {
            ToolVersion::Known(version) if version < BazelVersion::MINIMUM => {
                Err(BazelError::Config(format!(
                    "{} is version {version}, at least {} is required",
                    self.executable,
                    BazelVersion::MINIMUM
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Shared, copy-on-write tool state. Readers clone the current `Arc` and keep
/// a consistent snapshot even while a reconfiguration swaps in a new one.
#[derive(Debug)]
pub struct ToolState {
    current: RwLock<Arc<ToolSnapshot>>,
}

impl ToolState {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(Arc::new(ToolSnapshot {
                executable: executable.into(),
                version: ToolVersion::Unknown,
                generation: 0,
            })),
        }
    }

    pub fn snapshot(&self) -> Arc<ToolSnapshot> {
        self.current.read().clone()
    }

    /// Swap in a new executable with an unknown version. Returns the new snapshot.
    pub fn reconfigure(&self, executable: impl Into<String>) -> Arc<ToolSnapshot> {
        let mut current = self.current.write();
        let next = Arc::new(ToolSnapshot {
            executable: executable.into(),
            version: ToolVersion::Unknown,
            generation: current.generation + 1,
        });
        *current = next.clone();
        next
    }

    /// Record a detected version unless the tool was reconfigured meanwhile.
    pub fn record_version(&self, detected_for: &ToolSnapshot, version: ToolVersion) -> bool {
        let mut current = self.current.write();
        if current.generation != detected_for.generation {
            return false;
        }
        *current = Arc::new(ToolSnapshot {
            version,
            ..(**current).clone()
        });
        true
    }
}

/// Run `<executable> version`; any failure yields [`ToolVersion::Unknown`].
pub fn detect_version<R: CommandRunner + ?Sized>(
    runner: &R,
    root: &Path,
    executable: &str,
    cancel: &CancellationToken,
) -> ToolVersion {
    let output = match runner.run(root, executable, &["version"], cancel) {
        Ok(output) if output.success() => output,
        Ok(output) => {
            tracing::warn!(
                target = "bcp.bazel",
                executable,
                exit_code = output.exit_code,
                "`version` failed; continuing with unknown version"
            );
            return ToolVersion::Unknown;
        }
        Err(err) => {
            tracing::warn!(
                target = "bcp.bazel",
                executable,
                error = %err,
                "could not run `version`; continuing with unknown version"
            );
            return ToolVersion::Unknown;
        }
    };

    match BazelVersion::from_version_output(&output.stdout) {
        Some(version) => {
            tracing::info!(target = "bcp.bazel", executable, %version, "detected bazel version");
            ToolVersion::Known(version)
        }
        None => {
            tracing::warn!(
                target = "bcp.bazel",
                executable,
                "no `Build label:` line in version output"
            );
            ToolVersion::Unknown
        }
    }
}
