use std::{io, path::Path, time::Duration};

use bcp_process::{
    run_command, CancellationToken, CommandSpec, RunOptions, ShellError, ShellWrapper,
};
use thiserror::Error;

/// Output of one finished build-tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }

    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr.lines()
    }

    /// Turn a non-zero exit into [`CommandError::Failed`].
    pub fn check(self, program: &str, args: &[&str]) -> Result<Self, CommandError> {
        if self.success() {
            return Ok(self);
        }
        Err(CommandError::Failed {
            command: render_command(program, args),
            exit_code: self.exit_code,
            stderr: self.stderr,
        })
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// The binary could not be started at all.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with code {exit_code}:\n{stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("`{command}` timed out after {}ms", timeout.as_millis())]
    TimedOut { command: String, timeout: Duration },
    #[error("command was cancelled")]
    Cancelled,
    #[error(transparent)]
    Shell(#[from] ShellError),
}

/// Runs the build tool. Implemented by [`DefaultCommandRunner`] and by fakes in tests.
///
/// A non-zero exit is *not* an error at this level: aspect builds run with
/// `-k` and still produce usable output. Callers use [`CommandOutput::check`].
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<R> {
    fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        (**self).run(cwd, program, args, cancel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Run through the user's login shell (never on Windows).
    pub shell_wrapping: bool,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub max_output_bytes: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            shell_wrapping: !cfg!(windows),
            // Slow external downloads otherwise hit Bazel's default fetch timeout.
            env: vec![("PULLER_TIMEOUT".to_string(), "3000".to_string())],
            timeout: None,
            max_output_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DefaultCommandRunner {
    options: ExecutorOptions,
    shell: Option<ShellWrapper>,
}

impl DefaultCommandRunner {
    /// Build a runner, detecting the login shell when wrapping is enabled.
    pub fn new(options: ExecutorOptions) -> Result<Self, CommandError> {
        let shell = if options.shell_wrapping {
            ShellWrapper::detect()?
        } else {
            None
        };
        Ok(Self { options, shell })
    }

    /// Runs the binary directly, without a login shell.
    pub fn direct(options: ExecutorOptions) -> Self {
        Self {
            options: ExecutorOptions {
                shell_wrapping: false,
                ..options
            },
            shell: None,
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }
}

impl CommandRunner for DefaultCommandRunner {
    fn run(
        &self,
        cwd: &Path,
        program: &str,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }

        let owned_args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let mut spec =
            CommandSpec::new(cwd, program, &owned_args).with_env(self.options.env.iter().cloned());
        if let Some(shell) = &self.shell {
            spec = shell.wrap(&spec);
        }

        let opts = RunOptions {
            timeout: self.options.timeout,
            max_bytes: self.options.max_output_bytes,
            cancellation: Some(cancel.clone()),
            ..RunOptions::default()
        };

        let result = run_command(&spec, &opts).map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if result.cancelled {
            return Err(CommandError::Cancelled);
        }
        if result.timed_out {
            return Err(CommandError::TimedOut {
                command: render_command(program, args),
                timeout: self.options.timeout.unwrap_or_default(),
            });
        }

        let exit_code = result.exit_code();
        // Shells report a missing binary as 127 instead of failing to spawn.
        if self.shell.is_some() && exit_code == 127 {
            return Err(CommandError::Spawn {
                program: program.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, result.output.stderr.trim().to_string()),
            });
        }

        Ok(CommandOutput {
            exit_code,
            stdout: result.output.stdout,
            stderr: result.output.stderr,
        })
    }
}

fn render_command(program: &str, args: &[&str]) -> String {
    let mut out = program.to_string();
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}
