//! Bounded execution of external build-tool commands.
//!
//! Bazel can print a lot of output and can hang on slow external downloads.
//! Commands run here capture at most a fixed number of bytes per stream, read
//! stdout and stderr on two reader threads while the invoking thread waits for
//! exit, and can be stopped by a wall-clock timeout or a [`CancellationToken`].

mod shell;

use std::{
    fmt,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;

pub use shell::{detect_login_shell, quote_for_shell, LoginShell, ShellError, ShellWrapper};
pub use tokio_util::sync::CancellationToken;

/// Captured stdout/stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream produced more bytes than were kept.
    pub truncated: bool,
}

impl BoundedOutput {
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }

    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr.lines()
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Kill the process tree if it is still running after this long.
    pub timeout: Option<Duration>,
    /// Maximum bytes kept per stream.
    pub max_bytes: usize,
    pub cancellation: Option<CancellationToken>,
    /// Wait between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    /// How often the cancellation token and timeout are checked.
    pub poll_interval: Duration,
    /// Upper bound on waiting for the reader threads after the process exited.
    pub reader_join_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_bytes: 16 * 1024 * 1024,
            cancellation: None,
            kill_grace: Duration::from_millis(250),
            poll_interval: Duration::from_millis(500),
            reader_join_timeout: Duration::from_secs(60),
        }
    }
}

/// Working directory, program, arguments and extra environment of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(cwd: &Path, program: impl Into<PathBuf>, args: &[String]) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            program: program.into(),
            args: args.to_vec(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", quote_for_shell(arg))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub output: BoundedOutput,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl CommandResult {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// A command that ran to completion but did not succeed.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub command: CommandSpec,
    pub status: ExitStatus,
    pub output: BoundedOutput,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cancelled {
            write!(f, "`{}` was cancelled", self.command)?;
        } else if self.timed_out {
            write!(f, "`{}` timed out", self.command)?;
        } else {
            write!(f, "`{}` exited with {}", self.command, self.status)?;
        }
        let stderr = self.output.stderr.trim_end();
        if !stderr.is_empty() {
            write!(f, "\nstderr:\n{stderr}")?;
        }
        if self.output.truncated {
            write!(f, "\n(output truncated)")?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandFailure {}

#[derive(Debug, Error)]
pub enum RunCommandError {
    /// The process could not be started (missing binary, permissions, bad cwd).
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: CommandSpec,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Failed(Box<CommandFailure>),
}

/// Run `spec`, keeping at most `opts.max_bytes` of each output stream.
///
/// A non-zero exit is not an error here; the status is part of the result.
/// When the timeout elapses or the token is cancelled the process tree is
/// killed and `timed_out` / `cancelled` is set.
pub fn run_command(spec: &CommandSpec, opts: &RunOptions) -> io::Result<CommandResult> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    // Own process group so the whole tree (login shell + bazel client) can be signalled.
    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;

        cmd.pre_exec(|| {
            // SAFETY: `setpgid` is async-signal-safe and runs in the forked child.
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    let Some(stdout) = child.stdout.take() else {
        return Err(io::Error::other("child stdout was not captured"));
    };
    let Some(stderr) = child.stderr.take() else {
        return Err(io::Error::other("child stderr was not captured"));
    };

    let stdout_rx = spawn_reader(stdout, opts.max_bytes);
    let stderr_rx = spawn_reader(stderr, opts.max_bytes);

    let mut timed_out = false;
    let mut cancelled = false;

    let status = if opts.timeout.is_some() || opts.cancellation.is_some() {
        loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            if opts
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                cancelled = true;
                break terminate_process_tree(&mut child, opts.kill_grace)?;
            }

            let mut sleep = opts.poll_interval;
            if let Some(timeout) = opts.timeout {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    timed_out = true;
                    break terminate_process_tree(&mut child, opts.kill_grace)?;
                }
                sleep = sleep.min(timeout - elapsed);
            }
            thread::sleep(sleep);
        }
    } else {
        child.wait()?
    };

    let (stdout_bytes, stdout_truncated) =
        join_reader(&stdout_rx, "stdout", opts.reader_join_timeout)?;
    let (stderr_bytes, stderr_truncated) =
        join_reader(&stderr_rx, "stderr", opts.reader_join_timeout)?;

    let elapsed = start.elapsed();
    tracing::debug!(
        target = "bcp.process",
        command = %spec,
        exit_code = status.code(),
        elapsed_ms = elapsed.as_millis() as u64,
        timed_out,
        cancelled,
        "command finished"
    );

    Ok(CommandResult {
        status,
        output: BoundedOutput {
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            truncated: stdout_truncated || stderr_truncated,
        },
        timed_out,
        cancelled,
        elapsed,
    })
}

/// Like [`run_command`] but non-zero exits, timeouts and cancellation become
/// [`RunCommandError::Failed`].
pub fn run_command_checked(
    spec: &CommandSpec,
    opts: &RunOptions,
) -> Result<CommandResult, RunCommandError> {
    let result = run_command(spec, opts).map_err(|source| RunCommandError::Io {
        command: spec.clone(),
        source,
    })?;

    if result.timed_out || result.cancelled || !result.status.success() {
        return Err(RunCommandError::Failed(Box::new(CommandFailure {
            command: spec.clone(),
            status: result.status,
            output: result.output,
            timed_out: result.timed_out,
            cancelled: result.cancelled,
        })));
    }

    Ok(result)
}

type ReaderResult = io::Result<(Vec<u8>, bool)>;

fn spawn_reader(reader: impl Read + Send + 'static, max_bytes: usize) -> mpsc::Receiver<ReaderResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_bounded(reader, max_bytes));
    });
    rx
}

fn join_reader(
    rx: &mpsc::Receiver<ReaderResult>,
    stream: &'static str,
    timeout: Duration,
) -> io::Result<(Vec<u8>, bool)> {
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            // A grandchild escaped the process group and still holds the pipe.
            tracing::warn!(
                target = "bcp.process",
                stream,
                timeout_ms = timeout.as_millis() as u64,
                "gave up waiting for command output"
            );
            Ok((Vec::new(), true))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(io::Error::other(format!("{stream} reader thread panicked")))
        }
    }
}

fn terminate_process_tree(
    child: &mut std::process::Child,
    grace: Duration,
) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        // Negative pid addresses the process group created in `pre_exec`.
        unsafe {
            let _ = libc::kill(-pid, libc::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(25));
        }

        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
        child.wait()
    }

    #[cfg(windows)]
    {
        let _ = grace;
        let pid = child.id().to_string();
        let _ = Command::new("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let _ = child.kill();
        child.wait()
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = grace;
        let _ = child.kill();
        child.wait()
    }
}

fn read_bounded(mut reader: impl Read, max_bytes: usize) -> ReaderResult {
    let mut out = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }

        let keep = max_bytes.saturating_sub(out.len()).min(n);
        out.extend_from_slice(&buf[..keep]);
        truncated |= keep < n;
    }

    Ok((out, truncated))
}
