use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use thiserror::Error;

use crate::CommandSpec;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("unsupported login shell `{0}` (expected bash, zsh or fish)")]
    Unsupported(String),
    #[error("could not determine the login shell for user `{user}`")]
    NotFound { user: String },
}

/// Shells we know how to pass a single `-c` command string to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginShell {
    Bash,
    Zsh,
    Fish,
}

impl LoginShell {
    pub fn from_path(path: &Path) -> Result<Self, ShellError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        match name {
            "bash" => Ok(Self::Bash),
            "zsh" => Ok(Self::Zsh),
            "fish" => Ok(Self::Fish),
            _ => Err(ShellError::Unsupported(path.display().to_string())),
        }
    }
}

/// Runs commands through the user's login shell so PATH and tool setup from
/// shell profiles apply to the build tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellWrapper {
    pub shell: PathBuf,
    pub kind: LoginShell,
    /// Pass `-l`; only done on macOS where GUI processes do not inherit a login environment.
    pub login: bool,
}

impl ShellWrapper {
    pub fn new(shell: impl Into<PathBuf>) -> Result<Self, ShellError> {
        let shell = shell.into();
        let kind = LoginShell::from_path(&shell)?;
        Ok(Self {
            shell,
            kind,
            login: cfg!(target_os = "macos"),
        })
    }

    /// Detect the login shell of the current user. Returns `Ok(None)` on
    /// platforms that do not wrap commands.
    pub fn detect() -> Result<Option<Self>, ShellError> {
        match detect_login_shell()? {
            Some(shell) => Self::new(shell).map(Some),
            None => Ok(None),
        }
    }

    pub fn wrap(&self, spec: &CommandSpec) -> CommandSpec {
        let mut line = quote_for_shell(&spec.program.to_string_lossy());
        for arg in &spec.args {
            line.push(' ');
            line.push_str(&quote_for_shell(arg));
        }

        let mut args = Vec::with_capacity(3);
        if self.login {
            args.push("-l".to_string());
        }
        args.push("-c".to_string());
        args.push(line);

        CommandSpec {
            cwd: spec.cwd.clone(),
            program: self.shell.clone(),
            args,
            env: spec.env.clone(),
        }
    }
}

/// Quote `arg` for a POSIX-ish shell command line (bash, zsh, fish).
///
/// Plain words are left alone; anything containing whitespace or shell
/// metacharacters is wrapped in double quotes with `"`, `\`, `$` and `` ` `` escaped.
pub fn quote_for_shell(arg: &str) -> String {
    const SPECIAL: &[char] = &[
        '"', '\'', '(', ')', '*', '?', '$', '&', '|', ';', '<', '>', '[', ']', '{', '}', '\\',
        '`', '!', '#', '~',
    ];
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || SPECIAL.contains(&c)) {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Look up the current user's login shell.
///
/// macOS asks Directory Services (`dscl`), other Unix systems read the user's
/// `/etc/passwd` entry and fall back to `$SHELL`. Windows never wraps.
pub fn detect_login_shell() -> Result<Option<PathBuf>, ShellError> {
    if cfg!(windows) {
        return Ok(None);
    }

    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default();

    let detected = if cfg!(target_os = "macos") {
        dscl_user_shell(&user)
    } else {
        std::fs::read_to_string("/etc/passwd")
            .ok()
            .and_then(|passwd| passwd_user_shell(&passwd, &user))
    };

    let shell = detected.or_else(|| std::env::var_os("SHELL").map(PathBuf::from));
    match shell {
        Some(shell) => {
            tracing::debug!(target = "bcp.process", shell = %shell.display(), "detected login shell");
            Ok(Some(shell))
        }
        None => Err(ShellError::NotFound { user }),
    }
}

fn dscl_user_shell(user: &str) -> Option<PathBuf> {
    if user.is_empty() {
        return None;
    }
    let output = Command::new("dscl")
        .args([".", "-read", &format!("/Users/{user}"), "UserShell"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_dscl_output(&String::from_utf8_lossy(&output.stdout))
}

/// `dscl` prints `UserShell: /bin/zsh`.
fn parse_dscl_output(stdout: &str) -> Option<PathBuf> {
    stdout.lines().find_map(|line| {
        let shell = line.strip_prefix("UserShell:")?.trim();
        (!shell.is_empty()).then(|| PathBuf::from(shell))
    })
}

fn passwd_user_shell(passwd: &str, user: &str) -> Option<PathBuf> {
    if user.is_empty() {
        return None;
    }
    passwd.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 || fields[0] != user {
            return None;
        }
        let shell = fields[6].trim();
        (!shell.is_empty()).then(|| PathBuf::from(shell))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn passwd_lookup_uses_seventh_field() {
        let passwd = "root:x:0:0:root:/root:/bin/bash\n\
                      dev:x:1000:1000:Dev User,,,:/home/dev:/usr/bin/zsh\n";
        assert_eq!(
            passwd_user_shell(passwd, "dev"),
            Some(PathBuf::from("/usr/bin/zsh"))
        );
        assert_eq!(passwd_user_shell(passwd, "missing"), None);
    }

    #[test]
    fn dscl_output_is_parsed() {
        assert_eq!(
            parse_dscl_output("UserShell: /opt/homebrew/bin/fish\n"),
            Some(PathBuf::from("/opt/homebrew/bin/fish"))
        );
        assert_eq!(parse_dscl_output("No such key: UserShell\n"), None);
    }

    #[test]
    fn unsupported_shells_are_rejected() {
        assert_eq!(
            LoginShell::from_path(Path::new("/bin/bash")).unwrap(),
            LoginShell::Bash
        );
        assert!(matches!(
            LoginShell::from_path(Path::new("/bin/tcsh")),
            Err(ShellError::Unsupported(_))
        ));
    }

    #[test]
    fn wrap_builds_single_command_string() {
        let wrapper = ShellWrapper {
            shell: PathBuf::from("/bin/zsh"),
            kind: LoginShell::Zsh,
            login: true,
        };
        let spec = CommandSpec::new(
            Path::new("/ws"),
            "bazel",
            &["query".to_string(), "tests(//a:b)".to_string()],
        )
        .with_env([("PULLER_TIMEOUT".to_string(), "3000".to_string())]);

        let wrapped = wrapper.wrap(&spec);
        assert_eq!(wrapped.program, PathBuf::from("/bin/zsh"));
        assert_eq!(
            wrapped.args,
            vec!["-l", "-c", "bazel query \"tests(//a:b)\""]
        );
        assert_eq!(wrapped.env, spec.env);
        assert_eq!(wrapped.cwd, PathBuf::from("/ws"));
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_for_shell("plain"), "plain");
        assert_eq!(quote_for_shell(""), "\"\"");
        assert_eq!(
            quote_for_shell(r#"filter(".*\.jar$", x)"#),
            r#""filter(\".*\\.jar\$\", x)""#
        );
    }
}
