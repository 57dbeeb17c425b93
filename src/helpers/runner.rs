use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use crate::error::{DeployError, Result};
use crate::helpers::console::{Level, LogSink};

#[cfg(windows)]
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// An external command to run, described as a program plus argument vector.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    description: String,
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    search_path: Option<OsString>,
    secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(description: impl Into<String>, program: impl AsRef<OsStr>) -> Self {
        Self {
            description: description.into(),
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            search_path: None,
            secrets: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (k, v) in vars {
            self = self.env(k, v);
        }
        self
    }

    /// Use `path` instead of the inherited `PATH`, both for resolving the
    /// program and for the child's environment.
    pub fn search_path(mut self, path: Option<&OsStr>) -> Self {
        self.search_path = path.map(OsStr::to_os_string);
        self
    }

    /// Mask `value` whenever the command line is displayed.
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value);
        }
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Last value set for `key` through [`CommandSpec::env`].
    pub fn get_env(&self, key: &str) -> Option<&OsStr> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    /// Command line as shown to the user, secrets masked.
    pub fn display(&self) -> String {
        let mut parts = vec![quote(&self.program.to_string_lossy())];
        parts.extend(self.args.iter().map(|a| quote(&a.to_string_lossy())));
        let mut line = parts.join(" ");
        for secret in &self.secrets {
            line = line.replace(secret.as_str(), "****");
        }
        line
    }

    /// Resolves bare program names through `PATH` (and `PATHEXT` on Windows,
    /// so `npm` becomes `npm.cmd`). Unresolvable names are passed through.
    pub fn resolved_program(&self) -> PathBuf {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return program.to_path_buf();
        }
        let found = match &self.search_path {
            Some(path) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(&self.program, Some(path), cwd)
            }
            None => which::which(&self.program),
        };
        found.unwrap_or_else(|_| program.to_path_buf())
    }

    pub fn to_std_command(&self) -> std::process::Command {
        let mut command = std::process::Command::new(self.resolved_program());
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        if let Some(path) = &self.search_path {
            command.env("PATH", path);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);
        command
    }

    pub fn to_command(&self) -> Command {
        Command::from(self.to_std_command())
    }

    fn spawn_error(&self, source: std::io::Error) -> DeployError {
        DeployError::Spawn {
            program: self.program.to_string_lossy().into_owned(),
            source,
        }
    }
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub code: Option<i32>,
    pub lines: Vec<String>,
}

impl CommandOutcome {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn contains_any(&self, needles: &[&str]) -> bool {
        let text = self.text().to_lowercase();
        needles.iter().any(|n| text.contains(&n.to_lowercase()))
    }

    pub fn into_result(self, description: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(DeployError::CommandFailed {
                description: description.to_string(),
                code: self.code,
                output: self.text(),
            })
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

/// Runs `spec`, forwarding each output line to `sink` as it arrives.
///
/// Stdout and stderr are each drained by their own task into one channel;
/// the channel closing marks the end of output, after which the exit status
/// is collected. A non-zero exit is reported in the outcome, not as an error.
pub async fn run_streaming(spec: &CommandSpec, sink: &dyn LogSink) -> Result<CommandOutcome> {
    sink.log(Level::Cmd, &format!("Running: {}", spec.display()));
    debug!(cwd = ?spec.working_dir(), "spawning {}", spec.display());

    let mut command = spec.to_command();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            sink.error(&format!("Could not start '{}': {}", spec.description(), e));
            return Err(spec.spawn_error(e));
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        sink.output(&line);
        lines.push(line);
    }

    let status = child.wait().await?;
    let outcome = CommandOutcome {
        success: status.success(),
        code: status.code(),
        lines,
    };

    if outcome.success {
        sink.success(&format!("'{}' completed successfully.", spec.description()));
    } else {
        let code = outcome
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        sink.error(&format!(
            "'{}' failed with exit code {}.",
            spec.description(),
            code
        ));
    }
    Ok(outcome)
}

/// Runs `spec` silently and returns its stdout; failures carry stderr, or
/// stdout when stderr is empty.
pub async fn run_captured(spec: &CommandSpec) -> Result<String> {
    debug!(cwd = ?spec.working_dir(), "running {}", spec.display());
    let mut command = spec.to_command();
    command.stdin(Stdio::null());
    let output = command.output().await.map_err(|e| spec.spawn_error(e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Err(DeployError::CommandFailed {
        description: spec.description().to_string(),
        code: output.status.code(),
        output: if stderr.trim().is_empty() { stdout } else { stderr },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::console::MemoryLog;

    #[test]
    fn display_quotes_and_masks() {
        let spec = CommandSpec::new("clone", "git")
            .args(["clone", "https://tok123@github.com/acme/app.git", "C:\\My Apps\\backend"])
            .secret("tok123");
        assert_eq!(
            spec.display(),
            "git clone https://****@github.com/acme/app.git \"C:\\My Apps\\backend\""
        );
    }

    #[test]
    fn explicit_paths_are_not_resolved() {
        let spec = CommandSpec::new("venv python", "backend/venv/bin/python");
        assert_eq!(spec.resolved_program(), PathBuf::from("backend/venv/bin/python"));
    }

    #[test]
    fn failed_outcome_becomes_error() {
        let outcome = CommandOutcome {
            success: false,
            code: Some(2),
            lines: vec!["first".into(), "second".into()],
        };
        assert!(outcome.contains_any(&["SECOND"]));
        let err = outcome.into_result("migrate").unwrap_err();
        assert_eq!(err.command_output(), Some("first\nsecond"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_both_streams_and_reports_exit_code() {
        let log = MemoryLog::new();
        let spec = CommandSpec::new("noisy", "sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2; exit 3");
        let outcome = run_streaming(&spec, &log).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.code, Some(3));
        let mut lines = log.lines();
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
        assert!(log.contains(Level::Cmd, "Running: sh -c"));
        assert!(log.contains(Level::Error, "exit code 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_respects_working_dir_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let log = MemoryLog::new();
        let spec = CommandSpec::new("env", "sh")
            .args(["-c", "pwd; echo $RH_MARKER"])
            .current_dir(dir.path())
            .env("RH_MARKER", "present");
        let outcome = run_streaming(&spec, &log).await.unwrap();

        assert!(outcome.success);
        assert!(outcome.lines.iter().any(|l| l == "present"));
        assert!(log.contains(Level::Success, "'env' completed successfully"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captured_failure_prefers_stderr() {
        let spec = CommandSpec::new("probe", "sh").args(["-c", "echo out; echo bad >&2; exit 1"]);
        match run_captured(&spec).await {
            Err(DeployError::CommandFailed { code, output, .. }) => {
                assert_eq!(code, Some(1));
                assert_eq!(output.trim(), "bad");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let log = MemoryLog::new();
        let spec = CommandSpec::new("ghost", "rhdeploy-definitely-missing-tool");
        let err = run_streaming(&spec, &log).await.unwrap_err();
        assert!(matches!(err, DeployError::Spawn { .. }));
        assert!(log.contains(Level::Error, "Could not start 'ghost'"));
    }
}
