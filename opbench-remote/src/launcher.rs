//! Process Launcher
//!
//! Renders a template into a temporary script, runs it with the PHP binary
//! under ini overrides and a wall-clock timeout, and captures both output
//! streams in full.
//!
//! The child is placed in its own process group. Whatever happens (normal
//! exit, timeout, an error while reading), the whole group is signalled and
//! the child reaped before `launch` returns, so no process outlives the call.

use crate::protocol::{RawResult, ScriptError};
use crate::template::{ScriptTokens, TemplateError, TemplateSource, render};
use crate::{DISABLE_INI_FLAG, INI_FLAG, PhpLiteral};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// How often the child is polled while waiting for it to exit
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Time allowed between SIGTERM and SIGKILL on timeout
const TERMINATE_GRACE: Duration = Duration::from_millis(100);

/// Failures of a single launch
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The PHP binary (or wrapper) could not be started
    #[error("Failed to spawn PHP process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// The rendered script could not be written to a temporary file
    #[error("Failed to write benchmark script: {0}")]
    ScriptWrite(#[source] std::io::Error),

    /// Waiting for the child or reading its streams failed
    #[error("Failed to collect process output: {0}")]
    Io(#[from] std::io::Error),

    /// The template could not be loaded or rendered
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The child exceeded its wall-clock limit and was killed
    #[error("Script did not complete within {0:?}")]
    Timeout(Duration),

    /// The child exited non-zero
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// The launcher has an empty command
    #[error("No PHP binary configured")]
    MissingBinary,
}

/// A single ini setting value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IniValue {
    /// `true` / `false`, passed as `1` / `0`
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Any other setting, passed verbatim
    String(String),
}

impl fmt::Display for IniValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IniValue::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            IniValue::Int(i) => write!(f, "{}", i),
            IniValue::Float(x) => write!(f, "{}", x),
            IniValue::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for IniValue {
    fn from(value: bool) -> Self {
        IniValue::Bool(value)
    }
}

impl From<i64> for IniValue {
    fn from(value: i64) -> Self {
        IniValue::Int(value)
    }
}

impl From<&str> for IniValue {
    fn from(value: &str) -> Self {
        IniValue::String(value.to_string())
    }
}

impl From<String> for IniValue {
    fn from(value: String) -> Self {
        IniValue::String(value)
    }
}

/// Ini setting name → value, ordered so command lines are deterministic
pub type PhpConfig = BTreeMap<String, IniValue>;

/// Launcher-wide settings shared by every payload it creates
#[derive(Debug, Clone)]
pub struct Launcher {
    php_binary: String,
    php_wrapper: Option<String>,
    php_disable_ini: bool,
    php_config: PhpConfig,
    bootstrap: Option<PathBuf>,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new("php")
    }
}

impl Launcher {
    /// Create a launcher for the given PHP binary
    pub fn new(php_binary: impl Into<String>) -> Self {
        Self {
            php_binary: php_binary.into(),
            php_wrapper: None,
            php_disable_ini: false,
            php_config: PhpConfig::new(),
            bootstrap: None,
        }
    }

    /// Command prefix (e.g. `"nice -n 5"`), split on whitespace
    pub fn with_wrapper(mut self, wrapper: Option<String>) -> Self {
        self.php_wrapper = wrapper.filter(|w| !w.trim().is_empty());
        self
    }

    /// Pass `-n` so no php.ini is loaded
    pub fn with_disable_ini(mut self, disable: bool) -> Self {
        self.php_disable_ini = disable;
        self
    }

    /// Launcher-level ini overrides, applied below any payload overrides
    pub fn with_php_config(mut self, config: PhpConfig) -> Self {
        self.php_config = config;
        self
    }

    /// File the child requires before loading the benchmark
    pub fn with_bootstrap(mut self, bootstrap: Option<PathBuf>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// The PHP binary
    pub fn php_binary(&self) -> &str {
        &self.php_binary
    }

    /// Create a single-use payload.
    ///
    /// Adds the `bootstrap` token unless the caller already set one.
    pub fn payload(
        &self,
        template: impl Into<TemplateSource>,
        mut tokens: ScriptTokens,
        timeout: Option<Duration>,
    ) -> LaunchPayload {
        if !tokens.contains("bootstrap") {
            let literal = match &self.bootstrap {
                Some(path) => PhpLiteral::string(&path.to_string_lossy()),
                None => PhpLiteral::null(),
            };
            tokens.insert("bootstrap", literal);
        }

        let mut program: Vec<String> = self
            .php_wrapper
            .as_deref()
            .map(|w| w.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        if !self.php_binary.is_empty() {
            program.push(self.php_binary.clone());
        }

        LaunchPayload {
            program,
            disable_ini: self.php_disable_ini,
            template: template.into(),
            tokens,
            timeout: timeout.filter(|t| !t.is_zero()),
            php_config: self.php_config.clone(),
        }
    }
}

/// One pending child-process invocation. Consumed by `launch`.
#[derive(Debug)]
pub struct LaunchPayload {
    program: Vec<String>,
    disable_ini: bool,
    template: TemplateSource,
    tokens: ScriptTokens,
    timeout: Option<Duration>,
    php_config: PhpConfig,
}

impl LaunchPayload {
    /// Layer ini overrides on top of the current ones; new keys win
    pub fn merge_php_config(&mut self, overrides: PhpConfig) {
        self.php_config.extend(overrides);
    }

    /// Effective ini overrides
    pub fn php_config(&self) -> &PhpConfig {
        &self.php_config
    }

    /// Substitution tokens
    pub fn tokens(&self) -> &ScriptTokens {
        &self.tokens
    }

    /// Wall-clock limit, `None` for unlimited
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Full argument vector for running `script`
    pub fn command_line(&self, script: &Path) -> Vec<String> {
        let mut args = self.program.clone();
        if self.disable_ini {
            args.push(DISABLE_INI_FLAG.to_string());
        }
        for (key, value) in &self.php_config {
            args.push(INI_FLAG.to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(script.to_string_lossy().into_owned());
        args
    }

    /// Run the payload and return the raw capture, whatever the exit code.
    ///
    /// Fails only on launch problems and on timeout.
    pub fn launch(self) -> Result<RawResult, RemoteError> {
        if self.program.is_empty() {
            return Err(RemoteError::MissingBinary);
        }
        let template = self.template.load()?;
        let script = render(&template, &self.tokens)?;

        let mut script_file = tempfile::Builder::new()
            .prefix("opbench-")
            .suffix(".php")
            .tempfile()
            .map_err(RemoteError::ScriptWrite)?;
        script_file
            .write_all(script.as_bytes())
            .and_then(|_| script_file.flush())
            .map_err(RemoteError::ScriptWrite)?;

        let args = self.command_line(script_file.path());
        let (program, rest) = args.split_first().ok_or(RemoteError::MissingBinary)?;

        let mut command = Command::new(program);
        command
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!(command = ?args, timeout = ?self.timeout, "launching benchmark script");
        let start = Instant::now();

        let mut process = ChildProcess::spawn(&mut command)?;
        let stdout_reader = spawn_reader(process.child.stdout.take());
        let stderr_reader = spawn_reader(process.child.stderr.take());

        let status = match process.wait_timeout(self.timeout) {
            Ok(status) => status,
            Err(e) => {
                process.terminate();
                return Err(RemoteError::Io(e));
            }
        };
        process.kill_stragglers();

        let stdout = join_reader(stdout_reader)?;
        let stderr = join_reader(stderr_reader)?;
        drop(script_file);

        match status {
            Some(status) => {
                debug!(
                    exit = ?status.code(),
                    elapsed = ?start.elapsed(),
                    stdout_bytes = stdout.len(),
                    stderr_bytes = stderr.len(),
                    "benchmark script finished"
                );
                Ok(RawResult::from_status(status, &stdout, &stderr))
            }
            None => {
                // Only reachable when a timeout was set.
                let timeout = self.timeout.unwrap_or_default();
                warn!(?timeout, "benchmark script timed out and was killed");
                Err(RemoteError::Timeout(timeout))
            }
        }
    }

    /// Run the payload, turning a non-zero exit into a [`ScriptError`]
    pub fn launch_result(self) -> Result<RawResult, RemoteError> {
        let raw = self.launch()?;
        match raw.script_error() {
            Some(error) => Err(RemoteError::Script(error)),
            None => Ok(raw),
        }
    }
}

type StreamReader = Option<JoinHandle<std::io::Result<Vec<u8>>>>;

/// Drain a pipe on its own thread so a chatty child never blocks on a full pipe.
fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> StreamReader {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join_reader(reader: StreamReader) -> Result<Vec<u8>, RemoteError> {
    match reader {
        Some(handle) => match handle.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err(RemoteError::Io(std::io::Error::other(
                "output reader thread panicked",
            ))),
        },
        None => Ok(Vec::new()),
    }
}

/// Send a signal to every process in the child's group.
#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    // ESRCH just means the group is already gone.
    unsafe {
        libc::kill(-(pgid as libc::pid_t), signal);
    }
}

/// Owns the child until it has been reaped; kills the group on drop.
struct ChildProcess {
    child: Child,
    reaped: bool,
}

impl ChildProcess {
    fn spawn(command: &mut Command) -> Result<Self, RemoteError> {
        let child = command.spawn().map_err(RemoteError::SpawnFailed)?;
        Ok(Self {
            child,
            reaped: false,
        })
    }

    /// Wait for exit. `Ok(None)` means the timeout elapsed and the child was killed.
    fn wait_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<Option<ExitStatus>> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                return Ok(Some(status));
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    self.terminate();
                    return Ok(None);
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// SIGTERM the group, give it a moment, then SIGKILL and reap.
    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            signal_group(self.child.id(), libc::SIGTERM);
            let deadline = Instant::now() + TERMINATE_GRACE;
            while Instant::now() < deadline {
                if let Ok(Some(_)) = self.child.try_wait() {
                    self.reaped = true;
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            signal_group(self.child.id(), libc::SIGKILL);
        }
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.reaped = true;
        }
    }

    /// Kill anything the child left running in its group (e.g. background jobs).
    fn kill_stragglers(&self) {
        #[cfg(unix)]
        signal_group(self.child.id(), libc::SIGKILL);
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.reaped {
            #[cfg(unix)]
            signal_group(self.child.id(), libc::SIGKILL);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
