//! Shell execution for relayed commands.
//!
//! Commands run under the user's login shell so profile-defined PATH entries
//! (Homebrew, cargo, npm globals) are visible, the same way an interactive
//! terminal would see them. The child inherits the relay's full environment.
//!
//! Foreground runs capture stdout/stderr up to a byte cap and are killed (with
//! their whole process group) when they overrun the wall-clock timeout.
//! Background runs are detached into their own process group with stdio
//! discarded; the caller only gets the pid and a future that resolves on exit.
//!
//! Stdin is closed. A command that waits for an interactive answer reads EOF
//! instead of getting an auto-dismiss newline.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// How long to keep draining pipes after the child is gone or killed.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Read chunk size for the capture pumps.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Get the platform-appropriate shell used to run relayed commands.
pub fn default_shell() -> String {
    #[cfg(windows)]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/zsh".to_string())
    }
    #[cfg(all(not(windows), not(target_os = "macos")))]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    }
}

/// Escape a command for embedding inside single quotes: `'` becomes `'"'"'`.
pub fn escape_single_quotes(command: &str) -> String {
    command.replace('\'', "'\"'\"'")
}

/// Program and argv that will actually be spawned for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellInvocation {
    /// Human-readable form, as a terminal user would type it.
    pub fn display(&self) -> String {
        if cfg!(windows) {
            return self.args.last().cloned().unwrap_or_default();
        }
        match self.args.last() {
            Some(command) => format!("{} -l -c '{}'", self.program, escape_single_quotes(command)),
            None => self.program.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Captured output of a command that exited with status 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecFailureKind {
    /// The shell itself could not be started
    Spawn,
    NonZeroExit,
    /// Terminated by a signal we did not send
    Signal,
    Timeout,
    OutputLimit,
}

/// A failed execution, with whatever output was collected before the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecError {
    pub kind: ExecFailureKind,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    pub signal: Option<String>,
}

impl ExecError {
    fn spawn(message: String) -> Self {
        Self {
            kind: ExecFailureKind::Spawn,
            message,
            stdout: String::new(),
            stderr: String::new(),
            code: None,
            signal: None,
        }
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExecError {}

/// A detached process. `exited` resolves once the process has been reaped.
pub struct BackgroundChild {
    pub pid: u32,
    pub exited: BoxFuture<'static, ()>,
}

/// Executes command strings on behalf of the relay.
pub trait ShellAdapter: Send + Sync {
    /// Run to completion and capture output.
    fn run(&self, command: &str) -> BoxFuture<'_, Result<ShellOutput, ExecError>>;

    /// Start detached and return immediately.
    fn spawn_detached(&self, command: &str) -> Result<BackgroundChild, String>;

    /// What will actually be executed, for logs.
    fn describe(&self, command: &str) -> String {
        command.to_string()
    }
}

// ---------------------------------------------------------------------------
// Login shell adapter
// ---------------------------------------------------------------------------

/// Runs commands through `$SHELL -l -c` (or `cmd.exe /C` on Windows).
#[derive(Debug, Clone)]
pub struct LoginShell {
    shell: String,
    timeout: Duration,
    max_output_bytes: usize,
}

impl LoginShell {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            shell: default_shell(),
            timeout,
            max_output_bytes,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn invocation(&self, command: &str) -> ShellInvocation {
        #[cfg(windows)]
        let args = vec!["/C".to_string(), command.to_string()];
        // Login shell flag loads the user's profile (PATH etc.)
        #[cfg(not(windows))]
        let args = vec!["-l".to_string(), "-c".to_string(), command.to_string()];

        ShellInvocation {
            program: self.shell.clone(),
            args,
        }
    }

    fn build_command(&self, command: &str) -> Command {
        let invocation = self.invocation(command);
        let mut cmd = Command::new(&invocation.program);
        // cmd.exe does its own parsing; MSVC argv quoting would turn `"` into `\"`
        #[cfg(windows)]
        cmd.arg("/C").raw_arg(command);
        #[cfg(not(windows))]
        cmd.args(&invocation.args);
        cmd.stdin(Stdio::null());
        // Own process group so a timeout can take down the whole tree
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    async fn run_captured(&self, command: &str) -> Result<ShellOutput, ExecError> {
        let mut cmd = self.build_command(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecError::spawn(format!("Failed to start {}: {e}", self.shell)))?;
        // Group id outlives the shell: descendants stay in it after the leader is reaped
        let pgid = child.id();

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let (overflow_tx, mut overflow_rx) = mpsc::channel::<&'static str>(2);

        let mut pumps = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(
                out,
                stdout_buf.clone(),
                self.max_output_bytes,
                overflow_tx.clone(),
                "stdout",
            )));
        }
        if let Some(err) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(
                err,
                stderr_buf.clone(),
                self.max_output_bytes,
                overflow_tx.clone(),
                "stderr",
            )));
        }
        drop(overflow_tx);

        let deadline = tokio::time::Instant::now() + self.timeout;
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Outcome::Exited(status),
                Err(e) => Outcome::WaitFailed(e.to_string()),
            },
            _ = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
            Some(stream) = overflow_rx.recv() => Outcome::Overflow(stream),
        };

        let outcome = match outcome {
            Outcome::Exited(status) => {
                // Grandchildren can keep the pipes open past the shell's exit
                let drained = tokio::time::timeout_at(deadline, join_pumps(&mut pumps)).await;
                if drained.is_err() {
                    kill_process_tree(&mut child, pgid);
                    let _ = tokio::time::timeout(PIPE_DRAIN_GRACE, join_pumps(&mut pumps)).await;
                    Outcome::TimedOut
                } else if let Ok(stream) = overflow_rx.try_recv() {
                    // Fast producers can exit before the overflow branch is polled
                    Outcome::Overflow(stream)
                } else {
                    Outcome::Exited(status)
                }
            }
            other => {
                kill_process_tree(&mut child, pgid);
                let _ = tokio::time::timeout(PIPE_DRAIN_GRACE, child.wait()).await;
                let _ = tokio::time::timeout(PIPE_DRAIN_GRACE, join_pumps(&mut pumps)).await;
                other
            }
        };
        for handle in &pumps {
            handle.abort();
        }

        let stdout = String::from_utf8_lossy(&stdout_buf.lock()).to_string();
        let stderr = String::from_utf8_lossy(&stderr_buf.lock()).to_string();

        match outcome {
            Outcome::Exited(status) if status.success() => Ok(ShellOutput { stdout, stderr }),
            Outcome::Exited(status) => Err(exit_failure(command, status, stdout, stderr)),
            Outcome::TimedOut => Err(ExecError {
                kind: ExecFailureKind::Timeout,
                message: format!(
                    "Command timed out after {}s: {command}",
                    self.timeout.as_secs_f64()
                ),
                stdout,
                stderr,
                code: None,
                signal: Some("SIGKILL".to_string()),
            }),
            Outcome::Overflow(stream) => Err(ExecError {
                kind: ExecFailureKind::OutputLimit,
                message: format!(
                    "{stream} exceeded maximum size ({} bytes)",
                    self.max_output_bytes
                ),
                stdout,
                stderr,
                code: None,
                signal: Some("SIGKILL".to_string()),
            }),
            Outcome::WaitFailed(e) => Err(ExecError {
                kind: ExecFailureKind::Spawn,
                message: format!("Failed to wait for command: {e}"),
                stdout,
                stderr,
                code: None,
                signal: None,
            }),
        }
    }
}

impl ShellAdapter for LoginShell {
    fn run(&self, command: &str) -> BoxFuture<'_, Result<ShellOutput, ExecError>> {
        let command = command.to_string();
        Box::pin(async move { self.run_captured(&command).await })
    }

    fn spawn_detached(&self, command: &str) -> Result<BackgroundChild, String> {
        let mut cmd = self.build_command(command);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Failed to start {}: {e}", self.shell))?;
        // id() is only None once the child has been waited on, which cannot
        // have happened yet; the error is a fallback
        let pid = child
            .id()
            .ok_or_else(|| format!("Background command has no pid: {command}"))?;

        // The watcher owns the child so it gets reaped; the process outlives the relay
        let exited: BoxFuture<'static, ()> = Box::pin(async move {
            let _ = child.wait().await;
        });
        Ok(BackgroundChild { pid, exited })
    }

    fn describe(&self, command: &str) -> String {
        self.invocation(command).display()
    }
}

enum Outcome {
    Exited(ExitStatus),
    WaitFailed(String),
    TimedOut,
    Overflow(&'static str),
}

/// Copy a pipe into `sink` until EOF or until `limit` would be exceeded.
async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    sink: Arc<Mutex<Vec<u8>>>,
    limit: usize,
    overflow: mpsc::Sender<&'static str>,
    stream: &'static str,
) {
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let mut buf = sink.lock();
        let room = limit.saturating_sub(buf.len());
        if n > room {
            buf.extend_from_slice(&chunk[..room]);
            drop(buf);
            let _ = overflow.try_send(stream);
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn join_pumps(pumps: &mut [tokio::task::JoinHandle<()>]) {
    for handle in pumps.iter_mut() {
        let _ = handle.await;
    }
}

/// SIGKILL the command's process group, even when the shell itself has
/// already exited and been reaped.
fn kill_process_tree(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        // SAFETY: killpg only sends a signal; pgid is the group we created at spawn
        unsafe {
            libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
    let _ = child.start_kill();
}

fn exit_failure(command: &str, status: ExitStatus, stdout: String, stderr: String) -> ExecError {
    let code = status.code();
    let signal = exit_signal(&status);
    let (kind, message) = match (code, &signal) {
        (Some(code), _) => (
            ExecFailureKind::NonZeroExit,
            format!("Command failed with exit code {code}: {command}"),
        ),
        (None, Some(sig)) => (
            ExecFailureKind::Signal,
            format!("Command terminated by {sig}: {command}"),
        ),
        (None, None) => (
            ExecFailureKind::NonZeroExit,
            format!("Command failed: {command}"),
        ),
    };
    ExecError {
        kind,
        message,
        stdout,
        stderr,
        code,
        signal,
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(signal_name)
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<String> {
    None
}

#[cfg(unix)]
fn signal_name(sig: i32) -> String {
    match sig {
        libc::SIGHUP => "SIGHUP".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGQUIT => "SIGQUIT".to_string(),
        libc::SIGABRT => "SIGABRT".to_string(),
        libc::SIGKILL => "SIGKILL".to_string(),
        libc::SIGSEGV => "SIGSEGV".to_string(),
        libc::SIGPIPE => "SIGPIPE".to_string(),
        libc::SIGTERM => "SIGTERM".to_string(),
        other => format!("SIG{other}"),
    }
}
