//! Command Executor
//!
//! Runs engine binaries as child processes with:
//! - one `argv` entry per argument, never a shell
//! - cancellation through a [`CancellationToken`] and an optional deadline
//! - a bounded tail of stderr, logged line by line as it arrives
//! - stdout of one process streamed into stdin of another without buffering
//!   the whole stream
//!
//! Non-zero exits become `CommandExecution` errors carrying the command line,
//! exit code and stderr tail, then get re-classified from stderr.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify;
use super::spec::{CommandSpec, Program};
use crate::error::{meta, ErrorCode, RodentError, Result};

/// Bytes of stderr kept for error reports
pub const STDERR_TAIL_BYTES: usize = 64 * 1024;

/// Metadata key naming the side of a pipeline that failed
pub const PIPE_SIDE: &str = "pipe_side";

const SIGPIPE: i32 = 13;

// =============================================================================
// Configuration
// =============================================================================

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Prefix engine commands with `sudo -n`
    pub use_sudo: bool,
    pub sudo_path: PathBuf,
    pub zfs_path: PathBuf,
    pub ssh_path: PathBuf,
    /// Deadline applied when a call does not choose one
    pub default_timeout: Option<Duration>,
    /// Extra environment for every child
    pub env: BTreeMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("LC_ALL".to_string(), "C".to_string());

        Self {
            use_sudo: false,
            sudo_path: PathBuf::from("sudo"),
            zfs_path: PathBuf::from("zfs"),
            ssh_path: PathBuf::from("ssh"),
            default_timeout: Some(Duration::from_secs(300)),
            env,
        }
    }
}

/// How long a single invocation may run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Deadline {
    /// Use [`ExecutorConfig::default_timeout`]
    #[default]
    Default,
    /// Run until exit or cancellation
    Unbounded,
    After(Duration),
}

/// Per-call options
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandOptions {
    pub deadline: Deadline,
}

impl CommandOptions {
    pub fn unbounded() -> Self {
        Self {
            deadline: Deadline::Unbounded,
        }
    }

    pub fn timeout(duration: Duration) -> Self {
        Self {
            deadline: Deadline::After(duration),
        }
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    /// Tail of stderr, at most [`STDERR_TAIL_BYTES`]
    pub stderr: String,
}

enum Interrupted {
    Cancelled,
    TimedOut(Duration),
}

// =============================================================================
// Executor
// =============================================================================

/// Spawns and supervises engine processes
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a command to completion and capture its output
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        spec: &CommandSpec,
        options: CommandOptions,
    ) -> Result<CommandOutput> {
        let rendered = spec.to_string();
        let mut child = self.spawn(spec, &rendered, Stdio::null())?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let work = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                read_all(stdout),
                capture_tail(stderr, &rendered)
            );
            (status, stdout, stderr)
        };
        let (status, stdout, stderr) =
            match self.supervise(ctx, options, work).await {
                Ok(done) => done,
                Err(interrupted) => {
                    kill(&mut child, &rendered).await;
                    return Err(interruption_error(interrupted, &rendered));
                }
            };

        let status = status.map_err(|e| wait_error(&rendered, e))?;
        finish(spec.program(), &rendered, status, stdout, stderr)
    }

    /// Run a command with `source` streamed into its stdin
    pub async fn run_streaming<R>(
        &self,
        ctx: &CancellationToken,
        spec: &CommandSpec,
        mut source: R,
        options: CommandOptions,
    ) -> Result<CommandOutput>
    where
        R: AsyncRead + Unpin + Send,
    {
        let rendered = spec.to_string();
        let mut child = self.spawn(spec, &rendered, Stdio::piped())?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let feed = async move {
            match stdin {
                Some(mut stdin) => {
                    let copied = tokio::io::copy(&mut source, &mut stdin).await;
                    let _ = stdin.shutdown().await;
                    drop(stdin);
                    copied
                }
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin not captured")),
            }
        };
        let work = async {
            tokio::join!(
                feed,
                child.wait(),
                read_all(stdout),
                capture_tail(stderr, &rendered)
            )
        };
        let (copied, status, stdout, stderr) =
            match self.supervise(ctx, options, work).await {
                Ok(done) => done,
                Err(interrupted) => {
                    kill(&mut child, &rendered).await;
                    return Err(interruption_error(interrupted, &rendered));
                }
            };

        let status = status.map_err(|e| wait_error(&rendered, e))?;
        let output = finish(spec.program(), &rendered, status, stdout, stderr)?;
        if let Err(e) = copied {
            return Err(pipe_error(&rendered, e));
        }
        Ok(output)
    }

    /// Stream stdout of `producer` into stdin of `consumer`
    ///
    /// Both processes run concurrently. When either fails the error names
    /// the failing side under the `pipe_side` metadata key. A producer that
    /// died only because the consumer went away is not blamed.
    pub async fn pipe(
        &self,
        ctx: &CancellationToken,
        producer: &CommandSpec,
        consumer: &CommandSpec,
        options: CommandOptions,
    ) -> Result<()> {
        let producer_line = producer.to_string();
        let consumer_line = consumer.to_string();

        let mut producer_child = self.spawn(producer, &producer_line, Stdio::null())?;
        let mut consumer_child = match self.spawn(consumer, &consumer_line, Stdio::piped()) {
            Ok(child) => child,
            Err(e) => {
                kill(&mut producer_child, &producer_line).await;
                return Err(e);
            }
        };

        let (mut from, mut to) = match (producer_child.stdout.take(), consumer_child.stdin.take()) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                kill(&mut producer_child, &producer_line).await;
                kill(&mut consumer_child, &consumer_line).await;
                return Err(RodentError::new(ErrorCode::CommandPipe, "pipe endpoints not captured")
                    .with_metadata(meta::COMMAND, format!("{} | {}", producer_line, consumer_line)));
            }
        };
        let producer_stderr = producer_child.stderr.take();
        let consumer_stdout = consumer_child.stdout.take();
        let consumer_stderr = consumer_child.stderr.take();

        debug!("Piping {} into {}", producer_line, consumer_line);

        let copy = async move {
            let copied = tokio::io::copy(&mut from, &mut to).await;
            let _ = to.shutdown().await;
            drop(to);
            drop(from);
            copied
        };
        let work = async {
            tokio::join!(
                copy,
                producer_child.wait(),
                consumer_child.wait(),
                capture_tail(producer_stderr, &producer_line),
                read_all(consumer_stdout),
                capture_tail(consumer_stderr, &consumer_line)
            )
        };
        let (copied, producer_status, consumer_status, producer_err, consumer_out, consumer_err) =
            match self.supervise(ctx, options, work).await {
                Ok(done) => done,
                Err(interrupted) => {
                    kill(&mut producer_child, &producer_line).await;
                    kill(&mut consumer_child, &consumer_line).await;
                    let line = format!("{} | {}", producer_line, consumer_line);
                    return Err(interruption_error(interrupted, &line));
                }
            };

        let producer_status = producer_status.map_err(|e| wait_error(&producer_line, e))?;
        let consumer_status = consumer_status.map_err(|e| wait_error(&consumer_line, e))?;

        let producer_result = finish(
            producer.program(),
            &producer_line,
            producer_status,
            String::new(),
            producer_err,
        );
        let consumer_result = finish(
            consumer.program(),
            &consumer_line,
            consumer_status,
            consumer_out,
            consumer_err,
        );

        match (producer_result, consumer_result) {
            (Ok(_), Ok(_)) => copied
                .map(|bytes| debug!("Pipeline moved {} bytes", bytes))
                .map_err(|e| pipe_error(&producer_line, e)),
            (Err(e), Ok(_)) => Err(e.with_metadata(PIPE_SIDE, "producer")),
            (Ok(_), Err(e)) => Err(e.with_metadata(PIPE_SIDE, "consumer")),
            (Err(producer_err), Err(consumer_err)) => {
                if died_of_broken_pipe(&producer_status, &producer_err) {
                    Err(consumer_err.with_metadata(PIPE_SIDE, "consumer"))
                } else {
                    Err(producer_err.with_metadata(PIPE_SIDE, "producer"))
                }
            }
        }
    }

    /// Await `work` unless the token fires or the deadline passes first
    async fn supervise<F: Future>(
        &self,
        ctx: &CancellationToken,
        options: CommandOptions,
        work: F,
    ) -> std::result::Result<F::Output, Interrupted> {
        let limit = match options.deadline {
            Deadline::Default => self.config.default_timeout,
            Deadline::Unbounded => None,
            Deadline::After(duration) => Some(duration),
        };
        let expiry = async {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            output = work => Ok(output),
            _ = ctx.cancelled() => Err(Interrupted::Cancelled),
            _ = expiry => Err(Interrupted::TimedOut(limit.unwrap_or_default())),
        }
    }

    fn spawn(&self, spec: &CommandSpec, rendered: &str, stdin: Stdio) -> Result<Child> {
        if let Some(arg) = spec.find_nul() {
            return Err(RodentError::new(
                ErrorCode::CommandInvalidInput,
                format!("argument contains NUL byte: {:?}", arg),
            )
            .with_metadata(meta::COMMAND, rendered));
        }

        let program = match spec.program() {
            Program::Zfs => &self.config.zfs_path,
            Program::Ssh => &self.config.ssh_path,
        };

        let mut command = if self.config.use_sudo && spec.program() == Program::Zfs {
            let mut command = Command::new(&self.config.sudo_path);
            command.arg("-n").arg(program);
            command
        } else {
            Command::new(program)
        };
        command
            .args(spec.arguments())
            .envs(&self.config.env)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing: {}", rendered);
        command.spawn().map_err(|e| spawn_error(rendered, e))
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            warn!("Failed to read command stdout: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Log each stderr line and keep the last [`STDERR_TAIL_BYTES`]
async fn capture_tail<R: AsyncRead + Unpin>(reader: Option<R>, command: &str) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    let mut reader = BufReader::new(reader);
    let mut lines: VecDeque<String> = VecDeque::new();
    let mut held = 0usize;
    let mut raw = Vec::new();

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw).trim_end_matches('\n').to_string();
                debug!(command = %command, "stderr: {}", line);
                held += line.len() + 1;
                lines.push_back(line);
                while held > STDERR_TAIL_BYTES {
                    match lines.pop_front() {
                        Some(dropped) => held -= dropped.len() + 1,
                        None => break,
                    }
                }
            }
            Err(e) => {
                warn!("Failed to read stderr of {}: {}", command, e);
                break;
            }
        }
    }

    let mut tail = Vec::from(lines).join("\n");
    if tail.len() > STDERR_TAIL_BYTES {
        let mut cut = tail.len() - STDERR_TAIL_BYTES;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
    tail
}

async fn kill(child: &mut Child, command: &str) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill {}: {}", command, e);
    }
}

fn finish(
    program: Program,
    rendered: &str,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> Result<CommandOutput> {
    if status.success() {
        return Ok(CommandOutput { stdout, stderr });
    }

    warn!("Command failed ({}): {}", status, rendered);
    let mut err = RodentError::command_failure(rendered, status.code(), &stderr);
    if !stdout.trim().is_empty() {
        err = err.with_metadata(meta::OUTPUT, stdout);
    }
    Err(classify::refine(program, err, &stderr))
}

fn died_of_broken_pipe(status: &ExitStatus, err: &RodentError) -> bool {
    use std::os::unix::process::ExitStatusExt;

    status.signal() == Some(SIGPIPE)
        || err
            .metadata_value(meta::STDERR)
            .is_some_and(|s| s.to_lowercase().contains("broken pipe"))
}

fn spawn_error(rendered: &str, e: io::Error) -> RodentError {
    let code = match e.kind() {
        io::ErrorKind::NotFound => ErrorCode::CommandNotFound,
        io::ErrorKind::PermissionDenied => ErrorCode::CommandPermission,
        _ => ErrorCode::CommandExecution,
    };
    RodentError::from_error(&e, code).with_metadata(meta::COMMAND, rendered)
}

fn wait_error(rendered: &str, e: io::Error) -> RodentError {
    RodentError::from_error(&e, ErrorCode::CommandExecution).with_metadata(meta::COMMAND, rendered)
}

fn pipe_error(rendered: &str, e: io::Error) -> RodentError {
    RodentError::from_error(&e, ErrorCode::CommandPipe).with_metadata(meta::COMMAND, rendered)
}

fn interruption_error(interrupted: Interrupted, rendered: &str) -> RodentError {
    match interrupted {
        Interrupted::Cancelled => {
            info!("Killed cancelled command: {}", rendered);
            RodentError::new(ErrorCode::ServerContextCancelled, "operation cancelled")
                .with_metadata(meta::COMMAND, rendered)
        }
        Interrupted::TimedOut(limit) => {
            info!("Killed command after {:?} timeout: {}", limit, rendered);
            RodentError::new(
                ErrorCode::CommandTimeout,
                format!("no exit after {}s", limit.as_secs_f64()),
            )
            .with_metadata(meta::COMMAND, rendered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::spec::ZfsSubcommand;
    use std::time::Instant;

    /// Executor whose "zfs" is /bin/sh, so specs read `sh -c <script>`
    fn shell_executor() -> CommandExecutor {
        CommandExecutor::new(ExecutorConfig {
            zfs_path: PathBuf::from("/bin/sh"),
            ssh_path: PathBuf::from("/bin/sh"),
            ..Default::default()
        })
    }

    fn script(body: &str) -> CommandSpec {
        CommandSpec::new(Program::Zfs).arg("-c").arg(body)
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let out = exec
            .run(&ctx, &script("printf 'tank\\ntank/a\\n'"), CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(out.stdout, "tank\ntank/a\n");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_split() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let spec = script("printf '%s|' \"$@\"")
            .arg("sh")
            .arg("a b")
            .arg("$(id)")
            .arg("; echo pwned");
        let out = exec.run(&ctx, &spec, CommandOptions::default()).await.unwrap();
        assert_eq!(out.stdout, "a b|$(id)|; echo pwned|");
    }

    #[tokio::test]
    async fn test_environment_is_applied() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let out = exec
            .run(&ctx, &script("printf %s \"$LC_ALL\""), CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(out.stdout, "C");
    }

    #[tokio::test]
    async fn test_failure_carries_diagnostics() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let err = exec
            .run(
                &ctx,
                &script("echo partial; echo 'something odd' >&2; exit 3"),
                CommandOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(err.has_code(ErrorCode::CommandExecution));
        assert_eq!(err.metadata_value(meta::EXIT_CODE), Some("3"));
        assert_eq!(err.metadata_value(meta::STDERR), Some("something odd"));
        assert_eq!(err.metadata_value(meta::OUTPUT), Some("partial\n"));
        assert!(err.metadata_value(meta::COMMAND).unwrap().starts_with("zfs -c"));
    }

    #[tokio::test]
    async fn test_failure_is_reclassified_from_stderr() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let err = exec
            .run(
                &ctx,
                &script("echo \"cannot open 'tank/x': dataset does not exist\" >&2; exit 1"),
                CommandOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(err.has_code(ErrorCode::ZfsDatasetNotFound));
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.metadata_value(meta::WRAPPED_CODE), Some("1301"));
    }

    #[tokio::test]
    async fn test_stderr_tail_is_bounded() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let out = exec
            .run(
                &ctx,
                &script("i=0; while [ $i -lt 3000 ]; do echo \"line $i xxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\" >&2; i=$((i+1)); done"),
                CommandOptions::default(),
            )
            .await
            .unwrap();

        assert!(out.stderr.len() <= STDERR_TAIL_BYTES);
        assert!(out.stderr.ends_with("line 2999 xxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"));
        assert!(!out.stderr.contains("line 0 "));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let exec = CommandExecutor::new(ExecutorConfig {
            zfs_path: PathBuf::from("/nonexistent/zfs"),
            ..Default::default()
        });
        let ctx = CancellationToken::new();

        let err = exec
            .run(&ctx, &CommandSpec::zfs(ZfsSubcommand::List), CommandOptions::default())
            .await
            .unwrap_err();
        assert!(err.has_code(ErrorCode::CommandNotFound));
    }

    #[tokio::test]
    async fn test_nul_argument_rejected() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let err = exec
            .run(&ctx, &script("true").arg("a\0b"), CommandOptions::default())
            .await
            .unwrap_err();
        assert!(err.has_code(ErrorCode::CommandInvalidInput));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let started = Instant::now();
        let err = exec
            .run(
                &ctx,
                &script("sleep 30"),
                CommandOptions::timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();

        assert!(err.has_code(ErrorCode::CommandTimeout));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let trigger = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = exec
            .run(&ctx, &script("sleep 30"), CommandOptions::unbounded())
            .await
            .unwrap_err();

        assert!(err.has_code(ErrorCode::ServerContextCancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_streaming_feeds_stdin() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let source: &[u8] = b"stream payload";
        let out = exec
            .run_streaming(&ctx, &script("cat"), source, CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(out.stdout, "stream payload");
    }

    #[tokio::test]
    async fn test_pipe_moves_stream() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("received");

        let producer = script("printf 'snapshot-bytes'");
        let consumer = script("cat > \"$0\"").arg(target.to_string_lossy().to_string());
        exec.pipe(&ctx, &producer, &consumer, CommandOptions::default())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "snapshot-bytes");
    }

    #[tokio::test]
    async fn test_pipe_blames_producer() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let producer = script("echo 'cannot send: dataset does not exist' >&2; exit 1");
        let consumer = script("cat > /dev/null; echo 'failed to read from stream' >&2; exit 1");
        let err = exec
            .pipe(&ctx, &producer, &consumer, CommandOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.metadata_value(PIPE_SIDE), Some("producer"));
        assert!(err.has_code(ErrorCode::ZfsDatasetNotFound));
    }

    #[tokio::test]
    async fn test_pipe_blames_consumer() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let producer = script("printf data");
        let consumer = script("cat > /dev/null; echo 'cannot receive: permission denied' >&2; exit 1");
        let err = exec
            .pipe(&ctx, &producer, &consumer, CommandOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.metadata_value(PIPE_SIDE), Some("consumer"));
        assert!(err.has_code(ErrorCode::ZfsPermissionDenied));
    }

    #[tokio::test]
    async fn test_pipe_cancellation_kills_both() {
        let exec = shell_executor();
        let ctx = CancellationToken::new();

        let trigger = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = exec
            .pipe(
                &ctx,
                &script("sleep 30"),
                &script("cat > /dev/null"),
                CommandOptions::unbounded(),
            )
            .await
            .unwrap_err();

        assert!(err.has_code(ErrorCode::ServerContextCancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
