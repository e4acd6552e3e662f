//! Builder for executing external tool commands.
//!
//! [`ToolCommand::execute`] captures everything and returns at exit.
//! [`ToolCommand::execute_streaming`] hands each diagnostic line to a
//! callback as it arrives while also buffering it for error extraction, and
//! can be aborted through a [`CancellationToken`].

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::progress::extract_error;

/// Default command timeout: 6 hours.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6 * 3600);

const READ_CHUNK: usize = 8 * 1024;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// Which pipe [`ToolCommand::execute_streaming`] reports line by line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamSource {
    /// ffmpeg writes its stats to stderr.
    #[default]
    Stderr,
    /// yt-dlp writes `--newline` progress to stdout.
    Stdout,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use cs_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> cs_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "quiet", "-print_format", "json", "-show_format"])
///     .arg("/path/to/video.mp4")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    stdin_data: Option<Vec<u8>>,
    stream: StreamSource,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            stdin_data: None,
            stream: StreamSource::Stderr,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Provide data to be written to the process's stdin.
    pub fn stdin(&mut self, data: Vec<u8>) -> &mut Self {
        self.stdin_data = Some(data);
        self
    }

    /// Select the pipe reported by [`execute_streaming`](Self::execute_streaming).
    pub fn stream_from(&mut self, source: StreamSource) -> &mut Self {
        self.stream = source;
        self
    }

    /// The argument vector, for logging and tests.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn spawn(&self, program_name: &str) -> cs_core::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if self.stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(tool = program_name, args = ?self.args, "Spawning tool");

        cmd.spawn()
            .map_err(|e| cs_core::Error::tool(program_name, format!("failed to spawn: {e}")))
    }

    /// Feed stdin on a separate task so a full pipe never stalls the reader.
    fn feed_stdin(&self, child: &mut Child, program_name: &str) {
        let (Some(data), Some(mut stdin)) = (self.stdin_data.clone(), child.stdin.take()) else {
            return;
        };
        let tool = program_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&data).await {
                tracing::debug!(tool = %tool, "failed to write stdin: {e}");
            }
            // Dropping stdin closes the pipe so the child can proceed.
        });
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`cs_core::Error::Tool`] if spawning fails, if the timeout expires
    ///   (the child is killed), or if the process exits non-zero. In the last
    ///   case the message is the line picked by [`extract_error`].
    pub async fn execute(&self) -> cs_core::Result<ToolOutput> {
        let program_name = self.program_name();
        let mut child = self.spawn(&program_name)?;
        self.feed_stdin(&mut child, &program_name);

        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(cs_core::Error::tool(
                        program_name,
                        extract_error(&tool_output.stderr),
                    ));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(cs_core::Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            // The dropped future owns the child; kill_on_drop reaps it.
            Err(_elapsed) => Err(cs_core::Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Execute the command, calling `on_line` for every line of the selected
    /// pipe as it arrives.
    ///
    /// Lines are split on both `\n` and `\r`, since ffmpeg rewrites its stats
    /// line in place. The reader runs on its own task and never waits on the
    /// callback. The full text is buffered for error extraction.
    ///
    /// # Errors
    ///
    /// - [`cs_core::Error::Cancelled`] if `cancel` fires; the child is killed.
    /// - [`cs_core::Error::Tool`] on spawn failure, timeout, or non-zero exit
    ///   (message from [`extract_error`] over the captured stderr).
    pub async fn execute_streaming<F>(
        &self,
        mut on_line: F,
        cancel: Option<&CancellationToken>,
    ) -> cs_core::Result<ToolOutput>
    where
        F: FnMut(&str) + Send,
    {
        let program_name = self.program_name();
        let mut child = self.spawn(&program_name)?;
        self.feed_stdin(&mut child, &program_name);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (streamed, other) = match self.stream {
            StreamSource::Stderr => (spawn_pipe_reader(stderr), collect_pipe(stdout)),
            StreamSource::Stdout => (spawn_pipe_reader(stdout), collect_pipe(stderr)),
        };
        let mut lines = streamed;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(cancelled);

        let mut streamed_text = String::new();

        // Phase 1: drain lines until the pipe closes.
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        on_line(&line);
                        streamed_text.push_str(&line);
                        streamed_text.push('\n');
                    }
                    None => break,
                },
                _ = &mut cancelled => {
                    kill_quietly(&mut child, &program_name).await;
                    return Err(cs_core::Error::Cancelled(format!("{program_name} was cancelled")));
                }
                _ = &mut deadline => {
                    kill_quietly(&mut child, &program_name).await;
                    return Err(cs_core::Error::tool(
                        program_name,
                        format!("timed out after {:?}", self.timeout),
                    ));
                }
            }
        }

        // Phase 2: the pipe is closed; wait for the exit status.
        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| {
                cs_core::Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
            })?,
            _ = &mut cancelled => {
                kill_quietly(&mut child, &program_name).await;
                return Err(cs_core::Error::Cancelled(format!("{program_name} was cancelled")));
            }
            _ = &mut deadline => {
                kill_quietly(&mut child, &program_name).await;
                return Err(cs_core::Error::tool(
                    program_name,
                    format!("timed out after {:?}", self.timeout),
                ));
            }
        };

        let other_text = other
            .await
            .map_err(|e| cs_core::Error::Internal(format!("pipe reader task failed: {e}")))?;

        let (stdout, stderr) = match self.stream {
            StreamSource::Stderr => (other_text, streamed_text),
            StreamSource::Stdout => (streamed_text, other_text),
        };

        if !status.success() {
            let diagnostic = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(cs_core::Error::tool(program_name, extract_error(diagnostic)));
        }

        Ok(ToolOutput {
            status,
            stdout,
            stderr,
        })
    }
}

async fn kill_quietly(child: &mut Child, program_name: &str) {
    if let Err(e) = child.kill().await {
        tracing::debug!(tool = program_name, "kill failed: {e}");
    }
}

/// Read a pipe on its own task, forwarding complete lines over a channel.
/// The channel is unbounded so the reader never blocks on the consumer.
fn spawn_pipe_reader<R>(pipe: Option<R>) -> mpsc::UnboundedReceiver<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(mut pipe) = pipe {
        tokio::spawn(async move {
            let mut splitter = LineSplitter::default();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match pipe.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        for line in splitter.push(&buf[..n]) {
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            if let Some(rest) = splitter.finish() {
                let _ = tx.send(rest);
            }
        });
    }
    rx
}

/// Read a pipe to the end on its own task.
fn collect_pipe<R>(pipe: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut bytes).await;
        }
        String::from_utf8_lossy(&bytes).to_string()
    })
}

/// Incremental splitter turning byte chunks into lines on `\n` or `\r`.
/// Empty lines are dropped.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk and collect every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).to_string());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    /// Flush the trailing partial line, if any.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).to_string())
        }
    }
}
