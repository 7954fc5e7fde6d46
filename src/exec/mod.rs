// dbvault/src/exec/mod.rs
pub(crate) mod docker_cli;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::pin::Pin;
use tokio::io::AsyncWrite;

pub use docker_cli::DockerCliExec;

/// One demultiplexed chunk of exec output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutput {
    Stdout(Bytes),
    Stderr(Bytes),
}

pub type ExecOutputStream = BoxStream<'static, std::io::Result<ExecOutput>>;
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Command to run inside a container and which stdio streams to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub argv: Vec<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

impl ExecSpec {
    /// stdout + stderr, no stdin.
    pub fn output_only(argv: Vec<String>) -> Self {
        Self {
            argv,
            attach_stdin: false,
            attach_stdout: true,
            attach_stderr: true,
        }
    }

    pub fn interactive(argv: Vec<String>) -> Self {
        Self {
            attach_stdin: true,
            ..Self::output_only(argv)
        }
    }
}

/// Live stdio of an attached exec session.
pub struct ExecAttachment {
    pub output: ExecOutputStream,
    /// Present only when the session was created with `attach_stdin`.
    /// Dropping or shutting it down signals end-of-input.
    pub input: Option<ExecInput>,
}

/// "Execute a command inside a running workload" primitive.
#[async_trait]
pub trait ContainerExec: Send + Sync {
    /// Registers a command for `container_id` and returns a session id.
    async fn exec_create(&self, container_id: &str, spec: ExecSpec) -> Result<String>;

    /// Starts the session and hands out its stdio.
    async fn exec_attach(&self, session_id: &str) -> Result<ExecAttachment>;

    /// Exit code of a finished session. Only meaningful once the output
    /// stream has been drained to its end.
    async fn exec_inspect(&self, session_id: &str) -> Result<i64>;

    /// Abandons a session whose I/O will not be consumed any further.
    async fn exec_kill(&self, session_id: &str) -> Result<()>;
}

const DEFAULT_CAPTURE_LIMIT: usize = 64 * 1024;

/// Bounded tail of command output, kept for error messages.
#[derive(Debug)]
pub struct OutputCapture {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self::with_limit(DEFAULT_CAPTURE_LIMIT)
    }
}

impl OutputCapture {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.limit {
            let excess = self.buf.len() - self.limit;
            self.buf.drain(..excess);
            self.truncated = true;
        }
    }

    pub fn into_text(self) -> String {
        let text = String::from_utf8_lossy(&self.buf).trim().to_string();
        if self.truncated {
            format!("[output truncated]\n{}", text)
        } else {
            text
        }
    }
}
