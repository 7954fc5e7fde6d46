// dbvault/src/exec/docker_cli.rs
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::{Child, Command};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ContainerExec, ExecAttachment, ExecInput, ExecOutput, ExecOutputStream, ExecSpec};

enum Session {
    Created { container_id: String, spec: ExecSpec },
    Running(Child),
}

/// Exec bridge that drives `docker exec` through the docker CLI.
///
/// The CLI keeps stdout and stderr on separate pipes, so demultiplexing is
/// just tagging each pipe's chunks. `docker exec` exits with the exit code
/// of the command it ran.
pub struct DockerCliExec {
    docker: PathBuf,
    global_args: Vec<String>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl DockerCliExec {
    /// `global_args` go before `exec`, e.g. `["--context", "prod"]`.
    pub fn new(docker: PathBuf, global_args: Vec<String>) -> Self {
        Self {
            docker,
            global_args,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn command_args(&self, container_id: &str, spec: &ExecSpec) -> Vec<String> {
        let mut args = self.global_args.clone();
        args.push("exec".to_string());
        if spec.attach_stdin {
            args.push("-i".to_string());
        }
        args.push(container_id.to_string());
        args.extend(spec.argv.iter().cloned());
        args
    }

    fn take_session(&self, session_id: &str) -> Result<Option<Session>> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("exec session table is poisoned"))?;
        Ok(sessions.remove(session_id))
    }

    fn put_session(&self, session_id: String, session: Session) -> Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("exec session table is poisoned"))?;
        sessions.insert(session_id, session);
        Ok(())
    }
}

fn stdio(attached: bool) -> Stdio {
    if attached { Stdio::piped() } else { Stdio::null() }
}

#[async_trait]
impl ContainerExec for DockerCliExec {
    async fn exec_create(&self, container_id: &str, spec: ExecSpec) -> Result<String> {
        if spec.argv.is_empty() {
            anyhow::bail!("Cannot create an exec session without a command");
        }
        if container_id.trim().is_empty() {
            anyhow::bail!("Cannot create an exec session without a container id");
        }

        let session_id = Uuid::new_v4().to_string();
        debug!(session_id = %session_id, container_id, command = %spec.argv[0], "created exec session");
        self.put_session(
            session_id.clone(),
            Session::Created {
                container_id: container_id.to_string(),
                spec,
            },
        )?;
        Ok(session_id)
    }

    async fn exec_attach(&self, session_id: &str) -> Result<ExecAttachment> {
        let (container_id, spec) = match self.take_session(session_id)? {
            Some(Session::Created { container_id, spec }) => (container_id, spec),
            Some(running @ Session::Running(_)) => {
                self.put_session(session_id.to_string(), running)?;
                anyhow::bail!("Exec session {} is already attached", session_id);
            }
            None => anyhow::bail!("Unknown exec session {}", session_id),
        };

        let mut child = Command::new(&self.docker)
            .args(self.command_args(&container_id, &spec))
            .stdin(stdio(spec.attach_stdin))
            .stdout(stdio(spec.attach_stdout))
            .stderr(stdio(spec.attach_stderr))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to run {} exec in container {}",
                    self.docker.display(),
                    container_id
                )
            })?;

        let stdout = child
            .stdout
            .take()
            .map(|pipe| ReaderStream::new(pipe).map(|r| r.map(ExecOutput::Stdout)).boxed());
        let stderr = child
            .stderr
            .take()
            .map(|pipe| ReaderStream::new(pipe).map(|r| r.map(ExecOutput::Stderr)).boxed());
        let output: ExecOutputStream = match (stdout, stderr) {
            (Some(out), Some(err)) => futures::stream::select(out, err).boxed(),
            (Some(out), None) => out,
            (None, Some(err)) => err,
            (None, None) => futures::stream::empty().boxed(),
        };
        let input = child.stdin.take().map(|pipe| Box::pin(pipe) as ExecInput);

        self.put_session(session_id.to_string(), Session::Running(child))?;
        Ok(ExecAttachment { output, input })
    }

    async fn exec_inspect(&self, session_id: &str) -> Result<i64> {
        let mut child = match self.take_session(session_id)? {
            Some(Session::Running(child)) => child,
            Some(created @ Session::Created { .. }) => {
                self.put_session(session_id.to_string(), created)?;
                anyhow::bail!("Exec session {} was never attached", session_id);
            }
            None => anyhow::bail!("Unknown exec session {}", session_id),
        };

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for exec session {}", session_id))?;
        // Killed by a signal: no exit code.
        Ok(status.code().map(i64::from).unwrap_or(-1))
    }

    async fn exec_kill(&self, session_id: &str) -> Result<()> {
        if let Some(Session::Running(mut child)) = self.take_session(session_id)? {
            if let Err(e) = child.start_kill() {
                warn!(session_id, error = %e, "failed to kill exec session");
            }
            child
                .wait()
                .await
                .with_context(|| format!("Failed to reap exec session {}", session_id))?;
        }
        Ok(())
    }
}
