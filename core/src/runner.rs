//! Runner: executes one Run according to its TaskProfile's `kind`, bounded
//! by the profile's timeout and cooperative cancellation.
//!
//! `script` kind spawns a subprocess in its own process group (mirroring a
//! monitoring agent's external-process tasks, generalized to arbitrary
//! scripts rather than fixed probes); `agentic` and `interactive_wrapper`
//! both dispatch into a registered `AgenticTaskBody` trait object, the
//! difference being only in what kind of `RunOutcome` the body is expected
//! to produce (interactive bodies may return a `waiting_contract`).

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::model::{error_markers, RunOutcome, RunStatus, TaskKind, TaskProfile};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Everything an executing Run needs, independent of which kind it is.
pub struct RunnerContext {
    pub run_id: String,
    pub profile: TaskProfile,
    pub payload: Value,
    pub cancel: CancellationToken,
    pub log_path: PathBuf,
}

/// The seam external agentic/interactive task bodies implement. Task bodies
/// themselves are outside this crate's scope (per the data model's
/// Non-goals) — this trait is the contract a registrant provides.
#[async_trait]
pub trait AgenticTaskBody: Send + Sync {
    async fn run(&self, ctx: &RunnerContext) -> shared::Result<RunOutcome>;
}

/// Looks up a task body by `TaskProfile.entrypoint` for `agentic` and
/// `interactive_wrapper` profiles. A profile naming an unregistered
/// entrypoint fails the Run rather than panicking.
#[derive(Default)]
pub struct AgenticRegistry {
    bodies: HashMap<String, Arc<dyn AgenticTaskBody>>,
}

impl AgenticRegistry {
    pub fn new() -> Self {
        AgenticRegistry::default()
    }

    pub fn register(&mut self, entrypoint: impl Into<String>, body: Arc<dyn AgenticTaskBody>) {
        self.bodies.insert(entrypoint.into(), body);
    }

    pub fn get(&self, entrypoint: &str) -> Option<Arc<dyn AgenticTaskBody>> {
        self.bodies.get(entrypoint).cloned()
    }
}

/// Bounded grace period given to an in-flight execution to tear itself down
/// after cancellation or timeout before the Runner gives up waiting on it.
const TEARDOWN_BUDGET: Duration = Duration::from_secs(10);

pub struct Runner {
    registry: Arc<AgenticRegistry>,
}

impl Runner {
    pub fn new(registry: Arc<AgenticRegistry>) -> Self {
        Runner { registry }
    }

    /// Executes `ctx` to completion, a timeout, or a cancellation signal,
    /// whichever comes first, always producing a `RunOutcome` rather than
    /// propagating an error — a Runner failure is itself an outcome
    /// (`status: failed`) for the Dispatcher to persist.
    pub async fn execute(&self, ctx: RunnerContext) -> RunOutcome {
        let timeout_dur = Duration::from_secs(ctx.profile.timeout_sec.max(1));
        let body = self.execute_inner(&ctx);
        tokio::pin!(body);

        tokio::select! {
            outcome = &mut body => outcome,
            _ = tokio::time::sleep(timeout_dur) => {
                warn!(run_id = %ctx.run_id, timeout_sec = ctx.profile.timeout_sec, "run exceeded timeout, cancelling");
                ctx.cancel.cancel();
                wait_for_teardown(&mut body).await;
                RunOutcome {
                    status: RunStatus::Failed,
                    summary: None,
                    error: Some(error_markers::TIMEOUT.to_string()),
                    artifacts: None,
                    waiting_contract: None,
                }
            }
            _ = ctx.cancel.cancelled() => {
                wait_for_teardown(&mut body).await;
                RunOutcome {
                    status: RunStatus::Blocked,
                    summary: None,
                    error: Some(error_markers::KILLED.to_string()),
                    artifacts: None,
                    waiting_contract: None,
                }
            }
        }
    }

    async fn execute_inner(&self, ctx: &RunnerContext) -> RunOutcome {
        match ctx.profile.kind {
            TaskKind::Script => self.run_script(ctx).await,
            TaskKind::Agentic | TaskKind::InteractiveWrapper => self.run_agentic(ctx).await,
        }
    }

    async fn run_script(&self, ctx: &RunnerContext) -> RunOutcome {
        let run_context = json!({
            "run_id": ctx.run_id,
            "task_id": ctx.profile.task_id,
            "payload": ctx.payload,
        })
        .to_string();

        let mut command = tokio::process::Command::new(&ctx.profile.entrypoint);
        command
            .env("ZUBOT_RUN_CONTEXT", run_context)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RunOutcome {
                    status: RunStatus::Failed,
                    summary: None,
                    error: Some(format!("spawn failed: {e}")),
                    artifacts: None,
                    waiting_contract: None,
                };
            }
        };

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let log_path = ctx.log_path.clone();
        let copy_task = tokio::spawn(async move { pipe_to_log(stdout, stderr, log_path).await });

        tokio::select! {
            status = child.wait() => {
                let tail = copy_task.await.unwrap_or_default();
                match status {
                    Ok(status) if status.success() => RunOutcome {
                        status: RunStatus::Done,
                        summary: Some(shared::utils::truncate_string(&tail, 2000)),
                        error: None,
                        artifacts: None,
                        waiting_contract: None,
                    },
                    Ok(status) => RunOutcome {
                        status: RunStatus::Failed,
                        summary: Some(shared::utils::truncate_string(&tail, 2000)),
                        error: Some(format!("script exited with {}", format_exit(&status))),
                        artifacts: None,
                        waiting_contract: None,
                    },
                    Err(e) => RunOutcome {
                        status: RunStatus::Failed,
                        summary: None,
                        error: Some(format!("waiting for script failed: {e}")),
                        artifacts: None,
                        waiting_contract: None,
                    },
                }
            }
            _ = ctx.cancel.cancelled() => {
                terminate_process_group(pid).await;
                let _ = child.wait().await;
                copy_task.abort();
                RunOutcome {
                    status: RunStatus::Blocked,
                    summary: None,
                    error: Some(error_markers::KILLED.to_string()),
                    artifacts: None,
                    waiting_contract: None,
                }
            }
        }
    }

    async fn run_agentic(&self, ctx: &RunnerContext) -> RunOutcome {
        let Some(body) = self.registry.get(&ctx.profile.entrypoint) else {
            return RunOutcome {
                status: RunStatus::Failed,
                summary: None,
                error: Some(format!(
                    "no agentic task body registered for entrypoint '{}'",
                    ctx.profile.entrypoint
                )),
                artifacts: None,
                waiting_contract: None,
            };
        };

        match body.run(ctx).await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome {
                status: RunStatus::Failed,
                summary: None,
                error: Some(e.to_string()),
                artifacts: None,
                waiting_contract: None,
            },
        }
    }
}

/// Gives an in-flight `execute_inner` future a bounded chance to finish
/// its own teardown (a `run_script` child reacting to `ctx.cancel`, or a
/// cooperative agentic body observing it at its next suspension point)
/// before the Runner abandons it.
async fn wait_for_teardown(body: &mut (impl std::future::Future<Output = RunOutcome> + Unpin)) {
    if tokio::time::timeout(TEARDOWN_BUDGET, body).await.is_err() {
        error!("run did not finish teardown within budget, abandoning its future");
    }
}

#[cfg(unix)]
async fn terminate_process_group(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    let pgid = Pid::from_raw(-(pid as i32));
    if kill(pgid, Signal::SIGTERM).is_err() {
        debug!(pid, "SIGTERM to process group failed, process may have already exited");
        return;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    let _ = kill(pgid, Signal::SIGKILL);
}

#[cfg(not(unix))]
async fn terminate_process_group(_pid: Option<u32>) {}

fn format_exit(status: &std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Copies stdout/stderr to `log_path` as they arrive and returns the
/// combined tail, used as the Run's `summary` when a script doesn't
/// otherwise produce one.
async fn pipe_to_log(
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    log_path: PathBuf,
) -> String {
    let mut file = match tokio::fs::File::create(&log_path).await {
        Ok(f) => f,
        Err(e) => {
            error!(path = %log_path.display(), error = %e, "failed to open run log file");
            return String::new();
        }
    };

    let mut combined = String::new();
    if let Some(mut stdout) = stdout {
        let mut buf = Vec::new();
        if stdout.read_to_end(&mut buf).await.is_ok() {
            let _ = file.write_all(&buf).await;
            combined.push_str(&String::from_utf8_lossy(&buf));
        }
    }
    if let Some(mut stderr) = stderr {
        let mut buf = Vec::new();
        if stderr.read_to_end(&mut buf).await.is_ok() {
            let _ = file.write_all(&buf).await;
            combined.push_str(&String::from_utf8_lossy(&buf));
        }
    }
    let _ = file.flush().await;
    combined.trim().to_string()
}

#[cfg(test)]
#[path = "tests/runner_tests.rs"]
mod tests;
