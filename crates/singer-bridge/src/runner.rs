use crate::errors::{Error, Result};
use crate::record_counter::RecordCounter;
use crate::state::StateStore;
use crate::tap::Tap;
use crate::target::Target;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// How often a racing `wait_polling` call checks whether a child has exited.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Receives one already-decoded stderr line at a time from either child, tagged
/// with which plugin it came from. The runner's own stderr mirror and its
/// `tracing` logging both happen regardless of whether a sink is configured;
/// this is for callers who want their own copy (e.g. forwarding into a UI).
pub trait LogSink: Send + Sync {
    fn on_line(&self, plugin: &str, line: &str);
}

enum PluginKind {
    Tap,
    Target,
}

impl PluginKind {
    fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Tap => "tap",
            PluginKind::Target => "target",
        }
    }
}

/// Orchestrates one end-to-end extract-load run between a tap and a target:
/// streams tap stdout into target stdin, fans out both children's stderr to
/// logging, intercepts target stdout to persist state, and tallies RECORD
/// messages per stream.
pub struct Runner {
    tap: Tap,
    target: Target,
    state_store: StateStore,
    record_counter: RecordCounter,
    interpolation_values: BTreeMap<String, String>,
}

impl Runner {
    pub fn new(tap: Tap, target: Target, state_store: StateStore) -> Self {
        let now = chrono::Utc::now();
        let yesterday = now - chrono::Duration::days(1);
        let last_week = now - chrono::Duration::weeks(1);

        let mut interpolation_values = BTreeMap::new();
        interpolation_values.insert("NOW".to_string(), now.to_rfc3339());
        interpolation_values.insert("YESTERDAY".to_string(), yesterday.to_rfc3339());
        interpolation_values.insert("LAST_WEEK".to_string(), last_week.to_rfc3339());
        interpolation_values.insert("TAP_EXECUTABLE".to_string(), tap.executable().to_string());
        interpolation_values.insert(
            "TARGET_EXECUTABLE".to_string(),
            target.executable().to_string(),
        );
        interpolation_values.insert(
            "TAP_NAME".to_string(),
            tap.executable().replace('-', "_"),
        );
        interpolation_values.insert(
            "TARGET_NAME".to_string(),
            target.executable().replace('-', "_"),
        );

        Self {
            tap,
            target,
            state_store,
            record_counter: RecordCounter::new(),
            interpolation_values,
        }
    }

    pub fn interpolation_values(&self) -> &BTreeMap<String, String> {
        &self.interpolation_values
    }

    /// Stable across runs of the same tap/target pair: `"{tap}-{target}.json"`.
    pub fn state_file_name(&self) -> String {
        format!("{}-{}.json", self.tap.executable(), self.target.executable())
    }

    pub async fn record_counts(&self) -> HashMap<String, u64> {
        self.record_counter.snapshot().await
    }

    /// Runs one extract-load pipeline to completion. See the termination state
    /// machine in the design doc for exactly how tap/target exit ordering and
    /// capture-task failures interact.
    pub async fn run(&self, streams: Option<&[String]>, logger: Option<Arc<dyn LogSink>>) -> Result<()> {
        self.record_counter.reset().await;

        let state_file_name = self.state_file_name();
        let state = self.state_store.load(&state_file_name).await?;

        let tap_guard = self
            .tap
            .process(&state, streams, Some(&self.interpolation_values))
            .await?;
        let mut tap_child = tap_guard.child;

        let target_guard = self.target.process(Some(&self.interpolation_values)).await?;
        let mut target_child = target_guard.child;

        let tap_stdout = tap_child
            .stdout
            .take()
            .ok_or(Error::MissingIoPipe("tap stdout"))?;
        let tap_stderr = tap_child
            .stderr
            .take()
            .ok_or(Error::MissingIoPipe("tap stderr"))?;
        let target_stdin = target_child
            .stdin
            .take()
            .ok_or(Error::MissingIoPipe("target stdin"))?;
        let target_stdout = target_child
            .stdout
            .take()
            .ok_or(Error::MissingIoPipe("target stdout"))?;
        let target_stderr = target_child
            .stderr
            .take()
            .ok_or(Error::MissingIoPipe("target stderr"))?;

        let mut tap_child = Some(tap_child);
        let mut target_child = Some(target_child);

        let mut tap_to_target = Some(tokio::spawn(copy_tap_stdout_to_target(
            tap_stdout,
            target_stdin,
            self.record_counter.clone(),
        )));
        let mut tap_stderr_task = Some(tokio::spawn(fan_out_stderr(
            tap_stderr,
            PluginKind::Tap,
            logger.clone(),
        )));
        let mut target_stdout_task = Some(tokio::spawn(save_state_lines(
            target_stdout,
            self.state_store.clone(),
            state_file_name.clone(),
        )));
        let mut target_stderr_task = Some(tokio::spawn(fan_out_stderr(
            target_stderr,
            PluginKind::Target,
            logger.clone(),
        )));

        let mut tap_exit_status: Option<std::process::ExitStatus> = None;
        let mut target_exit_status: Option<std::process::ExitStatus> = None;
        let mut tap_forced_success = false;
        let mut first_error: Option<Error> = None;

        loop {
            let done = tap_exit_status.is_some()
                && target_exit_status.is_some()
                && tap_to_target.is_none()
                && tap_stderr_task.is_none()
                && target_stdout_task.is_none()
                && target_stderr_task.is_none();
            if done {
                break;
            }

            tokio::select! {
                status = tap_child.as_mut().unwrap().wait_polling(POLL_INTERVAL), if tap_exit_status.is_none() => {
                    tap_exit_status = Some(status?);
                }
                status = target_child.as_mut().unwrap().wait_polling(POLL_INTERVAL), if target_exit_status.is_none() => {
                    target_exit_status = Some(status?);
                }
                res = await_handle(&mut tap_to_target), if tap_to_target.is_some() => {
                    if let Err(e) = res {
                        first_error.get_or_insert(e);
                    }
                }
                res = await_handle(&mut tap_stderr_task), if tap_stderr_task.is_some() => {
                    if let Err(e) = res {
                        first_error.get_or_insert(e);
                    }
                }
                res = await_handle(&mut target_stdout_task), if target_stdout_task.is_some() => {
                    if let Err(e) = res {
                        first_error.get_or_insert(e);
                    }
                }
                res = await_handle(&mut target_stderr_task), if target_stderr_task.is_some() => {
                    if let Err(e) = res {
                        first_error.get_or_insert(e);
                    }
                }
            }

            if first_error.is_some() {
                break;
            }

            // TARGET_EXITED_FIRST: the target is gone, so there is no one left
            // to consume the tap's output. Kill it and stop forwarding; the tap
            // did not itself fail, so its exit code is not held against it.
            if target_exit_status.is_some() && tap_exit_status.is_none() {
                let mut child = tap_child.take().unwrap();
                let _ = child.kill();
                tap_exit_status = Some(child.wait().await?);
                tap_forced_success = true;
                if let Some(h) = tap_to_target.take() {
                    h.abort();
                }
                if let Some(h) = tap_stderr_task.take() {
                    h.abort();
                }
            }
        }

        if let Some(err) = first_error {
            if tap_exit_status.is_none() {
                if let Some(mut child) = tap_child.take() {
                    let _ = child.kill();
                    let _ = child.wait().await;
                }
            }
            if target_exit_status.is_none() {
                if let Some(mut child) = target_child.take() {
                    let _ = child.kill();
                    let _ = child.wait().await;
                }
            }
            for handle in [tap_to_target, tap_stderr_task, target_stdout_task, target_stderr_task] {
                if let Some(h) = handle {
                    h.abort();
                }
            }
            return Err(err);
        }

        let tap_failed = !tap_forced_success
            && tap_exit_status.map(|s| !s.success()).unwrap_or(false);
        let target_failed = target_exit_status.map(|s| !s.success()).unwrap_or(false);

        match (tap_failed, target_failed) {
            (true, true) => Err(Error::PipelineError("tap and target failed".to_string())),
            (true, false) => Err(Error::PipelineError("tap failed".to_string())),
            (false, true) => Err(Error::PipelineError("target failed".to_string())),
            (false, false) => Ok(()),
        }
    }

}

/// Polls a capture task's handle without consuming it until it actually
/// completes, so a `tokio::select!` iteration where this branch loses is
/// cancel-safe: the handle is only cleared (and the task considered done)
/// once its result is in hand, never merely because this future was polled
/// and then dropped.
async fn await_handle<T>(handle: &mut Option<tokio::task::JoinHandle<Result<T>>>) -> Result<T> {
    let joined = match handle {
        Some(h) => h.await,
        None => return std::future::pending().await,
    };
    *handle = None;
    match joined {
        Ok(res) => res,
        Err(e) => Err(e.into()),
    }
}

async fn copy_tap_stdout_to_target(
    tap_stdout: async_process::ChildStdio,
    mut target_stdin: async_process::ChildStdio,
    record_counter: RecordCounter,
) -> Result<()> {
    let mut lines = BufReader::new(tap_stdout).lines();
    while let Some(line) = lines.next_line().await? {
        record_counter.observe_line(&line).await;

        if let Err(e) = target_stdin.write_all(line.as_bytes()).await {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                // The target has already exited; not our failure to report.
                return Ok(());
            }
            return Err(e.into());
        }
        if target_stdin.write_all(b"\n").await.is_err() {
            return Ok(());
        }
    }
    Ok(())
}

async fn fan_out_stderr(
    stderr: impl tokio::io::AsyncRead + Unpin,
    plugin: PluginKind,
    logger: Option<Arc<dyn LogSink>>,
) -> Result<()> {
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines.next_line().await? {
        eprintln!("{}", line);
        tracing::info!(plugin = plugin.as_str(), "{}", line);
        if let Some(logger) = &logger {
            logger.on_line(plugin.as_str(), &line);
        }
    }
    Ok(())
}

async fn save_state_lines(
    stdout: async_process::ChildStdio,
    state_store: StateStore,
    state_file_name: String,
) -> Result<()> {
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: serde_json::Value = serde_json::from_str(&line)?;
        state_store.save(&state_file_name, &parsed).await?;
    }
    Ok(())
}
