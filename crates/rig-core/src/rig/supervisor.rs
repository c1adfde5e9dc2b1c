//! The rig supervisor.
//!
//! Owns the full lifecycle of one deployed rig: starting monitors and
//! pre-trigger collectors, driving the shared polling clock, capturing
//! the first trip, sequencing actions after the trigger, assembling the
//! archive, and tearing everything down on signals or an administrative
//! destroy.
//!
//! Concurrency shape: one task per monitor, one clock task feeding them
//! ticks over a broadcast channel, one control-server task, and the
//! supervisor itself selecting over trip reports, destroy requests, and
//! signals. The trip record is the only cross-task datum and it is
//! write-once.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::archive::create_archive;
use super::state::{RigPhase, RigState};
use crate::action::ActionContext;
use crate::config::{RigFile, RigSettings};
use crate::control::server::{self, DestroyRequest};
use crate::error::RigError;
use crate::monitor::TripEvidence;
use crate::registry::{self, ActionInstance, MonitorInstance};
use crate::paths;

/// How a rig finished.
#[derive(Debug)]
pub enum RigOutcome {
    /// A monitor tripped and all actions completed.
    Completed { archive: Option<PathBuf> },
    /// Destroyed by an administrative request or a termination signal.
    Destroyed,
}

impl RigOutcome {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } => 0,
            Self::Destroyed => 4,
        }
    }
}

pub struct Rig {
    settings: RigSettings,
    state: Arc<RigState>,
    workdir: PathBuf,
    socket_path: PathBuf,
    monitors: Vec<MonitorInstance>,
    actions: Vec<ActionInstance>,
    listener: Option<std::os::unix::net::UnixListener>,
}

impl Rig {
    /// Validate a rigfile against the registry and build all instances.
    /// Every error out of here is a configuration error.
    pub fn prepare(file: &RigFile) -> Result<Self, RigError> {
        let settings = file.settings()?;
        let monitors = registry::build_monitors(&file.monitors)?;
        let actions = registry::build_actions(&file.actions)?;

        let monitor_names: Vec<String> = monitors.iter().map(|m| m.name.clone()).collect();
        let action_names: Vec<String> = actions.iter().map(|a| a.name.clone()).collect();
        let state = Arc::new(RigState::new(
            settings.name.clone(),
            &monitor_names,
            &action_names,
        ));

        let socket_path = paths::socket_path(&settings.name);
        let workdir = paths::workdir_path(&settings.name);

        Ok(Self {
            settings,
            state,
            workdir,
            socket_path,
            monitors,
            actions,
            listener: None,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// The rig's private working directory.
    #[must_use]
    pub fn workdir(&self) -> &std::path::Path {
        &self.workdir
    }

    #[must_use]
    pub fn state(&self) -> Arc<RigState> {
        Arc::clone(&self.state)
    }

    /// Relocate the socket and working directory, for embedding the
    /// supervisor outside the well-known bases (primarily tests).
    pub fn override_paths(&mut self, socket_path: PathBuf, workdir: PathBuf) {
        self.socket_path = socket_path;
        self.workdir = workdir;
    }

    /// Claim the control socket and create the working directory.
    ///
    /// Runs before detaching so a name collision is reported to the
    /// operator synchronously. A socket file nobody answers on is
    /// stale and is reclaimed.
    pub fn bind(&mut self) -> Result<(), RigError> {
        if let Some(dir) = self.socket_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                RigError::deploy(format!("cannot create socket directory: {e}"))
            })?;
        }

        if self.socket_path.exists() {
            if std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok() {
                return Err(RigError::deploy(format!(
                    "a rig named '{}' is already running",
                    self.settings.name
                )));
            }
            debug!(socket = %self.socket_path.display(), "reclaiming stale socket");
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                RigError::deploy(format!("cannot remove stale socket: {e}"))
            })?;
        }

        let listener = std::os::unix::net::UnixListener::bind(&self.socket_path)
            .map_err(|e| RigError::deploy(format!("cannot bind control socket: {e}")))?;
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(
                &self.socket_path,
                std::fs::Permissions::from_mode(0o600),
            );
        }

        if self.workdir.exists() {
            // Leftover from a rig that died without cleanup; its socket
            // was stale too, so the data is orphaned.
            let _ = std::fs::remove_dir_all(&self.workdir);
        }
        std::fs::create_dir_all(&self.workdir).map_err(|e| {
            RigError::deploy(format!("cannot create working directory: {e}"))
        })?;

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the rig to completion. Consumes the rig; the process exits
    /// shortly after this returns.
    pub async fn run(mut self) -> Result<RigOutcome, RigError> {
        let std_listener = self
            .listener
            .take()
            .ok_or_else(|| RigError::runtime("rig was not bound before run"))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| RigError::runtime(format!("socket setup failed: {e}")))?;
        let listener = tokio::net::UnixListener::from_std(std_listener)
            .map_err(|e| RigError::runtime(format!("socket setup failed: {e}")))?;

        let state = Arc::clone(&self.state);
        let settings = self.settings.clone();
        let ctx = ActionContext {
            rig_name: settings.name.clone(),
            workdir: self.workdir.clone(),
            interval: settings.interval,
        };
        let workdir = self.workdir.clone();
        let socket_path = self.socket_path.clone();
        let mut actions = std::mem::take(&mut self.actions);
        let mut monitors = std::mem::take(&mut self.monitors);

        info!(
            rig = %settings.name,
            pid = state.pid,
            interval = settings.interval.as_secs(),
            "initializing rig"
        );
        state.set_phase(RigPhase::Initializing);

        // Open monitor sources.
        for monitor in &mut monitors {
            if let Err(e) = monitor.inner.start().await {
                error!(monitor = %monitor.name, error = %e, "monitor failed to start");
                cleanup_files(&socket_path, &workdir, true);
                return Err(RigError::deploy(format!(
                    "monitor '{}' failed to start: {e}",
                    monitor.name
                )));
            }
        }

        // Probe and start every action; pre-trigger collectors begin
        // gathering here. Any failure aborts the deployment.
        state.set_phase(RigPhase::PreTriggerRunning);
        for i in 0..actions.len() {
            if let Err(e) = actions[i].inner.pre_start(&ctx).await {
                error!(action = %actions[i].name, error = %e, "action failed pre-start");
                stop_pre_trigger(&mut actions[..=i], &ctx, &state).await;
                cleanup_files(&socket_path, &workdir, true);
                return Err(RigError::deploy(format!(
                    "action '{}' failed to start: {e}",
                    actions[i].name
                )));
            }
            if actions[i].pre_trigger {
                state.set_action_state(&actions[i].name, "collecting");
            }
        }

        // Control plane.
        let shutdown = CancellationToken::new();
        let (destroy_tx, mut destroy_rx) = mpsc::channel::<DestroyRequest>(4);
        let server: JoinHandle<()> = tokio::spawn(server::serve(
            listener,
            Arc::clone(&state),
            destroy_tx,
            shutdown.clone(),
        ));

        // Signals: TERM and INT begin orderly shutdown, HUP is ignored.
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| RigError::runtime(format!("cannot install SIGTERM handler: {e}")))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| RigError::runtime(format!("cannot install SIGINT handler: {e}")))?;
        let mut sighup = signal(SignalKind::hangup())
            .map_err(|e| RigError::runtime(format!("cannot install SIGHUP handler: {e}")))?;

        // Polling clock plus one polling task per monitor.
        let poll_cancel = CancellationToken::new();
        let (tick_tx, _) = broadcast::channel::<u64>(8);
        let (trip_tx, mut trip_rx) = mpsc::channel::<TripEvidence>(monitors.len().max(1));

        let mut monitor_tasks = JoinSet::new();
        for mut instance in monitors {
            let mut tick_rx = tick_tx.subscribe();
            let trip_tx = trip_tx.clone();
            let cancel = poll_cancel.clone();
            let state = Arc::clone(&state);
            monitor_tasks.spawn(async move {
                debug!(monitor = %instance.name, "watching: {}", instance.inner.describe());
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        tick = tick_rx.recv() => {
                            match tick {
                                Err(broadcast::error::RecvError::Closed) => break,
                                // A poll slower than the interval skips
                                // the ticks it slept through.
                                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                                Ok(_) => {}
                            }
                            match instance.inner.poll().await {
                                Ok(Some(evidence)) => {
                                    state.set_monitor_state(&instance.name, "tripped");
                                    let _ = trip_tx.send(evidence).await;
                                    // A monitor trips at most once.
                                    break;
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!(monitor = %instance.name, error = %e,
                                          "poll failed, retrying next tick");
                                }
                            }
                        }
                    }
                }
                instance.inner.stop().await;
            });
        }
        drop(trip_tx);

        {
            let cancel = poll_cancel.clone();
            let interval = settings.interval;
            let tick_tx = tick_tx.clone();
            monitor_tasks.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut tick = 0u64;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            tick += 1;
                            let _ = tick_tx.send(tick);
                        }
                    }
                }
            });
        }

        state.set_phase(RigPhase::Polling);
        info!(rig = %settings.name, "rig ready, polling");

        // Wait for the first trip, a destroy, or a signal. A closed
        // trip channel means every monitor ran out of sources: the rig
        // is permanently untrippable but not dead, so it keeps serving
        // its control socket until destroyed.
        let mut monitors_exhausted = false;
        let evidence = loop {
            tokio::select! {
                trip = trip_rx.recv(), if !monitors_exhausted => {
                    match trip {
                        Some(evidence) => break evidence,
                        None => {
                            warn!("all monitors exhausted, rig is untrippable");
                            monitors_exhausted = true;
                        }
                    }
                }
                Some(req) = destroy_rx.recv() => {
                    info!(force = req.force, "destroy requested");
                    return teardown_destroyed(
                        &mut actions, &ctx, &state, &poll_cancel,
                        &shutdown, server, &socket_path, &workdir,
                    ).await;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, destroying rig");
                    return teardown_destroyed(
                        &mut actions, &ctx, &state, &poll_cancel,
                        &shutdown, server, &socket_path, &workdir,
                    ).await;
                }
                _ = sigint.recv() => {
                    info!("SIGINT received, destroying rig");
                    return teardown_destroyed(
                        &mut actions, &ctx, &state, &poll_cancel,
                        &shutdown, server, &socket_path, &workdir,
                    ).await;
                }
                _ = sighup.recv() => {
                    debug!("SIGHUP ignored");
                }
            }
        };

        // Triggered. The first trip is the trigger source; anything
        // else that tripped in the same tick is recorded as extra
        // evidence only.
        info!(
            monitor = %evidence.monitor,
            source = %evidence.source,
            detail = %evidence.detail,
            "rig triggered"
        );
        state.record_trigger(evidence);
        state.set_phase(RigPhase::Triggered);
        while let Ok(extra) = trip_rx.try_recv() {
            info!(
                monitor = %extra.monitor,
                detail = %extra.detail,
                "additional monitor tripped in the same tick"
            );
        }
        poll_cancel.cancel();

        // Optional quiet period before collection; pre-trigger samplers
        // keep gathering through it.
        if !settings.delay.is_zero() {
            debug!(delay = settings.delay.as_secs(), "delaying actions");
            tokio::select! {
                () = tokio::time::sleep(settings.delay) => {}
                Some(req) = destroy_rx.recv() => {
                    info!(force = req.force, "destroy requested during delay");
                    return teardown_destroyed(
                        &mut actions, &ctx, &state, &poll_cancel,
                        &shutdown, server, &socket_path, &workdir,
                    ).await;
                }
                _ = sigterm.recv() => {
                    return teardown_destroyed(
                        &mut actions, &ctx, &state, &poll_cancel,
                        &shutdown, server, &socket_path, &workdir,
                    ).await;
                }
                _ = sigint.recv() => {
                    return teardown_destroyed(
                        &mut actions, &ctx, &state, &poll_cancel,
                        &shutdown, server, &socket_path, &workdir,
                    ).await;
                }
            }
        }

        // Stop collectors before any post-trigger action runs.
        stop_pre_trigger(&mut actions, &ctx, &state).await;

        // Serial action execution: priority ascending, rigfile order
        // breaking ties. Later actions may assume earlier ones are done.
        state.set_phase(RigPhase::Collecting);
        let mut pending_destroy = false;
        for index in 0..actions.len() {
            if actions[index].pre_trigger {
                continue;
            }
            if actions[index].preempts_cleanup {
                // The host will not come back from this one; drop the
                // control socket now so it does not go stale.
                shutdown.cancel();
                let _ = std::fs::remove_file(&socket_path);
            }

            let name = actions[index].name.clone();
            let fatal = actions[index].fatal_on_error;
            state.set_action_state(&name, "running");
            info!(action = %name, "triggering action");

            // Scoped so the pinned future (and its borrow of the
            // action) is gone before any teardown path touches the
            // action list again.
            let result = {
                let run = run_action(&mut actions[index], &ctx, &settings);
                tokio::pin!(run);
                loop {
                    tokio::select! {
                        result = &mut run => break Some(result),
                        Some(req) = destroy_rx.recv() => {
                            info!(force = req.force, "destroy requested during collection");
                            if req.force {
                                break None;
                            }
                            // Let the in-flight action finish, then stop.
                            pending_destroy = true;
                        }
                        _ = sigterm.recv() => break None,
                        _ = sigint.recv() => break None,
                    }
                }
            };

            match result {
                None => {
                    // Killed mid-action; child processes die with the
                    // dropped future.
                    state.set_action_state(&name, "killed");
                    return teardown_destroyed(
                        &mut actions, &ctx, &state, &poll_cancel,
                        &shutdown, server, &socket_path, &workdir,
                    ).await;
                }
                Some(Ok(())) => {
                    state.set_action_state(&name, "done");
                }
                Some(Err(e)) if fatal => {
                    error!(action = %name, error = %e, "action failed fatally");
                    state.set_action_state(&name, "failed");
                    state.set_phase(RigPhase::Failed);
                    cleanup_control(&shutdown, server, &socket_path).await;
                    return Err(RigError::runtime(format!("action '{name}' failed: {e}")));
                }
                Some(Err(e)) => {
                    // Non-fatal: log, skip, keep going.
                    error!(action = %name, error = %e, "action failed, continuing");
                    state.set_action_state(&name, "failed");
                }
            }

            if pending_destroy {
                return teardown_destroyed(
                    &mut actions, &ctx, &state, &poll_cancel,
                    &shutdown, server, &socket_path, &workdir,
                ).await;
            }
        }

        // Archive and clean up.
        let archive = if settings.no_archive {
            info!("not creating a tar archive of collected data");
            None
        } else {
            state.set_phase(RigPhase::Archiving);
            let path = create_archive(&workdir, &settings.name)?;
            std::fs::remove_dir_all(&workdir).map_err(|e| {
                RigError::runtime(format!("cannot remove working directory: {e}"))
            })?;
            Some(path)
        };

        state.set_phase(RigPhase::Finished);
        info!(rig = %settings.name, "rig finished");
        cleanup_control(&shutdown, server, &socket_path).await;
        Ok(RigOutcome::Completed { archive })
    }
}

/// Run one action, iterating for repeatable actions when the rig-wide
/// repeat count asks for it.
async fn run_action(
    instance: &mut ActionInstance,
    ctx: &ActionContext,
    settings: &RigSettings,
) -> Result<(), crate::error::ActionError> {
    let iterations = if instance.repeatable {
        1 + settings.repeat
    } else {
        1
    };
    for iteration in 1..=iterations {
        if iteration > 1 {
            tokio::time::sleep(settings.repeat_delay).await;
            info!(
                action = %instance.name,
                iteration,
                total = iterations,
                "triggering action again"
            );
        }
        instance.inner.run(ctx).await?;
    }
    Ok(())
}

/// Stop pre-trigger collectors in reverse priority order. Idempotent:
/// every action's `stop` tolerates being called twice.
async fn stop_pre_trigger(
    actions: &mut [ActionInstance],
    ctx: &ActionContext,
    state: &RigState,
) {
    for instance in actions.iter_mut().rev() {
        if !instance.pre_trigger {
            continue;
        }
        debug!(action = %instance.name, "stopping pre-trigger action");
        if let Err(e) = instance.inner.stop(ctx).await {
            warn!(action = %instance.name, error = %e, "pre-trigger stop failed");
        }
        state.set_action_state(&instance.name, "stopped");
    }
}

/// Shut the control server down and remove the socket file.
async fn cleanup_control(
    shutdown: &CancellationToken,
    server: JoinHandle<()>,
    socket_path: &std::path::Path,
) {
    shutdown.cancel();
    let _ = server.await;
    let _ = std::fs::remove_file(socket_path);
}

/// Remove the on-disk footprint. The socket always goes; the working
/// directory goes unless the caller wants it preserved.
fn cleanup_files(socket_path: &std::path::Path, workdir: &std::path::Path, remove_workdir: bool) {
    let _ = std::fs::remove_file(socket_path);
    if remove_workdir {
        let _ = std::fs::remove_dir_all(workdir);
    }
}

/// Orderly teardown for an external destroy or a termination signal.
#[allow(clippy::too_many_arguments)]
async fn teardown_destroyed(
    actions: &mut [ActionInstance],
    ctx: &ActionContext,
    state: &Arc<RigState>,
    poll_cancel: &CancellationToken,
    shutdown: &CancellationToken,
    server: JoinHandle<()>,
    socket_path: &std::path::Path,
    workdir: &std::path::Path,
) -> Result<RigOutcome, RigError> {
    poll_cancel.cancel();
    stop_pre_trigger(actions, ctx, state).await;
    cleanup_control(shutdown, server, socket_path).await;
    cleanup_files(socket_path, workdir, true);
    info!(rig = %state.name, "rig destroyed");
    Ok(RigOutcome::Destroyed)
}
