//! Supervision of the per-channel workers.
//!
//! The supervisor owns one worker thread per enabled channel. It restarts a
//! worker that exits unexpectedly (a worker only ever returns on Terminate,
//! so anything else is a bug or panic), fans control signals out to all
//! workers, and on shutdown posts Terminate everywhere and waits for each
//! worker to unwind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::control::{ControlSignal, SignalSlot};
use crate::error::SupervisorError;
use crate::worker::{ChannelConfig, ChannelWorker};

/// How often the monitor loop looks at worker liveness and pending signals.
const MONITOR_INTERVAL: Duration = Duration::from_millis(200);

struct WorkerHandle {
    channel: usize,
    slot: SignalSlot,
    join: Option<JoinHandle<()>>,
}

/// Owns and monitors the set of channel workers.
pub struct Supervisor {
    specs: Vec<ChannelConfig>,
    workers: Vec<WorkerHandle>,
    shutdown: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(specs: Vec<ChannelConfig>) -> Self {
        Self {
            specs,
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag observed by every worker; setting it initiates shutdown. Safe
    /// to store from a signal handler context.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Spawn one worker per configured channel.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        for spec in &self.specs {
            let slot = SignalSlot::new();
            let join = spawn_worker(spec.clone(), slot.clone(), self.shutdown.clone())?;
            self.workers.push(WorkerHandle {
                channel: spec.channel,
                slot,
                join: Some(join),
            });
        }
        info!(workers = self.workers.len(), "supervisor started");
        Ok(())
    }

    /// Deliver a control signal to every worker.
    pub fn signal_all(&self, signal: ControlSignal) {
        if signal == ControlSignal::Terminate {
            self.shutdown.store(true, Ordering::SeqCst);
        }
        for worker in &self.workers {
            worker.slot.post(signal);
        }
        debug!(?signal, "signal fanned out to all workers");
    }

    /// Monitor the workers until shutdown, then unwind them all.
    ///
    /// `pending` is polled each tick for externally translated control
    /// signals (the binary feeds OS signals through it).
    pub fn run(&mut self, mut pending: impl FnMut() -> Option<ControlSignal>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Some(signal) = pending() {
                info!(?signal, "control signal received");
                self.signal_all(signal);
                continue;
            }
            self.poll_workers();
            std::thread::sleep(MONITOR_INTERVAL);
        }
        self.join_all();
        info!("supervisor stopped");
    }

    /// Restart any worker that exited while we are not shutting down.
    fn poll_workers(&mut self) {
        for idx in 0..self.workers.len() {
            let finished = self.workers[idx]
                .join
                .as_ref()
                .is_some_and(JoinHandle::is_finished);
            if !finished {
                continue;
            }

            let channel = self.workers[idx].channel;
            if let Some(join) = self.workers[idx].join.take() {
                match join.join() {
                    Ok(()) => warn!(channel, "worker exited unexpectedly"),
                    Err(_) => error!(channel, "worker panicked"),
                }
            }

            let Some(spec) = self.specs.iter().find(|s| s.channel == channel) else {
                continue;
            };
            match spawn_worker(
                spec.clone(),
                self.workers[idx].slot.clone(),
                self.shutdown.clone(),
            ) {
                Ok(join) => {
                    info!(channel, "worker restarted");
                    self.workers[idx].join = Some(join);
                }
                Err(err) => error!(channel, error = %err, "worker restart failed"),
            }
        }
    }

    /// Post Terminate everywhere and wait for every worker to unwind.
    fn join_all(&mut self) {
        for worker in &self.workers {
            worker.slot.post(ControlSignal::Terminate);
        }
        for worker in &mut self.workers {
            if let Some(join) = worker.join.take() {
                if join.join().is_err() {
                    error!(channel = worker.channel, "worker panicked during shutdown");
                }
            }
        }
    }
}

fn spawn_worker(
    spec: ChannelConfig,
    slot: SignalSlot,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, SupervisorError> {
    let channel = spec.channel;
    std::thread::Builder::new()
        .name(format!("channel-{channel}"))
        .spawn(move || ChannelWorker::new(spec, slot, shutdown).run())
        .map_err(|source| SupervisorError::Spawn { channel, source })
}
