//! Status poller for delegated transactions.
//!
//! States: idle → active → {terminal, exhausted, cancelled}
//!
//! - One status query per interval, the first one interval after start
//! - `confirmed` / `failed` (any case, exact match) end the loop
//! - Query failures are skipped; the loop keeps going
//! - At most `max_attempts` queries per run
//!
//! The loop runs as a spawned task. Cancelling bumps a generation counter and
//! aborts the task under the same lock a tick takes to apply its reply, so a
//! reply that lands after cancellation is dropped.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use txflow_backend::{resolve_status, TransactionBackend};
use txflow_types::Hex;

/// Status values after which nothing changes any more.
pub const TERMINAL_STATUSES: [&str; 2] = ["confirmed", "failed"];

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            max_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollPhase {
    Idle,
    Active,
    Terminal,
    Exhausted,
    Cancelled,
}

/// The poller's view of one tracked transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollState {
    pub network_id: String,
    /// Displayed handle; replaced when a status reply carries a newer one.
    pub handle: Hex,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub current_status: String,
    pub terminal: bool,
    pub phase: PollPhase,
}

/// Identifies one run of the poller. Cancelling through a ticket from an
/// earlier run does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollTicket(u64);

/// Poll progress for reporting.
#[derive(Debug, Clone)]
pub enum PollEvent {
    Started { handle: Hex },
    Tick { attempt: u32, status: String, handle: Hex },
    Finished { phase: PollPhase, status: String },
}

/// Callback type for poll events. Run events are delivered while the poll
/// slot is locked, so a handler must not call back into the poller.
pub type PollEventHandler = Arc<dyn Fn(PollEvent) + Send + Sync>;

pub fn is_terminal_status(status: &str) -> bool {
    let lower = status.to_lowercase();
    TERMINAL_STATUSES.contains(&lower.as_str())
}

#[derive(Default)]
struct Slot {
    generation: u64,
    state: Option<PollState>,
}

fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the single poll slot of a flow.
pub struct StatusPoller {
    backend: Arc<dyn TransactionBackend>,
    config: PollConfig,
    slot: Arc<Mutex<Slot>>,
    task: Option<JoinHandle<()>>,
    on_event: Option<PollEventHandler>,
}

impl StatusPoller {
    pub fn new(backend: Arc<dyn TransactionBackend>, config: PollConfig) -> Self {
        Self {
            backend,
            config,
            slot: Arc::new(Mutex::new(Slot::default())),
            task: None,
            on_event: None,
        }
    }

    pub fn with_event_handler(mut self, handler: PollEventHandler) -> Self {
        self.on_event = Some(handler);
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    fn emit(&self, event: PollEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    /// Start tracking `handle`, cancelling any previous run first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, network_id: &str, handle: &str, initial_status: &str) -> PollTicket {
        self.cancel();

        let exhausted_up_front = self.config.max_attempts == 0;
        let generation = {
            let mut slot = lock_slot(&self.slot);
            slot.generation += 1;
            slot.state = Some(PollState {
                network_id: network_id.to_string(),
                handle: handle.to_string(),
                attempts_made: 0,
                max_attempts: self.config.max_attempts,
                interval_ms: self.config.interval_ms,
                current_status: initial_status.to_string(),
                terminal: false,
                phase: if exhausted_up_front {
                    PollPhase::Exhausted
                } else {
                    PollPhase::Active
                },
            });
            slot.generation
        };

        info!(network = network_id, handle, "status polling started");
        self.emit(PollEvent::Started {
            handle: handle.to_string(),
        });

        if !exhausted_up_front {
            let run = PollRun {
                backend: self.backend.clone(),
                slot: self.slot.clone(),
                generation,
                config: self.config.clone(),
                network_id: network_id.to_string(),
                handle: handle.to_string(),
                on_event: self.on_event.clone(),
            };
            self.task = Some(tokio::spawn(run.run()));
        }

        PollTicket(generation)
    }

    /// Stop the current run, if any. Returns whether an active run was stopped.
    pub fn cancel(&mut self) -> bool {
        let cancelled = {
            let mut slot = lock_slot(&self.slot);
            slot.generation += 1;
            match slot.state.as_mut() {
                Some(state) if state.phase == PollPhase::Active => {
                    state.phase = PollPhase::Cancelled;
                    Some(state.current_status.clone())
                }
                _ => None,
            }
        };
        if let Some(task) = self.task.take() {
            task.abort();
        }

        match cancelled {
            Some(status) => {
                debug!("status polling cancelled");
                self.emit(PollEvent::Finished {
                    phase: PollPhase::Cancelled,
                    status,
                });
                true
            }
            None => false,
        }
    }

    /// Cancel only if `ticket` still names the current run.
    pub fn cancel_ticket(&mut self, ticket: PollTicket) -> bool {
        if lock_slot(&self.slot).generation != ticket.0 {
            return false;
        }
        self.cancel()
    }

    /// Cancel and forget the tracked transaction.
    pub fn clear(&mut self) {
        self.cancel();
        lock_slot(&self.slot).state = None;
    }

    pub fn snapshot(&self) -> Option<PollState> {
        lock_slot(&self.slot).state.clone()
    }

    pub fn phase(&self) -> PollPhase {
        lock_slot(&self.slot)
            .state
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(PollPhase::Idle)
    }

    pub fn is_active(&self) -> bool {
        self.phase() == PollPhase::Active
    }

    /// Suspend until the current run stops on its own (terminal or exhausted).
    ///
    /// Dropping the returned future leaves the run attached, so `cancel` can
    /// still abort it.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.as_mut() {
            let _ = task.await;
            self.task = None;
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Everything a spawned run needs; owned by the task.
struct PollRun {
    backend: Arc<dyn TransactionBackend>,
    slot: Arc<Mutex<Slot>>,
    generation: u64,
    config: PollConfig,
    network_id: String,
    handle: String,
    on_event: Option<PollEventHandler>,
}

impl PollRun {
    fn emit(&self, event: PollEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    async fn run(self) {
        let interval = Duration::from_millis(self.config.interval_ms);
        let mut attempts = 0u32;

        loop {
            tokio::time::sleep(interval).await;
            attempts += 1;

            let reply = self
                .backend
                .transaction_status(&self.network_id, &self.handle)
                .await;

            let finished = {
                let mut slot = lock_slot(&self.slot);
                if slot.generation != self.generation {
                    debug!(attempt = attempts, "dropping status reply from a cancelled run");
                    return;
                }
                let Some(state) = slot.state.as_mut() else {
                    return;
                };

                state.attempts_made = attempts;
                match reply {
                    Ok(body) => {
                        let update = resolve_status(&body);
                        if let Some(handle) = update.handle {
                            state.handle = handle;
                        }
                        state.current_status = update.status;
                        if is_terminal_status(&state.current_status) {
                            state.terminal = true;
                            state.phase = PollPhase::Terminal;
                        }
                    }
                    Err(e) => {
                        debug!(attempt = attempts, error = %e, "status query failed, retrying");
                    }
                }
                if !state.terminal && attempts >= self.config.max_attempts {
                    state.phase = PollPhase::Exhausted;
                }

                // Still under the generation check: a concurrent cancel either
                // waits for these events or suppresses them.
                debug!(attempt = attempts, status = %state.current_status, "status tick");
                self.emit(PollEvent::Tick {
                    attempt: attempts,
                    status: state.current_status.clone(),
                    handle: state.handle.clone(),
                });

                if state.phase != PollPhase::Active {
                    info!(
                        phase = ?state.phase,
                        status = %state.current_status,
                        attempts,
                        "status polling finished"
                    );
                    self.emit(PollEvent::Finished {
                        phase: state.phase,
                        status: state.current_status.clone(),
                    });
                    true
                } else {
                    false
                }
            };

            if finished {
                return;
            }
        }
    }
}
