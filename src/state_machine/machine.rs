use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::context::epoch_seconds;
use super::{Event, HandlerRegistry, State, StateContext, Target, TransitionTable};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::recovery::{ErrorContext, ErrorType, Failure, RecoveryEngine, Severity};
use crate::work_item::WorkItem;

/// Called with the state being entered or left.
pub type StateCallback = Box<dyn Fn(State, &StateContext) + Send>;

/// Counters that survive [`StateMachine::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineStats {
    pub items_started: u64,
    pub items_resumed: u64,
    pub items_completed: u64,
    pub items_failed: u64,
    pub recoveries: u64,
}

/// Drives one work item at a time through the registered handlers.
///
/// Handlers return events; the transition table decides the next state.
/// Handler failures go through the recovery engine, which either sends the
/// machine through RETRYING back into the failed state or into ERROR.
pub struct StateMachine {
    ctx: StateContext,
    handlers: HandlerRegistry,
    transitions: TransitionTable,
    recovery: RecoveryEngine,
    checkpoints: CheckpointStore,
    max_retries: u32,
    on_enter: Vec<StateCallback>,
    on_exit: Vec<StateCallback>,
    pending_failure: Option<Failure>,
    failed_state: Option<State>,
    stats: MachineStats,
}

impl StateMachine {
    pub fn new(
        handlers: HandlerRegistry,
        transitions: TransitionTable,
        recovery: RecoveryEngine,
        checkpoints: CheckpointStore,
        max_retries: u32,
    ) -> Self {
        Self {
            ctx: StateContext::new(max_retries),
            handlers,
            transitions,
            recovery,
            checkpoints,
            max_retries,
            on_enter: Vec::new(),
            on_exit: Vec::new(),
            pending_failure: None,
            failed_state: None,
            stats: MachineStats::default(),
        }
    }

    pub fn state(&self) -> State {
        self.ctx.current_state
    }

    pub fn context(&self) -> &StateContext {
        &self.ctx
    }

    pub fn stats(&self) -> &MachineStats {
        &self.stats
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    pub fn recovery_mut(&mut self) -> &mut RecoveryEngine {
        &mut self.recovery
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn on_enter(&mut self, callback: impl Fn(State, &StateContext) + Send + 'static) {
        self.on_enter.push(Box::new(callback));
    }

    pub fn on_exit(&mut self, callback: impl Fn(State, &StateContext) + Send + 'static) {
        self.on_exit.push(Box::new(callback));
    }

    /// Back to IDLE with a fresh context. Lifetime counters and circuit
    /// state are kept.
    pub fn reset(&mut self) {
        self.ctx = StateContext::new(self.max_retries);
        self.pending_failure = None;
        self.failed_state = None;
    }

    /// Begin processing `item_id`, resuming from a fresh checkpoint when
    /// one exists. Returns `false` when the machine is busy or the
    /// checkpoint says the item already finished.
    pub fn start_processing(&mut self, item_id: &str) -> bool {
        if self.ctx.current_state != State::Idle {
            warn!(
                item = item_id,
                state = %self.ctx.current_state,
                "start_processing called while not idle"
            );
            return false;
        }
        self.ctx.current_file = Some(item_id.to_string());

        let resumed = match self.checkpoints.resume(item_id, epoch_seconds()) {
            Ok(found) => found,
            Err(e) => {
                warn!(item = item_id, error = %e, "checkpoint unavailable, starting fresh");
                None
            }
        };

        match resumed {
            Some(cp) if cp.current_state.is_terminal() => {
                warn!(
                    item = item_id,
                    state = %cp.current_state,
                    "checkpoint shows item already finished"
                );
                self.ctx.current_file = None;
                false
            }
            Some(cp) if cp.current_state.is_working() => {
                info!(
                    item = item_id,
                    state = %cp.current_state,
                    retry_count = cp.retry_count,
                    "resuming from checkpoint"
                );
                self.ctx.retry_count = cp.retry_count.min(self.ctx.max_retries);
                self.ctx.last_successful_state = cp.last_successful_state;
                self.ctx.processing_stats = cp.processing_stats;
                self.ctx.error_message = cp.error_message;
                self.stats.items_started += 1;
                self.stats.items_resumed += 1;
                self.transition_to(cp.current_state);
                true
            }
            _ => {
                info!(item = item_id, "processing started");
                self.stats.items_started += 1;
                self.transition_to(State::ConnectingRemoteDesktop);
                true
            }
        }
    }

    /// Run the handler for the current state. A handler failure is stashed
    /// and reported as [`Event::ErrorOccurred`]. `None` when there is
    /// nothing to execute.
    pub fn execute_current_state(&mut self, item: &WorkItem) -> Option<Event> {
        let state = self.ctx.current_state;
        if state == State::Retrying {
            return Some(Event::RetryNeeded);
        }
        if !state.is_working() {
            return None;
        }

        let Some(handler) = self.handlers.get(state) else {
            self.pending_failure = Some(Failure::new(
                ErrorType::ConfigurationError,
                Severity::Critical,
                format!("no handler registered for {state}"),
            ));
            return Some(Event::ErrorOccurred);
        };

        let started = Instant::now();
        let result = handler.execute(&mut self.ctx, item);
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(event) => {
                debug!(item = %item.id, %state, %event, duration_ms, "handler finished");
                Some(event)
            }
            Err(failure) => {
                debug!(item = %item.id, %state, %failure, duration_ms, "handler failed");
                self.pending_failure = Some(failure);
                Some(Event::ErrorOccurred)
            }
        }
    }

    /// Apply `event` to the current state. `false` when the pair has no
    /// transition; the state is then left unchanged.
    pub fn trigger_event(&mut self, event: Event) -> bool {
        let from = self.ctx.current_state;

        if event == Event::ErrorOccurred {
            if !from.is_working() {
                warn!(state = %from, "error event outside a working state ignored");
                return false;
            }
            let failure = self.pending_failure.take().unwrap_or_else(|| {
                Failure::new(
                    ErrorType::SystemError,
                    Severity::Medium,
                    format!("error reported in {from} without details"),
                )
            });
            self.handle_error(failure);
            return true;
        }

        let Some(target) = self.transitions.lookup(from, event) else {
            error!(
                item = self.ctx.file_name(),
                state = %from,
                %event,
                "illegal transition"
            );
            return false;
        };

        let to = match target {
            Target::State(to) => to,
            Target::FailedState => match self.failed_state.take() {
                Some(to) => to,
                None => {
                    error!(state = %from, %event, "no failed state to return to");
                    return false;
                }
            },
        };

        if from.is_working() && to != from {
            self.ctx.last_successful_state = Some(from);
            self.ctx.retry_count = 0;
            self.ctx.error_message = None;
        }
        info!(item = self.ctx.file_name(), %from, %to, %event, "transition");
        self.transition_to(to);
        true
    }

    /// Ask the recovery engine about `failure`. On `true` the machine has
    /// gone through RETRYING back into the failed state; on `false` it is
    /// in ERROR.
    pub fn handle_error(&mut self, failure: Failure) -> bool {
        let failed = self.ctx.current_state;
        self.ctx.error_message = Some(failure.message.clone());

        let mut error_ctx = ErrorContext::from_failure(&failure, failed.to_string())
            .with_file(self.ctx.file_name())
            .with_retries(self.ctx.retry_count, self.ctx.max_retries);
        let recovered = self.recovery.handle(&failure.message, &mut error_ctx);
        self.ctx.retry_count = error_ctx.retry_count;

        if recovered {
            self.stats.recoveries += 1;
            self.failed_state = Some(failed);
            info!(
                item = self.ctx.file_name(),
                state = %failed,
                retry_count = self.ctx.retry_count,
                "retrying after recovery"
            );
            self.transition_to(State::Retrying);
            if self.trigger_event(Event::RetryNeeded) {
                return true;
            }
            error!(state = %failed, "could not leave RETRYING");
        }

        error!(
            item = self.ctx.file_name(),
            state = %failed,
            error = %failure,
            "work item failed"
        );
        self.transition_to(State::Error);
        false
    }

    fn transition_to(&mut self, next: State) {
        let prev = self.ctx.current_state;
        for callback in &self.on_exit {
            callback(prev, &self.ctx);
        }
        self.ctx.current_state = next;
        for callback in &self.on_enter {
            callback(next, &self.ctx);
        }

        match next {
            State::Completed => self.stats.items_completed += 1,
            State::Error => self.stats.items_failed += 1,
            _ => {}
        }
        self.persist(next);
    }

    fn persist(&mut self, state: State) {
        let Some(item_id) = self.ctx.current_file.clone() else {
            return;
        };
        if state == State::Completed {
            if let Err(e) = self.checkpoints.delete(&item_id) {
                warn!(item = %item_id, error = %e, "could not delete checkpoint");
            }
            return;
        }
        if !state.is_checkpointed() {
            return;
        }
        self.ctx.timestamp = epoch_seconds();
        let checkpoint = Checkpoint::from_context(&item_id, &self.ctx);
        if let Err(e) = self.checkpoints.save(&checkpoint) {
            warn!(item = %item_id, error = %e, "could not save checkpoint");
        }
    }
}
