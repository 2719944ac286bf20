//! Queue driver: feeds pending work items through the state machine and
//! routes each file to `completed/` or `error/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::config::{PilotConfig, QueueConfig};
use crate::desktop::{ArtifactUploader, Desktop};
use crate::error::Result;
use crate::recovery::RecoveryEngine;
use crate::state_machine::{State, StateMachine, TransitionTable};
use crate::steps::{StepEnv, standard_registry};
use crate::work_item::WorkItem;

/// The queue directories under the base dir.
#[derive(Debug, Clone)]
pub struct QueueDirs {
    pub pending: PathBuf,
    pub processing: PathBuf,
    pub completed: PathBuf,
    pub error: PathBuf,
}

impl QueueDirs {
    pub fn from_config(queue: &QueueConfig) -> Self {
        Self {
            pending: queue.base_dir.join(&queue.pending),
            processing: queue.base_dir.join(&queue.processing),
            completed: queue.base_dir.join(&queue.completed),
            error: queue.base_dir.join(&queue.error),
        }
    }

    /// Create any missing directory.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.pending, &self.processing, &self.completed, &self.error] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// How driving one item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveOutcome {
    Completed,
    Failed,
    /// The iteration cap was hit before a terminal state.
    IterationCap,
    /// A state produced no event or an event with no transition.
    Stalled,
    /// `start_processing` refused the item.
    Refused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveResult {
    pub outcome: DriveOutcome,
    pub iterations: u32,
    pub final_state: State,
}

impl DriveResult {
    fn at(machine: &StateMachine, outcome: DriveOutcome, iterations: u32) -> Self {
        Self {
            outcome,
            iterations,
            final_state: machine.state(),
        }
    }
}

/// Run `item` to a terminal state, at most `max_iterations` handler calls.
pub fn drive(machine: &mut StateMachine, item: &WorkItem, max_iterations: u32) -> DriveResult {
    if !machine.start_processing(&item.id) {
        return DriveResult::at(machine, DriveOutcome::Refused, 0);
    }

    let mut iterations = 0;
    loop {
        match machine.state() {
            State::Completed => return DriveResult::at(machine, DriveOutcome::Completed, iterations),
            State::Error => return DriveResult::at(machine, DriveOutcome::Failed, iterations),
            _ => {}
        }
        if iterations >= max_iterations {
            warn!(
                item = %item.id,
                state = %machine.state(),
                iterations,
                "iteration cap reached"
            );
            return DriveResult::at(machine, DriveOutcome::IterationCap, iterations);
        }
        iterations += 1;

        let Some(event) = machine.execute_current_state(item) else {
            return DriveResult::at(machine, DriveOutcome::Stalled, iterations);
        };
        if !machine.trigger_event(event) {
            return DriveResult::at(machine, DriveOutcome::Stalled, iterations);
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded,
    Failed,
    /// Unreadable or invalid; never reached the state machine.
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub item: String,
    pub outcome: ItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive: Option<DriveOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_state: Option<State>,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Where the file ended up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
}

impl ItemReport {
    fn rejected(item: &str, reason: String, destination: Option<PathBuf>) -> Self {
        Self {
            item: item.to_string(),
            outcome: ItemOutcome::Rejected,
            drive: None,
            final_state: None,
            iterations: 0,
            error: Some(reason),
            destination,
        }
    }
}

/// Aggregate result of one pass over the queue.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scanned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rejected: usize,
    pub cancelled: bool,
    pub items: Vec<ItemReport>,
}

impl RunSummary {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            scanned: 0,
            succeeded: 0,
            failed: 0,
            rejected: 0,
            cancelled: false,
            items: Vec::new(),
        }
    }

    /// Whether the process should exit unsuccessfully.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn record(&mut self, report: ItemReport) {
        match report.outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Rejected => self.rejected += 1,
        }
        self.items.push(report);
    }
}

/// Called after each file is routed.
pub type ItemCallback = Box<dyn Fn(&ItemReport) + Send>;

/// Build the standard order-entry machine from configuration.
pub fn standard_machine(
    config: &PilotConfig,
    desktop: Desktop,
    uploader: Option<Arc<dyn ArtifactUploader>>,
) -> StateMachine {
    let engine = RecoveryEngine::with_default_strategies(
        &desktop,
        &config.recovery,
        &config.automation.remote_desktop_title,
    );
    let env = StepEnv::from_config(desktop, config, uploader);
    StateMachine::new(
        standard_registry(&env),
        TransitionTable::standard(),
        engine,
        CheckpointStore::new(config.checkpoint_dir(), config.checkpoint_expiry()),
        config.retry.max_retries,
    )
}

/// Processes the pending queue one file at a time.
pub struct WorkflowDriver {
    dirs: QueueDirs,
    extensions: Vec<String>,
    max_iterations: u32,
    machine: StateMachine,
    stop: Arc<AtomicBool>,
    on_item: Vec<ItemCallback>,
}

impl WorkflowDriver {
    pub fn new(config: &PilotConfig, machine: StateMachine) -> Self {
        Self {
            dirs: QueueDirs::from_config(&config.queue),
            extensions: config.queue.extensions.clone(),
            max_iterations: config.machine.max_iterations,
            machine,
            stop: Arc::new(AtomicBool::new(false)),
            on_item: Vec::new(),
        }
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut StateMachine {
        &mut self.machine
    }

    /// Set to `true` to stop before the next item.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn on_item(&mut self, callback: impl Fn(&ItemReport) + Send + 'static) {
        self.on_item.push(Box::new(callback));
    }

    /// Files to process this pass, each group in file-name order. Files left
    /// in `processing/` by an interrupted run come first so their
    /// checkpoints resume, then the pending queue.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut files = self.admissible_in(&self.dirs.processing)?;
        files.extend(self.admissible_in(&self.dirs.pending)?);
        Ok(files)
    }

    fn admissible_in(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if is_admissible(&path, &self.extensions) {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// One pass over the queue.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.dirs.ensure()?;
        let mut summary = RunSummary::new();
        let files = self.scan()?;
        summary.scanned = files.len();
        let adopted = files
            .iter()
            .filter(|path| path.parent() == Some(self.dirs.processing.as_path()))
            .count();
        info!(
            run_id = %summary.run_id,
            pending = files.len() - adopted,
            adopted,
            "run started"
        );

        for path in files {
            if self.stop.load(Ordering::SeqCst) {
                warn!(run_id = %summary.run_id, "stop requested, leaving remaining items queued");
                summary.cancelled = true;
                break;
            }
            let report = self.process(&path);
            for callback in &self.on_item {
                callback(&report);
            }
            summary.record(report);
        }

        summary.finished_at = Utc::now();
        let stats = self.machine.stats();
        info!(
            run_id = %summary.run_id,
            scanned = summary.scanned,
            succeeded = summary.succeeded,
            failed = summary.failed,
            rejected = summary.rejected,
            cancelled = summary.cancelled,
            resumed = stats.items_resumed,
            recoveries = stats.recoveries,
            open_circuits = ?self.machine.recovery().circuit().open_circuits(),
            "run finished"
        );
        Ok(summary)
    }

    fn process(&mut self, path: &Path) -> ItemReport {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut item = match WorkItem::from_file(path) {
            Ok(item) => item,
            Err(e) => {
                warn!(item = %name, error = %e, "rejecting work item");
                let destination = self.route(path, &self.dirs.error, &name);
                return ItemReport::rejected(&name, e.to_string(), destination);
            }
        };

        let claimed = if path.parent() == Some(self.dirs.processing.as_path()) {
            info!(item = %name, "adopting work item left in processing");
            Ok(path.to_path_buf())
        } else {
            move_into(path, &self.dirs.processing)
        };
        match claimed {
            Ok(claimed) => item.path = claimed,
            Err(e) => {
                error!(item = %name, error = %e, "could not claim work item");
                return ItemReport {
                    item: name,
                    outcome: ItemOutcome::Failed,
                    drive: None,
                    final_state: None,
                    iterations: 0,
                    error: Some(e.to_string()),
                    destination: None,
                };
            }
        }

        self.machine.reset();
        let result = drive(&mut self.machine, &item, self.max_iterations);
        let error_message = self.machine.context().error_message.clone();

        let (outcome, dir) = if result.outcome == DriveOutcome::Completed {
            if let Err(e) = self.machine.checkpoints().delete(&item.id) {
                warn!(item = %item.id, error = %e, "could not delete checkpoint");
            }
            (ItemOutcome::Succeeded, self.dirs.completed.clone())
        } else {
            (ItemOutcome::Failed, self.dirs.error.clone())
        };
        let destination = self.route(&item.path, &dir, &item.id);
        self.machine.reset();

        info!(
            item = %item.id,
            outcome = ?result.outcome,
            state = %result.final_state,
            iterations = result.iterations,
            "work item finished"
        );
        ItemReport {
            item: item.id,
            outcome,
            drive: Some(result.outcome),
            final_state: Some(result.final_state),
            iterations: result.iterations,
            error: match result.outcome {
                DriveOutcome::Completed => None,
                DriveOutcome::Refused => {
                    Some("a checkpoint shows this item already finished".to_string())
                }
                DriveOutcome::IterationCap => Some(format!(
                    "iteration cap of {} reached in {}",
                    self.max_iterations, result.final_state
                )),
                _ => error_message,
            },
            destination,
        }
    }

    fn route(&self, path: &Path, dir: &Path, name: &str) -> Option<PathBuf> {
        match move_into(path, dir) {
            Ok(dest) => Some(dest),
            Err(e) => {
                error!(item = %name, dest = %dir.display(), error = %e, "could not move work item");
                None
            }
        }
    }
}

/// Regular data files only: configured extension, not hidden, not an
/// editor or office temp file.
pub fn is_admissible(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.starts_with("~$") || name.ends_with('~') {
        return false;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if ext.eq_ignore_ascii_case("tmp") {
        return false;
    }
    extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext))
}

/// Move `path` into `dir`, replacing a file of the same name.
pub fn move_into(path: &Path, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let name = path.file_name().ok_or_else(|| {
        crate::error::RpaError::Config(format!("not a file: {}", path.display()))
    })?;
    let dest = dir.join(name);
    if dest.exists() {
        std::fs::remove_file(&dest)?;
    }
    if std::fs::rename(path, &dest).is_err() {
        // rename fails across filesystems
        std::fs::copy(path, &dest)?;
        std::fs::remove_file(path)?;
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use super::*;
    use crate::desktop::{ManualClock, SimulatedDesktop, templates};
    use crate::recovery::{CircuitBreaker, ErrorContext, ErrorType};
    use crate::state_machine::{Event, HandlerRegistry, StateContext};
    use crate::work_item::sample_order;

    struct Fixture {
        dir: tempfile::TempDir,
        config: PilotConfig,
        sim: SimulatedDesktop,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = PilotConfig::default();
            config.queue.base_dir = dir.path().to_path_buf();
            let fixture = Self {
                dir,
                config,
                sim: SimulatedDesktop::new(),
                clock: Arc::new(ManualClock::new()),
            };
            QueueDirs::from_config(&fixture.config.queue).ensure().unwrap();
            fixture
        }

        fn dirs(&self) -> QueueDirs {
            QueueDirs::from_config(&self.config.queue)
        }

        fn enqueue(&self, name: &str) {
            let body = serde_json::to_string(&sample_order()).unwrap();
            std::fs::write(self.dirs().pending.join(name), body).unwrap();
        }

        fn driver(&self) -> WorkflowDriver {
            let machine = standard_machine(&self.config, self.sim.desktop(self.clock.clone()), None);
            WorkflowDriver::new(&self.config, machine)
        }

        fn names_in(&self, dir: &Path) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    #[test]
    fn admission_filter() {
        let exts = vec!["json".to_string()];
        assert!(is_admissible(Path::new("pending/order1.json"), &exts));
        assert!(is_admissible(Path::new("pending/ORDER2.JSON"), &exts));
        assert!(!is_admissible(Path::new("pending/.order1.json"), &exts));
        assert!(!is_admissible(Path::new("pending/~$order1.json"), &exts));
        assert!(!is_admissible(Path::new("pending/order1.json~"), &exts));
        assert!(!is_admissible(Path::new("pending/order1.tmp"), &exts));
        assert!(!is_admissible(Path::new("pending/order1.csv"), &exts));
        assert!(!is_admissible(Path::new("pending/README"), &exts));
    }

    #[test]
    fn scan_is_lexicographic() {
        let fx = Fixture::new();
        for name in ["b.json", "a10.json", "a2.json", ".hidden.json", "notes.txt"] {
            fx.enqueue(name);
        }
        std::fs::create_dir(fx.dirs().pending.join("sub.json")).unwrap();

        let names: Vec<String> = fx
            .driver()
            .scan()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a10.json", "a2.json", "b.json"]);
    }

    #[test]
    fn move_replaces_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("order1.json");
        std::fs::write(&src, "new").unwrap();
        let dest_dir = dir.path().join("completed");
        std::fs::create_dir(&dest_dir).unwrap();
        std::fs::write(dest_dir.join("order1.json"), "old").unwrap();

        let dest = move_into(&src, &dest_dir).unwrap();

        assert_eq!(std::fs::read_to_string(dest).unwrap(), "new");
        assert!(!src.exists());
    }

    #[test]
    fn happy_path_moves_to_completed() {
        let fx = Fixture::new();
        fx.enqueue("order1.json");
        let mut driver = fx.driver();

        let summary = driver.run().unwrap();

        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.succeeded, 1);
        assert!(!summary.has_failures());
        assert_eq!(summary.items[0].drive, Some(DriveOutcome::Completed));
        assert_eq!(fx.names_in(&fx.dirs().completed), vec!["order1.json"]);
        assert!(fx.names_in(&fx.dirs().pending).is_empty());
        assert!(fx.names_in(&fx.dirs().processing).is_empty());
        assert!(fx.names_in(&fx.config.checkpoint_dir()).is_empty());
        assert!(fx.config.archive_dir().join("order1.receipt.json").exists());
        assert_eq!(
            fx.sim.typed_text(),
            vec!["900123456", "OC-2024-001", "15.03.2024", "A-100", "2", "B-200", "1.5", "12.5"]
        );
    }

    #[test]
    fn invalid_payload_is_rejected_without_running() {
        let fx = Fixture::new();
        std::fs::write(fx.dirs().pending.join("broken.json"), "{\"nit\": ").unwrap();
        fx.enqueue("good.json");
        let mut driver = fx.driver();

        let summary = driver.run().unwrap();

        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.items[0].item, "broken.json");
        assert_eq!(summary.items[0].outcome, ItemOutcome::Rejected);
        assert_eq!(fx.names_in(&fx.dirs().error), vec!["broken.json"]);
        assert_eq!(driver.machine().stats().items_started, 1);
    }

    #[test]
    fn unrecoverable_failure_goes_to_error_and_keeps_checkpoint() {
        let fx = Fixture::new();
        fx.sim.remove_window("Remote Desktop Connection");
        fx.enqueue("order1.json");
        let mut driver = fx.driver();

        let summary = driver.run().unwrap();

        assert_eq!(summary.failed, 1);
        assert!(summary.has_failures());
        let report = &summary.items[0];
        assert_eq!(report.final_state, Some(State::Error));
        assert!(report.error.as_deref().unwrap().contains("Remote Desktop Connection"));
        assert_eq!(fx.names_in(&fx.dirs().error), vec!["order1.json"]);
        let checkpoint = driver.machine().checkpoints().load("order1.json").unwrap().unwrap();
        assert_eq!(checkpoint.current_state, State::Error);
    }

    #[test]
    fn transient_template_miss_is_recovered() {
        let fx = Fixture::new();
        // guarantees the first wait times out, then the field shows up
        fx.sim.fail_template(templates::NIT_FIELD, 21);
        fx.enqueue("order1.json");
        let mut driver = fx.driver();

        let summary = driver.run().unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(driver.machine().stats().recoveries, 1);
        // template backoff after the first miss
        assert!(fx.clock.sleeps().contains(&Duration::from_millis(1000)));
    }

    #[test]
    fn oscillating_table_stops_at_iteration_cap() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        let seen = calls.clone();
        registry.register(
            State::ConnectingRemoteDesktop,
            move |_: &mut StateContext, _: &WorkItem| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Event::Connected)
            },
        );
        let seen = calls.clone();
        registry.register(
            State::LaunchingApplication,
            move |_: &mut StateContext, _: &WorkItem| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Event::ApplicationLaunched)
            },
        );
        let table = TransitionTable::empty()
            .with(State::ConnectingRemoteDesktop, Event::Connected, State::LaunchingApplication)
            .with(State::LaunchingApplication, Event::ApplicationLaunched, State::ConnectingRemoteDesktop);
        let mut machine = StateMachine::new(
            registry,
            table,
            RecoveryEngine::new(CircuitBreaker::default()),
            CheckpointStore::new(dir.path(), Duration::from_secs(3600)),
            3,
        );

        let result = drive(&mut machine, &WorkItem::sample("loop.json"), 100);

        assert_eq!(result.outcome, DriveOutcome::IterationCap);
        assert_eq!(result.iterations, 100);
        assert_eq!(calls.load(Ordering::SeqCst), 100);
        assert!(!result.final_state.is_terminal());
    }

    #[test]
    fn circuit_opens_after_repeated_failures_across_items() {
        let fx = Fixture::new();
        fx.sim.hide_template(templates::NIT_FIELD);
        for i in 1..=6 {
            fx.enqueue(&format!("order{i}.json"));
        }
        let mut driver = fx.driver();
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();
        driver.machine_mut().recovery_mut().register(
            ErrorType::TemplateMatching,
            move |_: &ErrorContext| {
                seen.fetch_add(1, Ordering::SeqCst);
                false
            },
        );

        let summary = driver.run().unwrap();

        assert_eq!(summary.failed, 6);
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        assert!(
            driver
                .machine()
                .recovery()
                .circuit()
                .is_open(ErrorType::TemplateMatching)
        );
        assert_eq!(fx.names_in(&fx.dirs().error).len(), 6);
    }

    #[test]
    fn stop_flag_leaves_items_queued() {
        let fx = Fixture::new();
        fx.enqueue("order1.json");
        fx.enqueue("order2.json");
        let mut driver = fx.driver();
        let stop = driver.stop_flag();
        driver.on_item(move |_| stop.store(true, Ordering::SeqCst));

        let summary = driver.run().unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.items.len(), 1);
        assert_eq!(fx.names_in(&fx.dirs().pending), vec!["order2.json"]);
    }

    #[test]
    fn item_left_in_processing_resumes_from_checkpoint() {
        let fx = Fixture::new();
        let body = serde_json::to_string(&sample_order()).unwrap();
        std::fs::write(fx.dirs().processing.join("order1.json"), body).unwrap();
        fx.enqueue("order2.json");
        let store = CheckpointStore::new(fx.config.checkpoint_dir(), Duration::from_secs(3600));
        let mut ctx = StateContext::new(3);
        ctx.current_state = State::LoadingDate;
        ctx.last_successful_state = Some(State::LoadingOrder);
        ctx.timestamp = crate::state_machine::epoch_seconds();
        store
            .save(&crate::checkpoint::Checkpoint::from_context("order1.json", &ctx))
            .unwrap();
        let mut driver = fx.driver();
        let stop = driver.stop_flag();
        driver.on_item(move |_| stop.store(true, Ordering::SeqCst));

        let summary = driver.run().unwrap();

        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.items[0].item, "order1.json");
        assert_eq!(summary.succeeded, 1);
        assert_eq!(driver.machine().stats().items_resumed, 1);
        assert_eq!(
            fx.sim.typed_text(),
            vec!["15.03.2024", "A-100", "2", "B-200", "1.5", "12.5"]
        );
        assert_eq!(fx.names_in(&fx.dirs().completed), vec!["order1.json"]);
        assert!(fx.names_in(&fx.dirs().processing).is_empty());
        assert_eq!(fx.names_in(&fx.dirs().pending), vec!["order2.json"]);
    }

    #[test]
    fn configured_iteration_cap_is_applied() {
        let mut fx = Fixture::new();
        fx.config.machine.max_iterations = 2;
        fx.enqueue("order1.json");
        let mut driver = fx.driver();

        let summary = driver.run().unwrap();

        let report = &summary.items[0];
        assert_eq!(report.drive, Some(DriveOutcome::IterationCap));
        assert_eq!(report.iterations, 2);
        assert_eq!(report.final_state, Some(State::NavigatingToForm));
        assert!(report.error.as_deref().unwrap().contains("iteration cap of 2"));
        assert_eq!(fx.names_in(&fx.dirs().error), vec!["order1.json"]);
    }

    #[test]
    fn finished_checkpoint_refuses_item() {
        let fx = Fixture::new();
        fx.enqueue("order1.json");
        let store = CheckpointStore::new(fx.config.checkpoint_dir(), Duration::from_secs(3600));
        let mut ctx = StateContext::new(3);
        ctx.current_state = State::Error;
        ctx.timestamp = crate::state_machine::epoch_seconds();
        store
            .save(&crate::checkpoint::Checkpoint::from_context("order1.json", &ctx))
            .unwrap();
        let mut driver = fx.driver();

        let summary = driver.run().unwrap();

        assert_eq!(summary.items[0].drive, Some(DriveOutcome::Refused));
        assert_eq!(summary.failed, 1);
        assert!(fx.sim.actions().is_empty());
    }

    #[test]
    fn summary_serializes() {
        let mut summary = RunSummary::new();
        summary.record(ItemReport::rejected("x.json", "bad".into(), None));
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["rejected"], 1);
        assert_eq!(value["items"][0]["outcome"], "rejected");
        assert!(value["items"][0].get("drive").is_none());
    }
}
