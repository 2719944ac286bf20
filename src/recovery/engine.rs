use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use super::strategies::{
    FieldClear, NavigationReset, RecoveryStrategy, RecoveryValidator, TemplateRecapture,
    TimeoutBackoff, WindowReconnect,
};
use super::{CircuitBreaker, ErrorContext, ErrorType, Severity};
use crate::config::RecoveryConfig;
use crate::desktop::Desktop;

/// Why the engine refused or failed to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Recovered,
    Critical,
    CircuitOpen,
    RetriesExhausted,
    NoStrategy,
    StrategyFailed,
    ValidationFailed,
}

impl Verdict {
    pub fn may_continue(self) -> bool {
        self == Verdict::Recovered
    }
}

/// Decides whether a failed operation may be retried and applies the
/// registered remedy for its error kind.
pub struct RecoveryEngine {
    strategies: HashMap<ErrorType, Arc<dyn RecoveryStrategy>>,
    validators: HashMap<ErrorType, Arc<dyn RecoveryValidator>>,
    circuit: CircuitBreaker,
}

impl RecoveryEngine {
    /// An engine with no strategies; every failure is refused.
    pub fn new(circuit: CircuitBreaker) -> Self {
        Self {
            strategies: HashMap::new(),
            validators: HashMap::new(),
            circuit,
        }
    }

    /// The built-in strategies for template, window, navigation, data and
    /// timeout failures. `window_title` is the window WINDOW_CONNECTION
    /// recovery reactivates.
    pub fn with_default_strategies(
        desktop: &Desktop,
        config: &RecoveryConfig,
        window_title: &str,
    ) -> Self {
        let mut engine = Self::new(CircuitBreaker::new(config.circuit_threshold));

        let template = Arc::new(TemplateRecapture::new(desktop.clone(), config));
        engine.register_shared(ErrorType::TemplateMatching, template.clone());
        engine.register_validator_shared(ErrorType::TemplateMatching, template);

        let window = Arc::new(WindowReconnect::new(desktop.clone(), window_title, config));
        engine.register_shared(ErrorType::WindowConnection, window.clone());
        engine.register_validator_shared(ErrorType::WindowConnection, window);

        engine.register(
            ErrorType::SapNavigation,
            NavigationReset::new(desktop.clone(), config),
        );
        engine.register(
            ErrorType::DataProcessing,
            FieldClear::new(desktop.clone(), config),
        );

        let timeout = Arc::new(TimeoutBackoff::new(desktop.clone(), config));
        engine.register_shared(ErrorType::TimeoutError, timeout.clone());
        engine.register_validator_shared(ErrorType::TimeoutError, timeout);

        engine
    }

    pub fn register(&mut self, kind: ErrorType, strategy: impl RecoveryStrategy + 'static) {
        self.register_shared(kind, Arc::new(strategy));
    }

    pub fn register_shared(&mut self, kind: ErrorType, strategy: Arc<dyn RecoveryStrategy>) {
        self.strategies.insert(kind, strategy);
    }

    pub fn register_validator(&mut self, kind: ErrorType, validator: impl RecoveryValidator + 'static) {
        self.register_validator_shared(kind, Arc::new(validator));
    }

    pub fn register_validator_shared(
        &mut self,
        kind: ErrorType,
        validator: Arc<dyn RecoveryValidator>,
    ) {
        self.validators.insert(kind, validator);
    }

    pub fn has_strategy(&self, kind: ErrorType) -> bool {
        self.strategies.contains_key(&kind)
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    pub fn circuit_mut(&mut self) -> &mut CircuitBreaker {
        &mut self.circuit
    }

    /// `true` when the caller may retry the failed operation.
    ///
    /// Increments `ctx.retry_count` whenever a strategy is actually run.
    pub fn handle(&mut self, message: &str, ctx: &mut ErrorContext) -> bool {
        self.evaluate(message, ctx).may_continue()
    }

    /// Same decision as [`handle`](Self::handle), with the reason.
    pub fn evaluate(&mut self, message: &str, ctx: &mut ErrorContext) -> Verdict {
        log_failure(message, ctx);

        if ctx.severity == Severity::Critical {
            error!(operation = %ctx.operation, "critical failure, recovery not attempted");
            return Verdict::Critical;
        }
        if self.circuit.is_open(ctx.error_type) {
            warn!(
                error_type = %ctx.error_type,
                failures = self.circuit.failure_count(ctx.error_type),
                "circuit open, recovery refused"
            );
            return Verdict::CircuitOpen;
        }
        if ctx.retries_exhausted() {
            warn!(
                operation = %ctx.operation,
                retry_count = ctx.retry_count,
                max_retries = ctx.max_retries,
                "retries exhausted"
            );
            return Verdict::RetriesExhausted;
        }
        let Some(strategy) = self.strategies.get(&ctx.error_type).cloned() else {
            warn!(error_type = %ctx.error_type, "no recovery strategy registered");
            return Verdict::NoStrategy;
        };

        let started = Instant::now();
        let recovered = strategy.recover(ctx);
        ctx.retry_count += 1;

        let verdict = if !recovered {
            Verdict::StrategyFailed
        } else if let Some(validator) = self.validators.get(&ctx.error_type)
            && !validator.validate(ctx)
        {
            Verdict::ValidationFailed
        } else {
            Verdict::Recovered
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        if verdict == Verdict::Recovered {
            self.circuit.record_success(ctx.error_type);
            info!(
                operation = %ctx.operation,
                error_type = %ctx.error_type,
                retry_count = ctx.retry_count,
                duration_ms,
                "recovery succeeded"
            );
        } else {
            self.circuit.record_failure(ctx.error_type);
            warn!(
                operation = %ctx.operation,
                error_type = %ctx.error_type,
                retry_count = ctx.retry_count,
                duration_ms,
                ?verdict,
                "recovery failed"
            );
        }
        verdict
    }
}

fn log_failure(message: &str, ctx: &ErrorContext) {
    let file = ctx.file_name.as_deref().unwrap_or("-");
    match ctx.severity {
        Severity::Low => info!(
            operation = %ctx.operation,
            error_type = %ctx.error_type,
            severity = %ctx.severity,
            file,
            item_index = ?ctx.item_index,
            retry_count = ctx.retry_count,
            max_retries = ctx.max_retries,
            "{message}"
        ),
        Severity::Medium => warn!(
            operation = %ctx.operation,
            error_type = %ctx.error_type,
            severity = %ctx.severity,
            file,
            item_index = ?ctx.item_index,
            retry_count = ctx.retry_count,
            max_retries = ctx.max_retries,
            "{message}"
        ),
        Severity::High | Severity::Critical => error!(
            operation = %ctx.operation,
            error_type = %ctx.error_type,
            severity = %ctx.severity,
            file,
            item_index = ?ctx.item_index,
            retry_count = ctx.retry_count,
            max_retries = ctx.max_retries,
            "{message}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::desktop::{ManualClock, SimulatedDesktop};

    fn counting(result: bool) -> (Arc<AtomicU32>, impl Fn(&ErrorContext) -> bool + Send + Sync) {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        (calls, move |_: &ErrorContext| {
            seen.fetch_add(1, Ordering::SeqCst);
            result
        })
    }

    fn engine_with_all(result: bool) -> (RecoveryEngine, Arc<AtomicU32>) {
        let mut engine = RecoveryEngine::new(CircuitBreaker::new(5));
        let calls = Arc::new(AtomicU32::new(0));
        for kind in ErrorType::ALL {
            let seen = calls.clone();
            engine.register(kind, move |_: &ErrorContext| {
                seen.fetch_add(1, Ordering::SeqCst);
                result
            });
        }
        (engine, calls)
    }

    fn ctx(kind: ErrorType, severity: Severity, retry_count: u32) -> ErrorContext {
        ErrorContext::new(kind, severity, "LOADING_NIT")
            .with_file("order1.json")
            .with_retries(retry_count, 3)
    }

    #[test]
    fn retry_bound_refuses_for_every_kind_and_severity() {
        let (mut engine, calls) = engine_with_all(true);
        for kind in ErrorType::ALL {
            for severity in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
                for retry_count in [3, 4, 10] {
                    let mut c = ctx(kind, severity, retry_count);
                    assert!(!engine.handle("boom", &mut c));
                    assert_eq!(c.retry_count, retry_count);
                }
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn critical_short_circuits_even_with_strategy() {
        let (mut engine, calls) = engine_with_all(true);
        for kind in ErrorType::ALL {
            let mut c = ctx(kind, Severity::Critical, 0);
            assert_eq!(engine.evaluate("fatal", &mut c), Verdict::Critical);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn recovery_increments_retry_count_and_resets_circuit() {
        let (mut engine, calls) = engine_with_all(true);
        engine.circuit_mut().record_failure(ErrorType::WindowConnection);

        let mut c = ctx(ErrorType::WindowConnection, Severity::High, 0);
        assert!(engine.handle("window lost", &mut c));
        assert_eq!(c.retry_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.circuit().failure_count(ErrorType::WindowConnection), 0);
    }

    #[test]
    fn circuit_opens_after_five_failed_recoveries() {
        let (mut engine, calls) = engine_with_all(false);
        for _ in 0..5 {
            let mut c = ctx(ErrorType::TemplateMatching, Severity::Medium, 0);
            assert_eq!(engine.evaluate("miss", &mut c), Verdict::StrategyFailed);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let mut c = ctx(ErrorType::TemplateMatching, Severity::Medium, 0);
        assert_eq!(engine.evaluate("miss", &mut c), Verdict::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // other kinds are unaffected
        let mut c = ctx(ErrorType::SapNavigation, Severity::Medium, 0);
        assert_eq!(engine.evaluate("nav", &mut c), Verdict::StrategyFailed);
    }

    #[test]
    fn success_after_failures_clears_counter() {
        let mut engine = RecoveryEngine::new(CircuitBreaker::new(5));
        let (_calls, strategy) = counting(true);
        engine.register(ErrorType::TemplateMatching, strategy);
        for _ in 0..4 {
            engine.circuit_mut().record_failure(ErrorType::TemplateMatching);
        }

        let mut c = ctx(ErrorType::TemplateMatching, Severity::Medium, 0);
        assert!(engine.handle("miss", &mut c));
        assert_eq!(engine.circuit().failure_count(ErrorType::TemplateMatching), 0);
    }

    #[test]
    fn missing_strategy_is_refused() {
        let mut engine = RecoveryEngine::new(CircuitBreaker::default());
        let mut c = ctx(ErrorType::FileOperation, Severity::Medium, 0);
        assert_eq!(engine.evaluate("disk", &mut c), Verdict::NoStrategy);
        assert_eq!(c.retry_count, 0);
    }

    #[test]
    fn failed_validation_counts_as_circuit_failure() {
        let mut engine = RecoveryEngine::new(CircuitBreaker::default());
        engine.register(ErrorType::TimeoutError, |_: &ErrorContext| true);
        engine.register_validator(ErrorType::TimeoutError, |_: &ErrorContext| false);

        let mut c = ctx(ErrorType::TimeoutError, Severity::Medium, 0);
        assert_eq!(engine.evaluate("slow", &mut c), Verdict::ValidationFailed);
        assert_eq!(c.retry_count, 1);
        assert_eq!(engine.circuit().failure_count(ErrorType::TimeoutError), 1);
    }

    #[test]
    fn default_strategies_cover_recoverable_kinds() {
        let sim = SimulatedDesktop::new();
        let desktop = sim.desktop(Arc::new(ManualClock::new()));
        let engine =
            RecoveryEngine::with_default_strategies(&desktop, &RecoveryConfig::default(), "RDP");

        for kind in [
            ErrorType::TemplateMatching,
            ErrorType::WindowConnection,
            ErrorType::SapNavigation,
            ErrorType::DataProcessing,
            ErrorType::TimeoutError,
        ] {
            assert!(engine.has_strategy(kind), "{kind} should be recoverable");
        }
        for kind in [
            ErrorType::FileOperation,
            ErrorType::SystemError,
            ErrorType::ConfigurationError,
        ] {
            assert!(!engine.has_strategy(kind));
        }
    }

    #[test]
    fn default_window_recovery_validates_foreground() {
        let sim = SimulatedDesktop::new();
        let desktop = sim.desktop(Arc::new(ManualClock::new()));
        let mut engine =
            RecoveryEngine::with_default_strategies(&desktop, &RecoveryConfig::default(), "RDP");

        let mut c = ctx(ErrorType::WindowConnection, Severity::High, 0);
        assert!(engine.handle("window lost", &mut c));

        sim.remove_window("RDP");
        let mut c = ctx(ErrorType::WindowConnection, Severity::High, 0);
        assert!(!engine.handle("window lost", &mut c));
    }
}
