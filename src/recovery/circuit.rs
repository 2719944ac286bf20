use std::collections::HashMap;

use tracing::{info, warn};

use super::ErrorType;

/// Default number of consecutive failures that opens a circuit.
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Counts consecutive recovery failures per error kind.
///
/// Counters live for the whole process and are shared by every work item.
/// A kind whose counter reaches the threshold is open until a success is
/// recorded for it or it is reset.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    failures: HashMap<ErrorType, u32>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn failure_count(&self, kind: ErrorType) -> u32 {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    pub fn is_open(&self, kind: ErrorType) -> bool {
        self.failure_count(kind) >= self.threshold
    }

    pub fn record_failure(&mut self, kind: ErrorType) {
        let count = self.failures.entry(kind).or_insert(0);
        *count += 1;
        if *count == self.threshold {
            warn!(error_type = %kind, failures = *count, "circuit opened");
        }
    }

    pub fn record_success(&mut self, kind: ErrorType) {
        if let Some(count) = self.failures.remove(&kind)
            && count >= self.threshold
        {
            info!(error_type = %kind, "circuit closed after success");
        }
    }

    /// Clear one kind, or every kind when `kind` is `None`.
    pub fn reset(&mut self, kind: Option<ErrorType>) {
        match kind {
            Some(kind) => {
                self.failures.remove(&kind);
            }
            None => self.failures.clear(),
        }
    }

    /// Kinds whose circuit is currently open.
    pub fn open_circuits(&self) -> Vec<ErrorType> {
        let mut open: Vec<ErrorType> = self
            .failures
            .iter()
            .filter(|&(_, &count)| count >= self.threshold)
            .map(|(&kind, _)| kind)
            .collect();
        open.sort();
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_at_threshold() {
        let mut breaker = CircuitBreaker::new(5);
        for _ in 0..4 {
            breaker.record_failure(ErrorType::TemplateMatching);
        }
        assert!(!breaker.is_open(ErrorType::TemplateMatching));

        breaker.record_failure(ErrorType::TemplateMatching);
        assert!(breaker.is_open(ErrorType::TemplateMatching));
        assert!(!breaker.is_open(ErrorType::WindowConnection));
        assert_eq!(breaker.open_circuits(), vec![ErrorType::TemplateMatching]);
    }

    #[test]
    fn success_resets_counter() {
        let mut breaker = CircuitBreaker::new(5);
        for _ in 0..5 {
            breaker.record_failure(ErrorType::TimeoutError);
        }
        breaker.record_success(ErrorType::TimeoutError);
        assert_eq!(breaker.failure_count(ErrorType::TimeoutError), 0);
        assert!(!breaker.is_open(ErrorType::TimeoutError));
    }

    #[test]
    fn manual_reset_one_or_all() {
        let mut breaker = CircuitBreaker::new(1);
        breaker.record_failure(ErrorType::TemplateMatching);
        breaker.record_failure(ErrorType::WindowConnection);

        breaker.reset(Some(ErrorType::TemplateMatching));
        assert!(!breaker.is_open(ErrorType::TemplateMatching));
        assert!(breaker.is_open(ErrorType::WindowConnection));

        breaker.reset(None);
        assert!(breaker.open_circuits().is_empty());
    }

    #[test]
    fn zero_threshold_is_clamped() {
        let breaker = CircuitBreaker::new(0);
        assert_eq!(breaker.threshold(), 1);
    }
}
