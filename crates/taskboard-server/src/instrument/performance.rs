//! Execution time classification
//!
//! [`classify`] sorts an elapsed time into tiers and [`render_lines`] turns a
//! [`PerformanceEvent`] into log lines. Both are pure; the
//! [`PerformanceInterceptor`] emits the lines under the `performance` target.

use super::{
    chain::{contain, Interceptor, Invocation, Next, Outcome},
    ConfigResolver,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Instant};
use taskboard_common::logging::PERFORMANCE_TARGET;
use tracing::Level;

/// Above this many milliseconds an operation within threshold is MODERATE
pub const MODERATE_FLOOR_MS: u64 = 100;

/// Below this many milliseconds a successful operation is FAST
pub const FAST_CEILING_MS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Slow,
    Moderate,
    Fast,
}

/// Tiers that apply to one measurement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierSet {
    slow: bool,
    moderate: bool,
    fast: bool,
}

impl TierSet {
    pub fn contains(&self, tier: Tier) -> bool {
        match tier {
            Tier::Slow => self.slow,
            Tier::Moderate => self.moderate,
            Tier::Fast => self.fast,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.slow || self.moderate || self.fast)
    }

    pub fn iter(&self) -> impl Iterator<Item = Tier> + '_ {
        [Tier::Slow, Tier::Fast, Tier::Moderate]
            .into_iter()
            .filter(|tier| self.contains(*tier))
    }
}

pub fn classify(elapsed_ms: u64, threshold_ms: u64, success: bool) -> TierSet {
    TierSet {
        slow: elapsed_ms > threshold_ms,
        moderate: elapsed_ms > MODERATE_FLOOR_MS && elapsed_ms <= threshold_ms,
        fast: elapsed_ms < FAST_CEILING_MS && success,
    }
}

/// One measured call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceEvent {
    pub unit_name: String,
    pub operation_name: String,
    pub execution_time_ms: u64,
    pub threshold_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

impl PerformanceEvent {
    fn operation(&self) -> String {
        format!("{}.{}", self.unit_name, self.operation_name)
    }

    fn status(&self) -> &'static str {
        if self.success {
            "SUCCESS"
        } else {
            "FAILURE"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceLine {
    pub level: Level,
    pub message: String,
}

impl PerformanceLine {
    fn new(level: Level, message: String) -> Self {
        Self { level, message }
    }
}

/// Lines for an event, in emission order
pub fn render_lines(event: &PerformanceEvent, tiers: TierSet, always_log: bool) -> Vec<PerformanceLine> {
    let operation = event.operation();
    let mut lines = Vec::new();

    if tiers.contains(Tier::Slow) {
        lines.push(PerformanceLine::new(
            Level::WARN,
            format!(
                "SLOW_OPERATION: {} | Status: {} | ExecutionTime: {}ms | Threshold: {}ms",
                operation,
                event.status(),
                event.execution_time_ms,
                event.threshold_ms
            ),
        ));

        if let Some(error) = &event.error_message {
            lines.push(PerformanceLine::new(
                Level::WARN,
                format!("SLOW_OPERATION_ERROR: {} | Error: {}", operation, error),
            ));
        }
    }

    if always_log {
        lines.push(PerformanceLine::new(
            Level::INFO,
            format!(
                "PERFORMANCE: {} | Status: {} | ExecutionTime: {}ms",
                operation,
                event.status(),
                event.execution_time_ms
            ),
        ));
    }

    if tiers.contains(Tier::Fast) {
        lines.push(PerformanceLine::new(
            Level::DEBUG,
            format!("FAST_OPERATION: {} | ExecutionTime: {}ms", operation, event.execution_time_ms),
        ));
    }

    if tiers.contains(Tier::Moderate) {
        lines.push(PerformanceLine::new(
            Level::DEBUG,
            format!(
                "MODERATE_OPERATION: {} | Status: {} | ExecutionTime: {}ms",
                operation,
                event.status(),
                event.execution_time_ms
            ),
        ));
    }

    lines
}

fn emit(line: &PerformanceLine) {
    let message = &line.message;
    if line.level == Level::WARN {
        tracing::warn!(target: PERFORMANCE_TARGET, "{}", message);
    } else if line.level == Level::INFO {
        tracing::info!(target: PERFORMANCE_TARGET, "{}", message);
    } else {
        tracing::debug!(target: PERFORMANCE_TARGET, "{}", message);
    }
}

/// Measures each call and logs its tier lines
pub struct PerformanceInterceptor {
    resolver: Arc<ConfigResolver>,
}

impl PerformanceInterceptor {
    pub fn new(resolver: Arc<ConfigResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Interceptor for PerformanceInterceptor {
    fn name(&self) -> &'static str {
        "performance"
    }

    async fn intercept(&self, call: &Invocation, next: Next<'_>) -> Outcome {
        let config = self.resolver.resolve(call.unit, call.operation);
        let started = Instant::now();

        let outcome = next.run().await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        contain(self.name(), call, || {
            let settings = &config.performance;
            let event = PerformanceEvent {
                unit_name: call.unit.to_string(),
                operation_name: call.operation.to_string(),
                execution_time_ms: elapsed_ms,
                threshold_ms: settings.slow_threshold_ms,
                success: outcome.is_success(),
                error_message: outcome.failure().map(|f| f.message.clone()),
            };

            let tiers = classify(elapsed_ms, settings.slow_threshold_ms, event.success);
            for line in render_lines(&event, tiers, settings.always_log) {
                emit(&line);
            }
            Ok(())
        });

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(elapsed_ms: u64, success: bool) -> PerformanceEvent {
        PerformanceEvent {
            unit_name: "TaskService".to_string(),
            operation_name: "getTasks".to_string(),
            execution_time_ms: elapsed_ms,
            threshold_ms: 1000,
            success,
            error_message: (!success).then(|| "db timeout".to_string()),
        }
    }

    fn messages(lines: &[PerformanceLine]) -> Vec<&str> {
        lines.iter().map(|l| l.message.as_str()).collect()
    }

    #[test]
    fn test_classify_boundaries() {
        assert!(classify(1001, 1000, true).contains(Tier::Slow));
        assert!(!classify(1000, 1000, true).contains(Tier::Slow));
        assert!(classify(1000, 1000, true).contains(Tier::Moderate));
        assert!(!classify(100, 1000, true).contains(Tier::Moderate));
        assert!(classify(101, 1000, true).contains(Tier::Moderate));
        assert!(classify(4, 1000, true).contains(Tier::Fast));
        assert!(!classify(5, 1000, true).contains(Tier::Fast));
        assert!(!classify(4, 1000, false).contains(Tier::Fast));
        assert!(classify(50, 1000, true).is_empty());
    }

    #[test]
    fn test_low_threshold_can_be_slow_and_fast() {
        let tiers = classify(3, 2, true);

        assert_eq!(tiers.iter().collect::<Vec<_>>(), vec![Tier::Slow, Tier::Fast]);
    }

    #[test]
    fn test_slow_failure_lines() {
        let event = event(2500, false);
        let lines = render_lines(&event, classify(2500, 1000, false), false);

        assert_eq!(
            messages(&lines),
            vec![
                "SLOW_OPERATION: TaskService.getTasks | Status: FAILURE | ExecutionTime: 2500ms | Threshold: 1000ms",
                "SLOW_OPERATION_ERROR: TaskService.getTasks | Error: db timeout",
            ]
        );
        assert!(lines.iter().all(|l| l.level == Level::WARN));
    }

    #[test]
    fn test_always_log_emits_performance_line() {
        let event = event(50, true);
        let lines = render_lines(&event, classify(50, 1000, true), true);

        assert_eq!(
            messages(&lines),
            vec!["PERFORMANCE: TaskService.getTasks | Status: SUCCESS | ExecutionTime: 50ms"]
        );
        assert_eq!(lines[0].level, Level::INFO);
    }

    #[test]
    fn test_fast_and_moderate_are_debug() {
        let fast = render_lines(&event(2, true), classify(2, 1000, true), false);
        assert_eq!(messages(&fast), vec!["FAST_OPERATION: TaskService.getTasks | ExecutionTime: 2ms"]);
        assert_eq!(fast[0].level, Level::DEBUG);

        let moderate = render_lines(&event(450, true), classify(450, 1000, true), false);
        assert_eq!(
            messages(&moderate),
            vec!["MODERATE_OPERATION: TaskService.getTasks | Status: SUCCESS | ExecutionTime: 450ms"]
        );
    }

    #[test]
    fn test_emission_order() {
        let event = PerformanceEvent {
            threshold_ms: 2,
            ..event(3, true)
        };
        let lines = render_lines(&event, classify(3, 2, true), true);

        let prefixes: Vec<_> = lines
            .iter()
            .map(|l| l.message.split(':').next().unwrap())
            .collect();
        assert_eq!(prefixes, vec!["SLOW_OPERATION", "PERFORMANCE", "FAST_OPERATION"]);
    }
}
