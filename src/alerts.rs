use crate::config::AlertThresholds;
use crate::model::{Alert, AlertKind, Sample};

/// Stateless threshold check run against every sample.
///
/// Comparisons are strict and there is no suppression window, so a condition
/// that persists raises an alert on every evaluation.
#[derive(Debug, Clone, Copy)]
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, sample: &Sample) -> Vec<Alert> {
        let t = &self.thresholds;
        let checks = [
            (AlertKind::HighCpu, Some(sample.cpu_percent), t.cpu_percent),
            (
                AlertKind::HighMemory,
                Some(sample.memory_percent),
                t.memory_percent,
            ),
            (AlertKind::HighSwap, Some(sample.swap_percent), t.swap_percent),
            (
                AlertKind::HighTemperature,
                sample.temperature_c,
                t.temperature_c,
            ),
        ];

        checks
            .into_iter()
            .filter_map(|(kind, value, threshold)| {
                let value = value?;
                (value > threshold).then_some(Alert {
                    kind,
                    value,
                    threshold,
                    timestamp: sample.timestamp,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::sample_with_cpu;

    fn evaluator() -> AlertEvaluator {
        AlertEvaluator::new(AlertThresholds::default())
    }

    #[test]
    fn high_cpu_raises_exactly_one_alert() {
        let alerts = evaluator().evaluate(&sample_with_cpu(95.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HighCpu);
        assert_eq!(alerts[0].value, 95.0);
        assert_eq!(alerts[0].threshold, 90.0);
    }

    #[test]
    fn threshold_itself_does_not_alert() {
        assert!(evaluator().evaluate(&sample_with_cpu(90.0)).is_empty());
    }

    #[test]
    fn swap_temperature_and_memory_thresholds() {
        let mut sample = sample_with_cpu(5.0);
        sample.swap_percent = 51.0;
        sample.temperature_c = Some(81.5);
        sample.memory_percent = 93.0;
        let kinds: Vec<AlertKind> = evaluator()
            .evaluate(&sample)
            .into_iter()
            .map(|a| a.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::HighMemory,
                AlertKind::HighSwap,
                AlertKind::HighTemperature
            ]
        );
    }

    #[test]
    fn absent_temperature_never_alerts() {
        let evaluator = AlertEvaluator::new(AlertThresholds {
            temperature_c: -1.0,
            ..AlertThresholds::default()
        });
        let sample = sample_with_cpu(1.0);
        assert!(evaluator.evaluate(&sample).is_empty());
    }
}
