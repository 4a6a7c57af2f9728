//! # Admission Policy
//!
//! Pure classification of a request into real-time or scheduled execution.
//! The policy never executes or enqueues anything; the router acts on the
//! verdict.

use serde::{Deserialize, Serialize};

use crate::request::ExecutionPreferences;
use crate::signals::{OperationKind, QuerySignals};

pub const DEFAULT_REALTIME_THRESHOLD_SECS: f64 = 5.0;

/// Why a query was sent to the job queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ScheduleReason {
    /// The caller asked for scheduled execution.
    Requested,
    NoIndexedFilter,
    HeavyOperation { kind: OperationKind },
    OverBudget { estimated: f64, threshold: f64 },
}

impl std::fmt::Display for ScheduleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "scheduled execution was requested"),
            Self::NoIndexedFilter => write!(f, "query does not filter on an indexed column"),
            Self::HeavyOperation { kind } => write!(f, "{} queries always run as jobs", kind),
            Self::OverBudget {
                estimated,
                threshold,
            } => write!(
                f,
                "estimated cost {}s exceeds the real-time budget of {}s",
                estimated, threshold
            ),
        }
    }
}

/// Verdict of [`AdmissionPolicy::classify`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    RealTime,
    Scheduled(ScheduleReason),
}

impl Admission {
    pub fn is_real_time(&self) -> bool {
        matches!(self, Self::RealTime)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionPolicy {
    realtime_threshold_secs: f64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REALTIME_THRESHOLD_SECS)
    }
}

impl AdmissionPolicy {
    pub fn new(realtime_threshold_secs: f64) -> Self {
        Self {
            realtime_threshold_secs,
        }
    }

    pub fn threshold_secs(&self) -> f64 {
        self.realtime_threshold_secs
    }

    /// Real-time only when every predicate holds, in this order:
    /// no explicit schedule request, an indexed filter, a light operation,
    /// and a cost within budget. The first failing predicate is reported.
    pub fn classify(&self, signals: &QuerySignals, prefs: &ExecutionPreferences) -> Admission {
        if !prefs.real_time {
            return Admission::Scheduled(ScheduleReason::Requested);
        }
        if !signals.uses_indexed_filter {
            return Admission::Scheduled(ScheduleReason::NoIndexedFilter);
        }
        if signals.operation_kind.is_heavy() {
            return Admission::Scheduled(ScheduleReason::HeavyOperation {
                kind: signals.operation_kind,
            });
        }
        // NaN costs fail this comparison and schedule
        if !(signals.estimated_cost_seconds <= self.realtime_threshold_secs) {
            return Admission::Scheduled(ScheduleReason::OverBudget {
                estimated: signals.estimated_cost_seconds,
                threshold: self.realtime_threshold_secs,
            });
        }
        Admission::RealTime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signals(indexed: bool, kind: OperationKind, cost: f64) -> QuerySignals {
        QuerySignals {
            uses_indexed_filter: indexed,
            operation_kind: kind,
            estimated_cost_seconds: cost,
        }
    }

    fn arb_kind() -> impl Strategy<Value = OperationKind> {
        prop_oneof![
            Just(OperationKind::Projection),
            Just(OperationKind::Join),
            Just(OperationKind::Aggregation),
            Just(OperationKind::Insert),
            Just(OperationKind::Unknown),
        ]
    }

    fn arb_prefs() -> impl Strategy<Value = ExecutionPreferences> {
        (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(real_time, force_real_time, bypass_cache)| ExecutionPreferences {
                real_time,
                force_real_time,
                bypass_cache,
            },
        )
    }

    #[test]
    fn test_scenario_indexed_projection_is_real_time() {
        let policy = AdmissionPolicy::default();
        let verdict = policy.classify(
            &signals(true, OperationKind::Projection, 3.0),
            &ExecutionPreferences::default(),
        );
        assert_eq!(verdict, Admission::RealTime);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let policy = AdmissionPolicy::new(5.0);
        let prefs = ExecutionPreferences::default();
        assert!(policy
            .classify(&signals(true, OperationKind::Projection, 5.0), &prefs)
            .is_real_time());
        assert_eq!(
            policy.classify(&signals(true, OperationKind::Projection, 5.01), &prefs),
            Admission::Scheduled(ScheduleReason::OverBudget {
                estimated: 5.01,
                threshold: 5.0
            })
        );
    }

    #[test]
    fn test_explicit_schedule_wins() {
        let policy = AdmissionPolicy::default();
        let prefs = ExecutionPreferences {
            real_time: false,
            ..ExecutionPreferences::default()
        };
        assert_eq!(
            policy.classify(&signals(true, OperationKind::Projection, 1.0), &prefs),
            Admission::Scheduled(ScheduleReason::Requested)
        );
    }

    #[test]
    fn test_explicit_schedule_beats_force() {
        let policy = AdmissionPolicy::default();
        let prefs = ExecutionPreferences {
            real_time: false,
            force_real_time: true,
            bypass_cache: false,
        };
        assert_eq!(
            policy.classify(&signals(true, OperationKind::Projection, 1.0), &prefs),
            Admission::Scheduled(ScheduleReason::Requested)
        );
    }

    #[test]
    fn test_unknown_kind_with_low_cost_is_real_time() {
        // Only Join, Aggregation and Insert are excluded by kind
        let policy = AdmissionPolicy::default();
        assert!(policy
            .classify(
                &signals(true, OperationKind::Unknown, 1.0),
                &ExecutionPreferences::default()
            )
            .is_real_time());
    }

    #[test]
    fn test_nan_cost_schedules() {
        let policy = AdmissionPolicy::default();
        assert!(!policy
            .classify(
                &signals(true, OperationKind::Projection, f64::NAN),
                &ExecutionPreferences::default()
            )
            .is_real_time());
    }

    #[test]
    fn test_reason_display() {
        let reason = ScheduleReason::HeavyOperation {
            kind: OperationKind::Join,
        };
        assert_eq!(reason.to_string(), "join queries always run as jobs");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_unindexed_always_schedules(
            kind in arb_kind(),
            cost in 0.0f64..1000.0,
            prefs in arb_prefs(),
            threshold in 0.0f64..100.0,
        ) {
            let verdict = AdmissionPolicy::new(threshold).classify(&signals(false, kind, cost), &prefs);
            prop_assert!(!verdict.is_real_time());
        }

        #[test]
        fn prop_heavy_kinds_always_schedule(
            kind in prop_oneof![
                Just(OperationKind::Join),
                Just(OperationKind::Aggregation),
                Just(OperationKind::Insert),
            ],
            indexed in any::<bool>(),
            cost in 0.0f64..1000.0,
            prefs in arb_prefs(),
        ) {
            let verdict = AdmissionPolicy::default().classify(&signals(indexed, kind, cost), &prefs);
            prop_assert!(!verdict.is_real_time());
        }

        #[test]
        fn prop_all_predicates_admit_real_time(
            kind in prop_oneof![Just(OperationKind::Projection), Just(OperationKind::Unknown)],
            threshold in 0.0f64..100.0,
            fraction in 0.0f64..=1.0,
            force in any::<bool>(),
        ) {
            let prefs = ExecutionPreferences {
                real_time: true,
                force_real_time: force,
                bypass_cache: false,
            };
            let cost = threshold * fraction;
            let verdict = AdmissionPolicy::new(threshold).classify(&signals(true, kind, cost), &prefs);
            prop_assert_eq!(verdict, Admission::RealTime);
        }

        #[test]
        fn prop_schedule_request_always_schedules(
            indexed in any::<bool>(),
            kind in arb_kind(),
            cost in 0.0f64..1000.0,
            force in any::<bool>(),
            bypass in any::<bool>(),
        ) {
            let prefs = ExecutionPreferences {
                real_time: false,
                force_real_time: force,
                bypass_cache: bypass,
            };
            let verdict = AdmissionPolicy::default().classify(&signals(indexed, kind, cost), &prefs);
            prop_assert_eq!(verdict, Admission::Scheduled(ScheduleReason::Requested));
        }

        #[test]
        fn prop_classification_is_deterministic(
            indexed in any::<bool>(),
            kind in arb_kind(),
            cost in 0.0f64..100.0,
            prefs in arb_prefs(),
        ) {
            let policy = AdmissionPolicy::default();
            let s = signals(indexed, kind, cost);
            prop_assert_eq!(policy.classify(&s, &prefs), policy.classify(&s, &prefs));
        }
    }
}
