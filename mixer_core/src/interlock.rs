//! Interlock monitor: threshold checks over the latest link history.
//!
//! The monitor is pure. It builds a fresh list of typed tests from the
//! history, runs them, and returns every violation. Tripping the system is
//! the controller's job.

use std::fmt;

use crate::config::{InterlockCfg, RangeLimits};
use crate::history::HistoryLog;
use crate::state::OperatingState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    BelowMinimum,
    BelowWarning,
    AboveWarning,
    AboveMaximum,
    NotInDesiredState,
    NotFinite,
}

impl ViolationKind {
    pub const fn describe(self) -> &'static str {
        match self {
            Self::BelowMinimum => "below minimum",
            Self::BelowWarning => "below warning threshold",
            Self::AboveWarning => "above warning threshold",
            Self::AboveMaximum => "above maximum",
            Self::NotInDesiredState => "not in desired state",
            Self::NotFinite => "is not a finite reading",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub test: String,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.test, self.kind.describe())
    }
}

/// Classify a reading against a four-threshold band.
///
/// Hard limits are checked before warnings; a value equal to any threshold
/// passes.
pub fn check_range(observed: f64, limits: &RangeLimits) -> Option<ViolationKind> {
    if !observed.is_finite() {
        Some(ViolationKind::NotFinite)
    } else if observed < limits.min {
        Some(ViolationKind::BelowMinimum)
    } else if observed < limits.warn_min {
        Some(ViolationKind::BelowWarning)
    } else if observed > limits.max {
        Some(ViolationKind::AboveMaximum)
    } else if observed > limits.warn_max {
        Some(ViolationKind::AboveWarning)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterlockTest {
    Range {
        name: String,
        observed: f64,
        limits: RangeLimits,
    },
    Binary {
        name: String,
        observed: bool,
        required: bool,
    },
}

impl InterlockTest {
    pub fn name(&self) -> &str {
        match self {
            Self::Range { name, .. } | Self::Binary { name, .. } => name,
        }
    }

    pub fn check(&self) -> Option<Violation> {
        let kind = match self {
            Self::Range {
                observed, limits, ..
            } => check_range(*observed, limits)?,
            Self::Binary {
                observed, required, ..
            } => {
                if observed == required {
                    return None;
                }
                ViolationKind::NotInDesiredState
            }
        };
        Some(Violation {
            test: self.name().to_string(),
            kind,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterlockReport {
    pub violations: Vec<Violation>,
    /// Tests that had data and ran.
    pub tests_run: usize,
}

impl InterlockReport {
    pub fn is_clear(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for InterlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterlockMonitor {
    cfg: InterlockCfg,
}

impl InterlockMonitor {
    pub fn new(cfg: InterlockCfg) -> Self {
        Self { cfg }
    }

    pub fn cfg(&self) -> &InterlockCfg {
        &self.cfg
    }

    /// Time (ms) since which channel `ch` has been commanded its current value.
    fn held_since(history: &HistoryLog, ch: usize) -> Option<u64> {
        let setpoints = history.setpoints();
        let current = setpoints.last()?.value.flows.get(ch).copied()?;
        let mut since = setpoints.last()?.t_ms;
        for s in setpoints.iter().rev() {
            match s.value.flows.get(ch) {
                Some(v) if *v == current => since = s.t_ms,
                _ => break,
            }
        }
        Some(since)
    }

    /// Build the tests that have data right now.
    pub fn build_tests(
        &self,
        history: &HistoryLog,
        link_healthy: bool,
        now_ms: u64,
    ) -> Vec<InterlockTest> {
        let cfg = &self.cfg;
        let mut tests = Vec::new();
        let latest_sp = history.latest_setpoint();

        if let Some(sp) = latest_sp {
            for (i, s) in sp.value.flows.iter().enumerate() {
                tests.push(InterlockTest::Range {
                    name: format!("MFC {} Setpoint", i + 1),
                    observed: *s,
                    limits: cfg.setpoint,
                });
            }
        }

        if let (Some(sp), Some(resp)) = (latest_sp, history.latest_response()) {
            let settle_ms = u64::try_from(cfg.settle.as_millis()).unwrap_or(u64::MAX);
            for (i, (s, r)) in sp.value.flows.iter().zip(&resp.value).enumerate() {
                let idle = s.abs() <= cfg.idle_band;
                // near zero the ceiling is absolute, so a stuck-open MFC still trips
                let scale = if idle { cfg.idle_band } else { *s };
                tests.push(InterlockTest::Range {
                    name: format!("MFC {} Response", i + 1),
                    observed: *r,
                    limits: RangeLimits::new(
                        -cfg.idle_band,
                        -cfg.idle_band,
                        cfg.response_warn_ratio * scale,
                        cfg.response_max_ratio * scale,
                    ),
                });
                if idle {
                    continue;
                }
                let settled = settle_ms == 0
                    || Self::held_since(history, i)
                        .is_some_and(|since| now_ms.saturating_sub(since) >= settle_ms);
                if settled {
                    tests.push(InterlockTest::Range {
                        name: format!("MFC {} Response Error", i + 1),
                        observed: (r - s).abs() / s.abs(),
                        limits: RangeLimits::new(
                            0.0,
                            0.0,
                            cfg.error_warn_ratio,
                            cfg.error_max_ratio,
                        ),
                    });
                }
            }
        }

        if let Some(readings) = history.latest_sensors() {
            for (limit, value) in cfg.sensors.iter().zip(&readings.value) {
                tests.push(InterlockTest::Range {
                    name: limit.name.clone(),
                    observed: *value,
                    limits: limit.limits,
                });
            }
        }

        if let (Some(sp), Some(valve)) = (latest_sp, history.latest_valve())
            && valve.t_ms > sp.t_ms
        {
            tests.push(InterlockTest::Binary {
                name: "Valve State".to_string(),
                observed: valve.value == sp.value.valve.code(),
                required: true,
            });
        }

        tests.push(InterlockTest::Binary {
            name: "Device Link".to_string(),
            observed: link_healthy,
            required: true,
        });
        tests
    }

    /// Range-check flows that are about to be commanded.
    pub fn check_setpoints(&self, flows: &[f64]) -> InterlockReport {
        let violations = flows
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                InterlockTest::Range {
                    name: format!("MFC {} Setpoint", i + 1),
                    observed: *s,
                    limits: self.cfg.setpoint,
                }
                .check()
            })
            .collect();
        InterlockReport {
            violations,
            tests_run: flows.len(),
        }
    }

    /// Run every applicable test. Outside the run states nothing is checked.
    pub fn evaluate(
        &self,
        history: &HistoryLog,
        link_healthy: bool,
        state: OperatingState,
        now_ms: u64,
    ) -> InterlockReport {
        if !state.is_active() {
            return InterlockReport::default();
        }
        let tests = self.build_tests(history, link_healthy, now_ms);
        InterlockReport {
            tests_run: tests.len(),
            violations: tests.iter().filter_map(InterlockTest::check).collect(),
        }
    }
}
