//! Failure injection for the mock scan engine.
//!
//! Operations are identified by the capability method name, for example
//! `"execute_event"`, `"set_detector_power"`, or `"clear_detector_overload"`.
//! Every engine call runs [`ErrorConfig::check_operation`] first and returns
//! the injected [`DriverError`] instead of touching the simulated hardware.

use super::rng::MockRng;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tilescan_core::error::{DriverError, DriverErrorKind};

/// Wildcard key matching every operation in a rate table.
const ANY_OPERATION: &str = "*";

/// Injected failure behaviour.
#[derive(Clone, Debug, Default)]
pub struct ErrorConfig {
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

/// A deterministic failure pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorScenario {
    /// Only the `call`-th invocation (1-based) of `operation` fails.
    FailOnCall {
        /// Capability method name.
        operation: &'static str,
        /// 1-based call number that fails.
        call: u32,
    },
    /// Every invocation of `operation` after the first `count` fails.
    FailAfterN {
        /// Capability method name.
        operation: &'static str,
        /// Number of successful calls before failures start.
        count: u32,
    },
    /// Every invocation of `operation` times out.
    Timeout {
        /// Capability method name.
        operation: &'static str,
    },
    /// The first call of anything loses the link; all later calls fail too.
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    calls: HashMap<&'static str, u32>,
    communication_lost: bool,
}

impl ErrorConfig {
    /// No injected failures.
    pub fn none() -> Self {
        Self::default()
    }

    /// Uniform random failure probability for every operation.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self {
            failure_rates: Arc::new(HashMap::from([(ANY_OPERATION, rate)])),
            rng: Arc::new(MockRng::new(seed)),
            ..Self::default()
        }
    }

    /// A single deterministic scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several deterministic scenarios, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            ..Self::default()
        }
    }

    /// Random failure probability per operation name.
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            ..Self::default()
        }
    }

    /// Record one call of `operation` and decide whether it fails.
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                "Communication lost",
            ));
        }

        let call = {
            let counter = state.calls.entry(operation).or_insert(0);
            *counter += 1;
            *counter
        };

        for scenario in self.scenarios.iter() {
            match *scenario {
                ErrorScenario::FailOnCall { operation: op, call: n } if op == operation && n == call => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Injected failure on call {call} of '{operation}'"),
                    ));
                }
                ErrorScenario::FailAfterN { operation: op, count } if op == operation && call > count => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Injected failure after {count} operations"),
                    ));
                }
                ErrorScenario::Timeout { operation: op } if op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Operation '{operation}' timed out"),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get(ANY_OPERATION))
            .copied()
            .unwrap_or(0.0);

        if self.rng.chance(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{operation}'"),
            ));
        }

        Ok(())
    }

    /// Number of times `operation` has been checked.
    pub fn calls(&self, operation: &str) -> u32 {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Clear call counters and restore communication.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}
