// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `Satellite` trait: user hooks driven by the FSM.
//!
//! Implementations override the transition callbacks they care about; every
//! default succeeds after logging. Callback errors are routed through the
//! FSM's `on_failure` hook into the ERROR state.

use crate::config::Configuration;
use crate::protocol::cscp::State;
use crate::satellite::fsm::StopToken;
use std::fmt;

/// Error type surfaced by transition callbacks.
///
/// Satellites wrap whatever went wrong into a message; the FSM logs it and
/// moves to ERROR.
#[derive(Debug, Clone)]
pub struct SatelliteError {
    message: String,
}

impl SatelliteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SatelliteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SatelliteError {}

impl From<&str> for SatelliteError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for SatelliteError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for SatelliteError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Result of a transition callback.
pub type TransitionResult = Result<(), SatelliteError>;

/// User hooks for the satellite lifecycle.
///
/// Each callback runs on a dedicated worker thread while the FSM reports the
/// corresponding transient state. `running` is handed a [`StopToken`] and
/// must return promptly once a stop is requested.
pub trait Satellite: Send + 'static {
    /// Whether the `reconfigure` transition is offered. Sampled once at FSM
    /// construction.
    fn supports_reconfigure(&self) -> bool {
        false
    }

    fn initializing(&mut self, _config: &Configuration) -> TransitionResult {
        log::info!("[satellite] Initializing - default");
        Ok(())
    }

    fn launching(&mut self) -> TransitionResult {
        log::info!("[satellite] Launching - default");
        Ok(())
    }

    fn landing(&mut self) -> TransitionResult {
        log::info!("[satellite] Landing - default");
        Ok(())
    }

    fn reconfiguring(&mut self, _partial: &Configuration) -> TransitionResult {
        log::info!("[satellite] Reconfiguring - default");
        Ok(())
    }

    fn starting(&mut self, run_identifier: &str) -> TransitionResult {
        log::info!("[satellite] Starting run {} - default", run_identifier);
        Ok(())
    }

    fn stopping(&mut self) -> TransitionResult {
        log::info!("[satellite] Stopping - default");
        Ok(())
    }

    fn running(&mut self, _stop: &StopToken) -> TransitionResult {
        log::info!("[satellite] Running - default");
        Ok(())
    }

    /// Safe-mode entry. The default stops a run in progress and lands.
    fn interrupting(&mut self, previous_state: State) -> TransitionResult {
        log::info!(
            "[satellite] Interrupting from {} - default",
            previous_state
        );
        if previous_state == State::Run {
            log::debug!("[satellite] Interrupting: execute stopping");
            self.stopping()?;
        }
        log::debug!("[satellite] Interrupting: execute landing");
        self.landing()
    }

    /// Invoked after any callback failure, before the FSM settles in ERROR.
    fn on_failure(&mut self, previous_state: State) {
        log::info!("[satellite] Failure from {} - default", previous_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::satellite::fsm::{Fsm, Transition};
    use std::time::{Duration, Instant};

    struct Recorder {
        calls: std::sync::Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl Satellite for Recorder {
        fn stopping(&mut self) -> TransitionResult {
            self.calls.lock().push("stopping");
            Ok(())
        }
        fn landing(&mut self) -> TransitionResult {
            self.calls.lock().push("landing");
            Ok(())
        }
    }

    #[test]
    fn test_default_interrupt_from_run_stops_then_lands() {
        let calls = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut recorder = Recorder {
            calls: std::sync::Arc::clone(&calls),
        };
        recorder.interrupting(State::Run).unwrap();
        assert_eq!(*calls.lock(), vec!["stopping", "landing"]);
    }

    #[test]
    fn test_default_interrupt_from_orbit_only_lands() {
        let calls = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut recorder = Recorder {
            calls: std::sync::Arc::clone(&calls),
        };
        recorder.interrupting(State::Orbit).unwrap();
        assert_eq!(*calls.lock(), vec!["landing"]);
    }

    #[test]
    fn test_defaults_drive_full_lifecycle() {
        struct Defaults;
        impl Satellite for Defaults {}

        let fsm = Fsm::new(Box::new(Defaults));
        let wait = |expected: State| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while fsm.state() != expected {
                assert!(Instant::now() < deadline, "never reached {}", expected);
                std::thread::sleep(Duration::from_millis(2));
            }
        };

        fsm.react(Transition::Initialize).unwrap();
        wait(State::Init);
        fsm.react(Transition::Launch).unwrap();
        wait(State::Orbit);
        fsm.react(Transition::Start).unwrap();
        wait(State::Run);
        fsm.react(Transition::Stop).unwrap();
        wait(State::Orbit);
        fsm.react(Transition::Land).unwrap();
        wait(State::Init);
    }
}
