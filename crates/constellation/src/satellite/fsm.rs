// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Satellite finite state machine.
//!
//! Steady states (NEW, INIT, ORBIT, RUN, SAFE, ERROR) are connected by
//! transient states (initializing, launching, ...) during which the user
//! callback runs on a worker thread. Completion transitions (`initialized`,
//! `launched`, ...) are fired by the worker when the callback returns; a
//! callback error moves the machine to ERROR through the `on_failure` hook.
//!
//! ```text
//!  NEW --initialize--> initializing --> INIT --launch--> launching --> ORBIT
//!  ORBIT --start--> starting --> RUN --stop--> stopping --> ORBIT
//!  ORBIT --land--> landing --> INIT      ORBIT --reconfigure--> reconfiguring
//!  RUN/ORBIT --interrupt--> interrupting --> SAFE
//!  any --failure--> ERROR       SAFE/ERROR --initialize--> initializing
//! ```

use crate::config::Configuration;
use crate::protocol::cscp::{CscpKind, CscpPayload, State};
use crate::satellite::satellite::Satellite;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Cooperative cancellation token handed to long-running callbacks.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the callback to return at the next opportunity.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// True once a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// FSM transition, including the completion transitions fired internally by
/// transient workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Initialize,
    Initialized,
    Launch,
    Launched,
    Land,
    Landed,
    Reconfigure,
    Reconfigured,
    Start,
    Started,
    Stop,
    Stopped,
    Interrupt,
    Interrupted,
    Failure,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Initialize => "initialize",
            Transition::Initialized => "initialized",
            Transition::Launch => "launch",
            Transition::Launched => "launched",
            Transition::Land => "land",
            Transition::Landed => "landed",
            Transition::Reconfigure => "reconfigure",
            Transition::Reconfigured => "reconfigured",
            Transition::Start => "start",
            Transition::Started => "started",
            Transition::Stop => "stop",
            Transition::Stopped => "stopped",
            Transition::Interrupt => "interrupt",
            Transition::Interrupted => "interrupted",
            Transition::Failure => "failure",
        };
        write!(f, "{}", name)
    }
}

/// Error returned for transitions not permitted in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub transition: Transition,
    pub state: State,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transition {} not allowed from {} state",
            self.transition, self.state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Permitted transitions: `(current, transition) -> next`.
fn transition_table(state: State, transition: Transition) -> Option<State> {
    use State::*;
    use Transition::*;
    match (state, transition) {
        (New, Initialize) => Some(Initializing),
        (Initializing, Initialized) => Some(Init),
        (Init, Initialize) => Some(Initializing),
        (Init, Launch) => Some(Launching),
        (Launching, Launched) => Some(Orbit),
        (Launching, Interrupt) => Some(Interrupting),
        (Orbit, Land) => Some(Landing),
        (Orbit, Reconfigure) => Some(Reconfiguring),
        (Orbit, Start) => Some(Starting),
        (Orbit, Interrupt) => Some(Interrupting),
        (Landing, Landed) => Some(Init),
        (Reconfiguring, Reconfigured) => Some(Orbit),
        (Reconfiguring, Interrupt) => Some(Interrupting),
        (Starting, Started) => Some(Run),
        (Starting, Interrupt) => Some(Interrupting),
        (Run, Stop) => Some(Stopping),
        (Run, Interrupt) => Some(Interrupting),
        (Stopping, Stopped) => Some(Orbit),
        (Stopping, Interrupt) => Some(Interrupting),
        (Interrupting, Interrupted) => Some(Safe),
        (Safe, Initialize) => Some(Initializing),
        (Error, Initialize) => Some(Initializing),
        (s, Failure) if s != Error => Some(Error),
        _ => None,
    }
}

/// Notified on entry of every steady state (drives extrasystoles).
pub type StateChangeCallback = Arc<dyn Fn(State) + Send + Sync>;

struct Worker {
    stop: StopToken,
    handle: JoinHandle<()>,
}

struct Guarded {
    transient_worker: Option<Worker>,
    run_worker: Option<Worker>,
    pending_config: Option<Configuration>,
    pending_partial: Option<Configuration>,
    pending_run_id: String,
    previous_steady: State,
}

struct Inner {
    state: AtomicU8,
    satellite: Mutex<Box<dyn Satellite>>,
    guarded: Mutex<Guarded>,
    state_listener: Mutex<Option<StateChangeCallback>>,
    // Sampled at construction so command dispatch never needs the satellite
    // lock, which a long-running callback may hold.
    supports_reconfigure: AtomicBool,
}

/// The satellite finite state machine.
///
/// Cloneable handle; all clones drive the same machine.
#[derive(Clone)]
pub struct Fsm {
    inner: Arc<Inner>,
}

impl Fsm {
    pub fn new(satellite: Box<dyn Satellite>) -> Self {
        let supports_reconfigure = satellite.supports_reconfigure();
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(State::New as u8),
                satellite: Mutex::new(satellite),
                guarded: Mutex::new(Guarded {
                    transient_worker: None,
                    run_worker: None,
                    pending_config: None,
                    pending_partial: None,
                    pending_run_id: String::new(),
                    previous_steady: State::New,
                }),
                state_listener: Mutex::new(None),
                supports_reconfigure: AtomicBool::new(supports_reconfigure),
            }),
        }
    }

    /// Register the steady-state entry listener (heartbeat extrasystole).
    pub fn set_state_listener(&self, listener: StateChangeCallback) {
        *self.inner.state_listener.lock() = Some(listener);
    }

    /// Current state, readable from any thread without locking.
    pub fn state(&self) -> State {
        State::from_u8(self.inner.state.load(Ordering::Acquire)).unwrap_or(State::New)
    }

    /// True if the transition is permitted in the current state.
    pub fn is_allowed(&self, transition: Transition) -> bool {
        transition_table(self.state(), transition).is_some()
    }

    /// Perform a transition or fail with [`InvalidTransition`].
    pub fn react(&self, transition: Transition) -> Result<(), InvalidTransition> {
        let mut guarded = self.inner.guarded.lock();
        let current = self.state();
        let next = transition_table(current, transition).ok_or(InvalidTransition {
            transition,
            state: current,
        })?;
        self.apply(&mut guarded, next);
        Ok(())
    }

    /// Perform a transition if permitted; returns whether it was.
    pub fn react_if_allowed(&self, transition: Transition) -> bool {
        self.react(transition).is_ok()
    }

    /// React to a CSCP transition command, producing the reply kind and
    /// message. Never changes state on a rejected command.
    pub fn react_cscp(&self, transition: Transition, payload: &CscpPayload) -> (CscpKind, String) {
        let mut guarded = self.inner.guarded.lock();
        let current = self.state();

        if transition == Transition::Reconfigure
            && !self.inner.supports_reconfigure.load(Ordering::Relaxed)
        {
            return (
                CscpKind::NotImplemented,
                "Transition reconfigure is not implemented by this satellite".to_string(),
            );
        }

        if transition_table(current, transition).is_none() {
            return (
                CscpKind::Invalid,
                format!("Transition {} not allowed from {} state", transition, current),
            );
        }

        // Payload requirements of the individual transitions.
        let mut ignored_payload = false;
        match transition {
            Transition::Initialize => match payload {
                CscpPayload::Dictionary(dict) => {
                    guarded.pending_config = Some(Configuration::from_dictionary(dict.clone()));
                }
                _ => {
                    return (
                        CscpKind::Incomplete,
                        "Transition initialize requires a configuration payload".to_string(),
                    );
                }
            },
            Transition::Reconfigure => match payload {
                CscpPayload::Dictionary(dict) => {
                    guarded.pending_partial = Some(Configuration::from_dictionary(dict.clone()));
                }
                _ => {
                    return (
                        CscpKind::Incomplete,
                        "Transition reconfigure requires a configuration payload".to_string(),
                    );
                }
            },
            Transition::Start => match payload {
                CscpPayload::Str(run_id) => {
                    guarded.pending_run_id = run_id.clone();
                }
                _ => {
                    return (
                        CscpKind::Incomplete,
                        "Transition start requires a run identifier payload".to_string(),
                    );
                }
            },
            _ => ignored_payload = !payload.is_none(),
        }

        let next = match transition_table(current, transition) {
            Some(next) => next,
            None => unreachable!("transition validity checked above"),
        };
        self.apply(&mut guarded, next);

        let message = if ignored_payload {
            format!("Transition {} is being initiated (payload frame is ignored)", transition)
        } else {
            format!("Transition {} is being initiated", transition)
        };
        (CscpKind::Success, message)
    }

    /// Transition to ERROR after a callback failure, running the
    /// `on_failure` hook with the previous steady state.
    fn fail(&self, reason: &str) {
        let mut guarded = self.inner.guarded.lock();
        let current = self.state();
        if current == State::Error {
            return;
        }
        log::error!("[fsm] failure in {} state: {}", current, reason);
        let previous = guarded.previous_steady;

        if let Some(worker) = guarded.run_worker.take() {
            worker.stop.request_stop();
        }
        if let Some(worker) = guarded.transient_worker.take() {
            worker.stop.request_stop();
        }

        self.enter_state(State::Error);
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            inner.satellite.lock().on_failure(previous);
        });
    }

    fn enter_state(&self, state: State) {
        self.inner.state.store(state as u8, Ordering::Release);
        log::debug!("[fsm] entered state {}", state);
        if state.is_steady() {
            let listener = self.inner.state_listener.lock().clone();
            if let Some(listener) = listener {
                listener(state);
            }
        }
    }

    /// Request a stop of all workers and wait for them to finish.
    ///
    /// Must not be called from a worker thread.
    pub(crate) fn shutdown_workers(&self) {
        let (transient, run) = {
            let mut guarded = self.inner.guarded.lock();
            (guarded.transient_worker.take(), guarded.run_worker.take())
        };
        for worker in [transient, run].into_iter().flatten() {
            worker.stop.request_stop();
            let _ = worker.handle.join();
        }
    }

    /// Commit a validated transition and spawn the matching worker.
    fn apply(&self, guarded: &mut Guarded, next: State) {
        let current = self.state();
        if current.is_steady() {
            guarded.previous_steady = current;
        }
        // Last steady state before this transition, for the failure and
        // interrupt hooks.
        let previous = guarded.previous_steady;
        self.enter_state(next);
        if next.is_steady() {
            guarded.previous_steady = next;
        }

        match next {
            State::Initializing
            | State::Launching
            | State::Landing
            | State::Reconfiguring
            | State::Starting => {
                let predecessor = guarded.transient_worker.take();
                guarded.transient_worker =
                    Some(self.spawn_transient(next, predecessor, guarded));
            }
            State::Stopping | State::Interrupting => {
                // The running worker must finish before the callback runs.
                let run_worker = guarded.run_worker.take();
                if let Some(worker) = &run_worker {
                    worker.stop.request_stop();
                }
                let predecessor = guarded.transient_worker.take();
                let joined = match (predecessor, run_worker) {
                    (Some(a), Some(b)) => {
                        a.stop.request_stop();
                        Some(chain_workers(a, b))
                    }
                    (Some(a), None) => {
                        a.stop.request_stop();
                        Some(a)
                    }
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                };
                guarded.transient_worker = Some(self.spawn_transient(next, joined, guarded));
            }
            State::Run => {
                guarded.run_worker = Some(self.spawn_running());
            }
            State::Error => {
                // Only reachable through an external `failure` transition;
                // worker-side failures go through `fail()`.
                if let Some(worker) = guarded.run_worker.take() {
                    worker.stop.request_stop();
                }
                if let Some(worker) = guarded.transient_worker.take() {
                    worker.stop.request_stop();
                }
                let inner = Arc::clone(&self.inner);
                thread::spawn(move || {
                    inner.satellite.lock().on_failure(previous);
                });
            }
            _ => {}
        }
    }

    fn spawn_transient(
        &self,
        transient: State,
        predecessor: Option<Worker>,
        guarded: &mut Guarded,
    ) -> Worker {
        let stop = StopToken::new();
        let stop_clone = stop.clone();
        let fsm = self.clone();
        let config = guarded.pending_config.take();
        let partial = guarded.pending_partial.take();
        let run_id = guarded.pending_run_id.clone();
        let interrupt_from = guarded.previous_steady;

        let handle = thread::spawn(move || {
            if let Some(worker) = predecessor {
                worker.stop.request_stop();
                let _ = worker.handle.join();
            }

            let result = {
                let mut satellite = fsm.inner.satellite.lock();
                match transient {
                    State::Initializing => satellite.initializing(&config.unwrap_or_default()),
                    State::Launching => satellite.launching(),
                    State::Landing => satellite.landing(),
                    State::Reconfiguring => satellite.reconfiguring(&partial.unwrap_or_default()),
                    State::Starting => satellite.starting(&run_id),
                    State::Stopping => satellite.stopping(),
                    State::Interrupting => satellite.interrupting(interrupt_from),
                    _ => Ok(()),
                }
            };

            match result {
                Ok(()) => {
                    let completion = match transient {
                        State::Initializing => Transition::Initialized,
                        State::Launching => Transition::Launched,
                        State::Landing => Transition::Landed,
                        State::Reconfiguring => Transition::Reconfigured,
                        State::Starting => Transition::Started,
                        State::Stopping => Transition::Stopped,
                        State::Interrupting => Transition::Interrupted,
                        _ => return,
                    };
                    // Ignored when the machine moved on (interrupt or
                    // failure arrived while the callback ran).
                    let _ = fsm.react_if_allowed(completion);
                }
                Err(e) => fsm.fail(&e.to_string()),
            }
        });

        Worker {
            stop: stop_clone,
            handle,
        }
    }

    fn spawn_running(&self) -> Worker {
        let stop = StopToken::new();
        let stop_clone = stop.clone();
        let fsm = self.clone();

        let handle = thread::spawn(move || {
            let result = fsm.inner.satellite.lock().running(&stop);
            if let Err(e) = result {
                fsm.fail(&e.to_string());
            }
        });

        Worker {
            stop: stop_clone,
            handle,
        }
    }
}

/// Merge two workers into one join target: stops and joins both.
fn chain_workers(first: Worker, second: Worker) -> Worker {
    let stop = StopToken::new();
    let stop_clone = stop.clone();
    let handle = thread::spawn(move || {
        first.stop.request_stop();
        second.stop.request_stop();
        let _ = first.handle.join();
        let _ = second.handle.join();
    });
    Worker {
        stop: stop_clone,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::satellite::satellite::{SatelliteError, TransitionResult};
    use std::time::{Duration, Instant};

    /// Test satellite whose transitional callbacks wait on a progress gate.
    struct GatedSatellite {
        progress: Arc<AtomicBool>,
        fail_next: Arc<AtomicBool>,
    }

    impl GatedSatellite {
        fn create() -> (Box<Self>, Arc<AtomicBool>, Arc<AtomicBool>) {
            let progress = Arc::new(AtomicBool::new(false));
            let fail_next = Arc::new(AtomicBool::new(false));
            (
                Box::new(Self {
                    progress: Arc::clone(&progress),
                    fail_next: Arc::clone(&fail_next),
                }),
                progress,
                fail_next,
            )
        }

        fn transitional(&self) -> TransitionResult {
            loop {
                if self.fail_next.swap(false, Ordering::Relaxed) {
                    return Err(SatelliteError::from("transitional failure"));
                }
                if self.progress.load(Ordering::Relaxed) {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    impl Satellite for GatedSatellite {
        fn supports_reconfigure(&self) -> bool {
            true
        }
        fn initializing(&mut self, _config: &Configuration) -> TransitionResult {
            self.transitional()
        }
        fn launching(&mut self) -> TransitionResult {
            self.transitional()
        }
        fn landing(&mut self) -> TransitionResult {
            self.transitional()
        }
        fn reconfiguring(&mut self, _partial: &Configuration) -> TransitionResult {
            self.transitional()
        }
        fn starting(&mut self, _run_identifier: &str) -> TransitionResult {
            self.transitional()
        }
        fn stopping(&mut self) -> TransitionResult {
            self.transitional()
        }
        fn running(&mut self, stop: &StopToken) -> TransitionResult {
            while !stop.stop_requested() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
        fn interrupting(&mut self, _previous: State) -> TransitionResult {
            self.transitional()
        }
    }

    /// Open the gate and wait for the transient to complete.
    fn progress(fsm: &Fsm, gate: &AtomicBool) {
        let old = fsm.state();
        gate.store(true, Ordering::Relaxed);
        wait_for_change(fsm, old);
        gate.store(false, Ordering::Relaxed);
    }

    fn wait_for_change(fsm: &Fsm, old: State) -> State {
        let deadline = Instant::now() + Duration::from_secs(5);
        while fsm.state() == old {
            assert!(Instant::now() < deadline, "state stuck in {}", old);
            thread::sleep(Duration::from_millis(2));
        }
        fsm.state()
    }

    fn wait_for_state(fsm: &Fsm, expected: State) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while fsm.state() != expected {
            assert!(
                Instant::now() < deadline,
                "state {} never reached, stuck in {}",
                expected,
                fsm.state()
            );
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_regular_operation() {
        let (satellite, gate, _) = GatedSatellite::create();
        let fsm = Fsm::new(satellite);

        fsm.react(Transition::Initialize).unwrap();
        assert_eq!(fsm.state(), State::Initializing);
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Init);

        fsm.react(Transition::Initialize).unwrap();
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Init);

        fsm.react(Transition::Launch).unwrap();
        assert_eq!(fsm.state(), State::Launching);
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Orbit);

        fsm.react(Transition::Reconfigure).unwrap();
        assert_eq!(fsm.state(), State::Reconfiguring);
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Orbit);

        fsm.react(Transition::Start).unwrap();
        assert_eq!(fsm.state(), State::Starting);
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Run);

        fsm.react(Transition::Stop).unwrap();
        assert_eq!(fsm.state(), State::Stopping);
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Orbit);

        fsm.react(Transition::Land).unwrap();
        assert_eq!(fsm.state(), State::Landing);
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Init);
    }

    #[test]
    fn test_failure_in_transitional_state() {
        let (satellite, gate, fail_next) = GatedSatellite::create();
        let fsm = Fsm::new(satellite);

        fsm.react(Transition::Initialize).unwrap();
        assert_eq!(fsm.state(), State::Initializing);
        fail_next.store(true, Ordering::Relaxed);
        wait_for_state(&fsm, State::Error);

        // Failure on failure is not allowed.
        assert!(!fsm.is_allowed(Transition::Failure));
        assert!(!fsm.react_if_allowed(Transition::Failure));

        // Reset from ERROR.
        fsm.react(Transition::Initialize).unwrap();
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Init);
    }

    #[test]
    fn test_interrupt_in_transitional_state() {
        let (satellite, gate, _) = GatedSatellite::create();
        let fsm = Fsm::new(satellite);

        fsm.react(Transition::Initialize).unwrap();
        progress(&fsm, &gate);
        fsm.react(Transition::Launch).unwrap();
        assert_eq!(fsm.state(), State::Launching);

        fsm.react(Transition::Interrupt).unwrap();
        assert_eq!(fsm.state(), State::Interrupting);
        progress(&fsm, &gate);
        wait_for_state(&fsm, State::Safe);
    }

    #[test]
    fn test_interrupt_from_run_stops_first() {
        let (satellite, gate, _) = GatedSatellite::create();
        let fsm = Fsm::new(satellite);

        fsm.react(Transition::Initialize).unwrap();
        progress(&fsm, &gate);
        fsm.react(Transition::Launch).unwrap();
        progress(&fsm, &gate);
        fsm.react(Transition::Start).unwrap();
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Run);

        fsm.react(Transition::Interrupt).unwrap();
        assert_eq!(fsm.state(), State::Interrupting);
        progress(&fsm, &gate);
        wait_for_state(&fsm, State::Safe);

        // SAFE recovers through initialize.
        fsm.react(Transition::Initialize).unwrap();
        progress(&fsm, &gate);
        assert_eq!(fsm.state(), State::Init);
    }

    #[test]
    fn test_disallowed_transitions() {
        let (satellite, gate, _) = GatedSatellite::create();
        let fsm = Fsm::new(satellite);

        let err = fsm.react(Transition::Launch).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Transition launch not allowed from NEW state"
        );
        assert!(fsm.react(Transition::Stop).is_err());
        assert!(fsm.react(Transition::Interrupt).is_err());

        fsm.react(Transition::Initialize).unwrap();
        // Commands received during a transient are invalid.
        let err = fsm.react(Transition::Initialize).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Transition initialize not allowed from initializing state"
        );
        progress(&fsm, &gate);

        // Completion transitions cannot be forced from steady states.
        assert!(fsm.react(Transition::Launched).is_err());
        assert!(fsm.react(Transition::Stopped).is_err());
    }

    #[test]
    fn test_react_cscp_payload_rules() {
        let (satellite, gate, _) = GatedSatellite::create();
        let fsm = Fsm::new(satellite);

        // Initialize requires a configuration dictionary.
        let (kind, message) = fsm.react_cscp(Transition::Initialize, &CscpPayload::None);
        assert_eq!(kind, CscpKind::Incomplete);
        assert_eq!(message, "Transition initialize requires a configuration payload");

        let (kind, message) = fsm.react_cscp(
            Transition::Initialize,
            &CscpPayload::Dictionary(Default::default()),
        );
        assert_eq!(kind, CscpKind::Success);
        assert_eq!(message, "Transition initialize is being initiated");
        progress(&fsm, &gate);

        // Not allowed from INIT.
        let (kind, message) = fsm.react_cscp(Transition::Start, &CscpPayload::None);
        assert_eq!(kind, CscpKind::Invalid);
        assert_eq!(message, "Transition start not allowed from INIT state");

        // Payload is ignored when the transition takes none.
        let (kind, message) = fsm.react_cscp(
            Transition::Launch,
            &CscpPayload::Str("ignored".to_string()),
        );
        assert_eq!(kind, CscpKind::Success);
        assert_eq!(
            message,
            "Transition launch is being initiated (payload frame is ignored)"
        );
        progress(&fsm, &gate);
    }

    #[test]
    fn test_react_cscp_reconfigure_unsupported() {
        struct Plain;
        impl Satellite for Plain {}
        let fsm = Fsm::new(Box::new(Plain));

        let (kind, message) = fsm.react_cscp(
            Transition::Reconfigure,
            &CscpPayload::Dictionary(Default::default()),
        );
        assert_eq!(kind, CscpKind::NotImplemented);
        assert_eq!(
            message,
            "Transition reconfigure is not implemented by this satellite"
        );
    }

    #[test]
    fn test_state_never_reports_transient_after_completion() {
        let (satellite, gate, _) = GatedSatellite::create();
        let fsm = Fsm::new(satellite);

        fsm.react(Transition::Initialize).unwrap();
        progress(&fsm, &gate);
        assert!(fsm.state().is_steady());
    }
}
