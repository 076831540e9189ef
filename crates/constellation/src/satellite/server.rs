// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Satellite control endpoint.
//!
//! Binds the CSCP reply socket, registers the CONTROL and HEARTBEAT services
//! via CHIRP, and dispatches incoming commands: standard verbs first, then
//! the user command registry. Dispatch is serialized so per-connection
//! request ordering carries over to the FSM.

use crate::chirp::{CallbackId, ChirpManager};
use crate::config::{valid_name_part, CHP_DEFAULT_INTERVAL};
use crate::heartbeat::HeartbeatManager;
use crate::protocol::chirp::ServiceIdentifier;
use crate::protocol::cscp::{CscpKind, CscpMessage, CscpPayload, State};
use crate::protocol::value::{Dictionary, Value};
use crate::satellite::fsm::{Fsm, Transition};
use crate::satellite::registry::{CommandError, CommandRegistry};
use crate::satellite::satellite::Satellite;
use crate::transport::frame::{read_frames, write_frames};
use crate::transport::tcp_listener;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Errors raised while bringing up a satellite.
#[derive(Debug)]
pub enum ServerError {
    /// Satellite type or name does not match `[A-Za-z0-9_-]+`.
    InvalidName(String),
    /// Socket setup failed.
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::InvalidName(name) => {
                write!(f, "Invalid satellite name part {:?}", name)
            }
            ServerError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Io(e) => Some(e),
            ServerError::InvalidName(_) => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

struct ServerInner {
    canonical_name: String,
    fsm: Fsm,
    registry: CommandRegistry,
    heartbeat: Arc<HeartbeatManager>,
    config: Mutex<Dictionary>,
    run_id: Mutex<String>,
    run_start_ms: Arc<Mutex<Option<u64>>>,
    status: Arc<Mutex<String>>,
    shutdown: AtomicBool,
    // One command at a time reaches the FSM and registry.
    dispatch_lock: Mutex<()>,
}

/// A running satellite: FSM, heartbeating, discovery registration and the
/// CSCP control endpoint.
pub struct SatelliteServer {
    inner: Arc<ServerInner>,
    chirp: Arc<ChirpManager>,
    heartbeat_callback: CallbackId,
    control_port: u16,
    heartbeat_port: u16,
    accept_thread: Option<JoinHandle<()>>,
}

impl SatelliteServer {
    /// Bring up a satellite of the given type and name.
    ///
    /// Binds the control endpoint and the heartbeat publisher on ephemeral
    /// ports, registers both services with the discovery manager, and starts
    /// answering commands.
    pub fn spawn(
        type_name: &str,
        name: &str,
        satellite: Box<dyn Satellite>,
        registry: CommandRegistry,
        chirp: Arc<ChirpManager>,
    ) -> Result<Self, ServerError> {
        for part in [type_name, name] {
            if !valid_name_part(part) {
                return Err(ServerError::InvalidName(part.to_string()));
            }
        }
        let canonical_name = format!("{}.{}", type_name, name);

        let fsm = Fsm::new(satellite);
        let listener = tcp_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        let control_port = listener.local_addr()?.port();

        // Heartbeating: advertise our state, interrupt ourselves when a
        // fellow satellite fails or disappears.
        let state_fsm = fsm.clone();
        let interrupt_fsm = fsm.clone();
        let heartbeat = Arc::new(HeartbeatManager::new(
            &canonical_name,
            CHP_DEFAULT_INTERVAL,
            Arc::new(move || state_fsm.state()),
            Some(Arc::new(move |reason: &str| {
                log::warn!("[satellite] interrupting: {}", reason);
                interrupt_fsm.react_if_allowed(Transition::Interrupt);
            })),
        )?);
        let heartbeat_port = heartbeat.sender_port();

        let status = Arc::new(Mutex::new(format!("Satellite is in {} state", State::New)));
        let run_start_ms = Arc::new(Mutex::new(None));

        // Every steady-state entry updates the status line and publishes an
        // extrasystole so peers observe the change promptly.
        let status_listener = Arc::clone(&status);
        let run_start_listener = Arc::clone(&run_start_ms);
        let heartbeat_listener = Arc::clone(&heartbeat);
        fsm.set_state_listener(Arc::new(move |state| {
            *status_listener.lock() = format!("Satellite is in {} state", state);
            if state == State::Run {
                *run_start_listener.lock() = Some(crate::protocol::unix_time_ms());
            }
            heartbeat_listener.send_extrasystole();
        }));

        // Discovery: offer our services and subscribe to peer heartbeats.
        chirp.register_service(ServiceIdentifier::Control, control_port)?;
        chirp.register_service(ServiceIdentifier::Heartbeat, heartbeat_port)?;
        let heartbeat_chirp = Arc::clone(&heartbeat);
        let heartbeat_callback = chirp.register_discover_callback(
            ServiceIdentifier::Heartbeat,
            Arc::new(move |service, depart| {
                if depart {
                    heartbeat_chirp.unsubscribe(service.socket_addr());
                } else if let Err(e) = heartbeat_chirp.subscribe(service.socket_addr()) {
                    log::debug!(
                        "[satellite] failed to subscribe to heartbeats at {}: {}",
                        service.socket_addr(),
                        e
                    );
                }
            }),
        );
        chirp.send_request(ServiceIdentifier::Heartbeat)?;

        let inner = Arc::new(ServerInner {
            canonical_name: canonical_name.clone(),
            fsm,
            registry,
            heartbeat,
            config: Mutex::new(Dictionary::new()),
            run_id: Mutex::new(String::new()),
            run_start_ms,
            status,
            shutdown: AtomicBool::new(false),
            dispatch_lock: Mutex::new(()),
        });

        let accept_inner = Arc::clone(&inner);
        let accept_thread = thread::Builder::new()
            .name("cscp-accept".to_string())
            .spawn(move || accept_loop(&listener, &accept_inner))?;

        log::info!(
            "[satellite] {} up, control port {}, heartbeat port {}",
            canonical_name,
            control_port,
            heartbeat_port
        );
        Ok(Self {
            inner,
            chirp,
            heartbeat_callback,
            control_port,
            heartbeat_port,
            accept_thread: Some(accept_thread),
        })
    }

    /// Canonical `type.name` of this satellite.
    pub fn canonical_name(&self) -> &str {
        &self.inner.canonical_name
    }

    /// Port of the CSCP control endpoint.
    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    /// Current FSM state.
    pub fn state(&self) -> State {
        self.inner.fsm.state()
    }

    /// Handle to the FSM, e.g. for local transitions in tests and tools.
    pub fn fsm(&self) -> &Fsm {
        &self.inner.fsm
    }

    /// Change the advertised heartbeat interval of this satellite.
    pub fn update_heartbeat_interval(&self, interval: Duration) {
        self.inner.heartbeat.update_interval(interval);
    }

    /// True once a `shutdown` command was accepted or `stop()` was called.
    pub fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::Relaxed)
    }

    /// Block until shutdown is requested or the timeout elapses.
    pub fn wait_shutdown(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while !self.shutdown_requested() {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        true
    }

    /// Request shutdown of the control endpoint.
    pub fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for SatelliteServer {
    fn drop(&mut self) {
        self.stop();
        self.chirp.unregister_discover_callback(self.heartbeat_callback);
        let _ = self
            .chirp
            .unregister_service(ServiceIdentifier::Control, self.control_port);
        let _ = self
            .chirp
            .unregister_service(ServiceIdentifier::Heartbeat, self.heartbeat_port);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        self.inner.fsm.shutdown_workers();
    }
}

fn accept_loop(listener: &TcpListener, inner: &Arc<ServerInner>) {
    loop {
        if inner.shutdown.load(Ordering::Relaxed) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("[cscp] controller connected from {}", peer);
                let _ = stream.set_nonblocking(false);
                let _ = stream.set_nodelay(true);
                let client_inner = Arc::clone(inner);
                thread::spawn(move || handle_client(stream, &client_inner));
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                log::debug!("[cscp] accept failed: {}", e);
                break;
            }
        }
    }
}

fn handle_client(mut stream: TcpStream, inner: &Arc<ServerInner>) {
    loop {
        let frames = match read_frames(&mut stream) {
            Ok(frames) => frames,
            Err(_) => break,
        };

        let reply = match CscpMessage::disassemble(&frames) {
            Ok(request) => {
                let _serial = inner.dispatch_lock.lock();
                dispatch(inner, &request)
            }
            Err(e) => {
                log::debug!("[cscp] dropping malformed request: {}", e);
                CscpMessage::reply(
                    &inner.canonical_name,
                    CscpKind::Error,
                    &format!("Malformed message: {}", e),
                    CscpPayload::None,
                )
            }
        };

        if write_frames(&mut stream, &reply.assemble()).is_err() {
            break;
        }
    }
}

/// Dispatch one CSCP request: standard verbs, transitions, then the user
/// command registry.
fn dispatch(inner: &Arc<ServerInner>, request: &CscpMessage) -> CscpMessage {
    let name = &inner.canonical_name;
    if request.kind != CscpKind::Request {
        return CscpMessage::reply(name, CscpKind::Error, "Not a request", CscpPayload::None);
    }

    let verb = request.verb.to_ascii_lowercase();
    let state = inner.fsm.state();
    log::debug!("[cscp] {} received command {:?} in state {}", name, verb, state);

    match verb.as_str() {
        "get_name" => CscpMessage::reply(name, CscpKind::Success, name, CscpPayload::None),
        "get_version" => CscpMessage::reply(
            name,
            CscpKind::Success,
            env!("CARGO_PKG_VERSION"),
            CscpPayload::None,
        ),
        "get_commands" => {
            let mut commands = standard_command_descriptions();
            for (cmd, description) in inner.registry.describe_commands() {
                commands.insert(cmd, Value::Str(description));
            }
            CscpMessage::reply(
                name,
                CscpKind::Success,
                "Currently accepted commands",
                CscpPayload::Dictionary(commands),
            )
        }
        "get_state" => {
            CscpMessage::reply(name, CscpKind::Success, state.label(), CscpPayload::None)
        }
        "get_status" => CscpMessage::reply(
            name,
            CscpKind::Success,
            &inner.status.lock().clone(),
            CscpPayload::None,
        ),
        "get_config" => {
            if state >= State::Init {
                CscpMessage::reply(
                    name,
                    CscpKind::Success,
                    "Current configuration",
                    CscpPayload::Dictionary(inner.config.lock().clone()),
                )
            } else {
                CscpMessage::reply(
                    name,
                    CscpKind::Invalid,
                    &format!("Command get_config cannot be called in {} state", state),
                    CscpPayload::None,
                )
            }
        }
        "get_run_id" => {
            if state == State::Run {
                let run_id = inner.run_id.lock().clone();
                CscpMessage::reply(
                    name,
                    CscpKind::Success,
                    "Current run identifier",
                    CscpPayload::Str(run_id),
                )
            } else {
                CscpMessage::reply(
                    name,
                    CscpKind::Invalid,
                    &format!("Command get_run_id cannot be called in {} state", state),
                    CscpPayload::None,
                )
            }
        }
        "get_run_start_time" => match *inner.run_start_ms.lock() {
            Some(ms) => CscpMessage::reply(
                name,
                CscpKind::Success,
                "Run start time",
                CscpPayload::Str(ms.to_string()),
            ),
            None => CscpMessage::reply(
                name,
                CscpKind::Success,
                "No run started yet",
                CscpPayload::None,
            ),
        },
        "initialize" | "launch" | "land" | "reconfigure" | "start" | "stop" => {
            let transition = match verb.as_str() {
                "initialize" => Transition::Initialize,
                "launch" => Transition::Launch,
                "land" => Transition::Land,
                "reconfigure" => Transition::Reconfigure,
                "start" => Transition::Start,
                _ => Transition::Stop,
            };
            let (kind, message) = inner.fsm.react_cscp(transition, &request.payload);
            if kind == CscpKind::Success {
                record_accepted_transition(inner, transition, &request.payload);
            }
            CscpMessage::reply(name, kind, &message, CscpPayload::None)
        }
        "_interrupt" => {
            if inner.fsm.react_if_allowed(Transition::Interrupt) {
                CscpMessage::reply(
                    name,
                    CscpKind::Success,
                    "Transition interrupt is being initiated",
                    CscpPayload::None,
                )
            } else {
                CscpMessage::reply(
                    name,
                    CscpKind::Invalid,
                    &format!("Transition interrupt not allowed from {} state", state),
                    CscpPayload::None,
                )
            }
        }
        "shutdown" => {
            if matches!(state, State::New | State::Init | State::Safe | State::Error) {
                inner.shutdown.store(true, Ordering::Relaxed);
                CscpMessage::reply(name, CscpKind::Success, "Shutting down", CscpPayload::None)
            } else {
                CscpMessage::reply(
                    name,
                    CscpKind::Invalid,
                    &format!("Satellite cannot be shut down from {} state", state),
                    CscpPayload::None,
                )
            }
        }
        _ => dispatch_user_command(inner, state, &request.verb, &request.payload),
    }
}

/// Stash the side effects of an accepted transition command.
fn record_accepted_transition(
    inner: &Arc<ServerInner>,
    transition: Transition,
    payload: &CscpPayload,
) {
    match (transition, payload) {
        (Transition::Initialize, CscpPayload::Dictionary(dict)) => {
            *inner.config.lock() = dict.clone();
        }
        (Transition::Reconfigure, CscpPayload::Dictionary(partial)) => {
            let mut config = inner.config.lock();
            for (key, value) in partial {
                config.insert(key.clone(), value.clone());
            }
        }
        (Transition::Start, CscpPayload::Str(run_id)) => {
            *inner.run_id.lock() = run_id.clone();
        }
        _ => {}
    }
}

fn dispatch_user_command(
    inner: &Arc<ServerInner>,
    state: State,
    verb: &str,
    payload: &CscpPayload,
) -> CscpMessage {
    let name = &inner.canonical_name;
    let args: Vec<String> = match payload {
        CscpPayload::List(items) => items.iter().map(|v| v.to_string()).collect(),
        CscpPayload::Str(arg) => vec![arg.clone()],
        CscpPayload::None | CscpPayload::Dictionary(_) => Vec::new(),
    };

    match inner.registry.call(state, verb, &args) {
        Ok(result) => CscpMessage::reply(
            name,
            CscpKind::Success,
            &format!("Command {} executed", verb),
            CscpPayload::Str(result),
        ),
        Err(CommandError::Unknown(_)) => CscpMessage::reply(
            name,
            CscpKind::Unknown,
            &format!("Command {:?} is not known", verb),
            CscpPayload::None,
        ),
        Err(e @ CommandError::NotAllowed { .. }) => {
            CscpMessage::reply(name, CscpKind::Invalid, &e.to_string(), CscpPayload::None)
        }
        Err(e @ CommandError::MissingArguments { .. }) => {
            CscpMessage::reply(name, CscpKind::Incomplete, &e.to_string(), CscpPayload::None)
        }
        Err(e @ CommandError::InvalidArgument(_)) => {
            CscpMessage::reply(name, CscpKind::Invalid, &e.to_string(), CscpPayload::None)
        }
    }
}

/// Descriptions of the always-registered verbs.
fn standard_command_descriptions() -> Dictionary {
    let describe = |text: &str| Value::Str(text.to_string());
    let mut commands = Dictionary::new();
    commands.insert(
        "get_name".to_string(),
        describe("Get the canonical name of this satellite"),
    );
    commands.insert(
        "get_version".to_string(),
        describe("Get the framework version of this satellite"),
    );
    commands.insert(
        "get_commands".to_string(),
        describe("Get all commands currently accepted by this satellite"),
    );
    commands.insert(
        "get_state".to_string(),
        describe("Get the current state of this satellite"),
    );
    commands.insert(
        "get_status".to_string(),
        describe("Get the status of this satellite"),
    );
    commands.insert(
        "get_config".to_string(),
        describe("Get the current configuration of this satellite"),
    );
    commands.insert(
        "get_run_id".to_string(),
        describe("Get the identifier of the current run"),
    );
    commands.insert(
        "get_run_start_time".to_string(),
        describe("Get the starting time of the current run"),
    );
    commands.insert(
        "initialize".to_string(),
        describe("Initialize this satellite with a configuration"),
    );
    commands.insert("launch".to_string(), describe("Launch this satellite"));
    commands.insert("land".to_string(), describe("Land this satellite"));
    commands.insert(
        "reconfigure".to_string(),
        describe("Reconfigure this satellite with a partial configuration"),
    );
    commands.insert(
        "start".to_string(),
        describe("Start a run with the given identifier"),
    );
    commands.insert("stop".to_string(), describe("Stop the current run"));
    commands.insert(
        "shutdown".to_string(),
        describe("Shut down this satellite"),
    );
    commands
}
