// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller: satellite connections, command distribution and liveness.
//!
//! Satellites discovered via their CONTROL service get a request channel
//! keyed by canonical name; their HEARTBEAT services feed the connection
//! records. A watchdog drops connections that run out of lives. Derived
//! controllers observe changes through [`ControllerListener`].

use crate::chirp::{CallbackId, ChirpManager, DiscoveredService};
use crate::config::{CHP_CLOCK_SKEW_WARN, CHP_LIVES, CHP_WATCHDOG_SLEEP, CSCP_TIMEOUT};
use crate::heartbeat::HeartbeatRecv;
use crate::protocol::chirp::{Md5Hash, ServiceIdentifier};
use crate::protocol::chp::ChpMessage;
use crate::protocol::cscp::{CscpKind, CscpMessage, CscpPayload, State};
use crate::transport::ReqChannel;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Kind of connection-list change reported to [`ControllerListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    /// Connection data has been updated.
    Updated,
    /// A connection has been added.
    Added,
    /// A connection has been removed.
    Removed,
}

/// Observer for connection-list changes and global state convergence.
///
/// `position` is the index of the affected row in the name-ordered
/// connection list. Callbacks run on the thread that observed the change.
pub trait ControllerListener: Send + Sync {
    fn propagate_update(&self, _update: UpdateType, _position: usize) {}

    /// Called when all connected satellites share a common steady state.
    fn reached_state(&self, _state: State) {}
}

/// Snapshot of one connection's bookkeeping, for user interfaces.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub uri: String,
    pub state: State,
    pub last_cmd_kind: Option<CscpKind>,
    pub last_cmd_verb: String,
    pub lives: u8,
}

/// Local record of one remote satellite.
struct Connection {
    req: ReqChannel,
    host_id: Md5Hash,
    uri: String,

    state: State,
    last_cmd_kind: Option<CscpKind>,
    last_cmd_verb: String,

    interval: Duration,
    last_heartbeat: Instant,
    last_checked: Instant,
    lives: u8,
}

struct Shared {
    name: String,
    connections: Mutex<BTreeMap<String, Connection>>,
    cv: Condvar,
    stop: AtomicBool,
    listener: Mutex<Option<Arc<dyn ControllerListener>>>,
    timeout: Duration,
}

/// Controller for a constellation of satellites.
pub struct Controller {
    shared: Arc<Shared>,
    chirp: Arc<ChirpManager>,
    heartbeat_recv: Arc<HeartbeatRecv>,
    chirp_callbacks: Vec<CallbackId>,
    watchdog: Option<JoinHandle<()>>,
}

impl Controller {
    /// Construct a controller: registers discovery callbacks for CONTROL and
    /// HEARTBEAT services, requests offers, and starts the watchdog.
    pub fn new(name: &str, chirp: Arc<ChirpManager>) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            connections: Mutex::new(BTreeMap::new()),
            cv: Condvar::new(),
            stop: AtomicBool::new(false),
            listener: Mutex::new(None),
            timeout: CSCP_TIMEOUT,
        });

        let heartbeat_shared = Arc::clone(&shared);
        let heartbeat_recv = Arc::new(HeartbeatRecv::new(Arc::new(move |msg| {
            process_heartbeat(&heartbeat_shared, msg);
        })));

        let control_shared = Arc::clone(&shared);
        let control_cb = chirp.register_discover_callback(
            ServiceIdentifier::Control,
            Arc::new(move |service, depart| {
                if depart {
                    control_departed(&control_shared, service);
                } else {
                    control_offered(&control_shared, service);
                }
            }),
        );

        let recv_clone = Arc::clone(&heartbeat_recv);
        let heartbeat_cb = chirp.register_discover_callback(
            ServiceIdentifier::Heartbeat,
            Arc::new(move |service, depart| {
                if depart {
                    recv_clone.unsubscribe(service.socket_addr());
                } else if let Err(e) = recv_clone.subscribe(service.socket_addr()) {
                    log::debug!(
                        "[controller] failed to subscribe to heartbeats at {}: {}",
                        service.socket_addr(),
                        e
                    );
                }
            }),
        );

        chirp.send_request(ServiceIdentifier::Control)?;
        chirp.send_request(ServiceIdentifier::Heartbeat)?;

        let watchdog_shared = Arc::clone(&shared);
        let watchdog = thread::Builder::new()
            .name("controller-watchdog".to_string())
            .spawn(move || watchdog_loop(&watchdog_shared))?;

        log::info!("[controller] {} started", name);
        Ok(Self {
            shared,
            chirp,
            heartbeat_recv,
            chirp_callbacks: vec![control_cb, heartbeat_cb],
            watchdog: Some(watchdog),
        })
    }

    /// Register the observer for connection updates and state convergence.
    pub fn set_listener(&self, listener: Arc<dyn ControllerListener>) {
        *self.shared.listener.lock() = Some(listener);
    }

    /// Send a prepared command message to a single satellite.
    ///
    /// Returns an ERROR reply if the satellite is not connected or the
    /// message is not a request; otherwise the satellite's reply.
    pub fn send_command_message(&self, satellite: &str, cmd: &CscpMessage) -> CscpMessage {
        if cmd.kind != CscpKind::Request {
            return self.error_reply("Can only send command messages of kind REQUEST");
        }
        let frames = cmd.assemble();
        self.send_frames(satellite, &cmd.verb, &frames)
    }

    /// Send a command built from verb and payload to a single satellite.
    pub fn send_command(
        &self,
        satellite: &str,
        verb: &str,
        payload: CscpPayload,
    ) -> CscpMessage {
        let cmd = CscpMessage::request(&self.shared.name, verb, payload);
        self.send_command_message(satellite, &cmd)
    }

    /// Send the same command to every connected satellite.
    ///
    /// The encoded frames are reused across all sends. Results map canonical
    /// names to replies; there is no ordering guarantee across satellites.
    pub fn send_commands(
        &self,
        verb: &str,
        payload: CscpPayload,
    ) -> BTreeMap<String, CscpMessage> {
        let cmd = CscpMessage::request(&self.shared.name, verb, payload);
        let frames = cmd.assemble();
        let names = self.get_connections();
        names
            .into_iter()
            .map(|name| {
                let reply = self.send_frames(&name, verb, &frames);
                (name, reply)
            })
            .collect()
    }

    /// Send one command verb with a per-satellite payload table. Satellites
    /// missing from the table receive no payload.
    pub fn send_commands_with(
        &self,
        verb: &str,
        payloads: &BTreeMap<String, CscpPayload>,
    ) -> BTreeMap<String, CscpMessage> {
        self.get_connections()
            .into_iter()
            .map(|name| {
                let payload = payloads.get(&name).cloned().unwrap_or(CscpPayload::None);
                let reply = self.send_command(&name, verb, payload);
                (name, reply)
            })
            .collect()
    }

    /// True if every connected satellite is in the given state. An empty
    /// connection set is never "in" a state.
    pub fn is_in_state(&self, state: State) -> bool {
        let connections = self.shared.connections.lock();
        !connections.is_empty() && connections.values().all(|c| c.state == state)
    }

    /// Lowest state across all connections per the state ordering; NEW when
    /// no satellite is connected.
    pub fn get_lowest_state(&self) -> State {
        let connections = self.shared.connections.lock();
        connections
            .values()
            .map(|c| c.state)
            .min()
            .unwrap_or(State::New)
    }

    /// Name-ordered snapshot of connected satellites.
    pub fn get_connections(&self) -> Vec<String> {
        self.shared.connections.lock().keys().cloned().collect()
    }

    /// Number of connected satellites.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Bookkeeping snapshot of one connection.
    pub fn get_connection_info(&self, satellite: &str) -> Option<ConnectionInfo> {
        self.shared
            .connections
            .lock()
            .get(satellite)
            .map(|conn| ConnectionInfo {
                uri: conn.uri.clone(),
                state: conn.state,
                last_cmd_kind: conn.last_cmd_kind,
                last_cmd_verb: conn.last_cmd_verb.clone(),
                lives: conn.lives,
            })
    }

    /// Last state observed for one satellite.
    pub fn get_state(&self, satellite: &str) -> Option<State> {
        self.shared
            .connections
            .lock()
            .get(satellite)
            .map(|c| c.state)
    }

    /// First non-empty run identifier reported by any connected satellite.
    pub fn get_run_identifier(&self) -> String {
        for name in self.get_connections() {
            let reply = self.send_command(&name, "get_run_id", CscpPayload::None);
            if reply.kind == CscpKind::Success {
                if let CscpPayload::Str(run_id) = reply.payload {
                    if !run_id.is_empty() {
                        return run_id;
                    }
                }
            }
        }
        String::new()
    }

    /// Latest run start time reported by any connected satellite.
    pub fn get_run_start_time(&self) -> Option<SystemTime> {
        let mut latest: Option<u64> = None;
        for name in self.get_connections() {
            let reply = self.send_command(&name, "get_run_start_time", CscpPayload::None);
            if reply.kind == CscpKind::Success {
                if let CscpPayload::Str(text) = reply.payload {
                    if let Ok(ms) = text.parse::<u64>() {
                        latest = Some(latest.map_or(ms, |current| current.max(ms)));
                    }
                }
            }
        }
        latest.map(|ms| UNIX_EPOCH + Duration::from_millis(ms))
    }

    fn error_reply(&self, message: &str) -> CscpMessage {
        CscpMessage::reply(
            &self.shared.name,
            CscpKind::Error,
            message,
            CscpPayload::None,
        )
    }

    /// Perform the request/reply roundtrip under the connection lock, so
    /// requests to the same satellite are strictly serialized.
    fn send_frames(&self, satellite: &str, verb: &str, frames: &[Vec<u8>]) -> CscpMessage {
        let mut connections = self.shared.connections.lock();
        let Some(conn) = connections.get_mut(satellite) else {
            return self.error_reply("Satellite is not connected");
        };

        match conn.req.request(frames) {
            Ok(reply_frames) => match CscpMessage::disassemble(&reply_frames) {
                Ok(reply) => {
                    conn.last_cmd_kind = Some(reply.kind);
                    conn.last_cmd_verb = verb.to_string();
                    reply
                }
                Err(e) => {
                    log::debug!(
                        "[controller] undecodable reply from {}: {}",
                        satellite,
                        e
                    );
                    drop(connections);
                    self.error_reply(&format!("Invalid reply: {}", e))
                }
            },
            Err(e) => {
                // A failed roundtrip leaves the channel out of lockstep;
                // close and drop the connection.
                log::warn!(
                    "[controller] request to {} failed: {}, dropping connection",
                    satellite,
                    e
                );
                conn.req.close();
                let position = connections
                    .keys()
                    .position(|name| name == satellite)
                    .unwrap_or(0);
                connections.remove(satellite);
                drop(connections);
                notify(&self.shared, |listener| {
                    listener.propagate_update(UpdateType::Removed, position);
                });
                let message = if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut
                {
                    "Timeout waiting for reply".to_string()
                } else {
                    format!("Transport failure: {}", e)
                };
                self.error_reply(&message)
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        for id in self.chirp_callbacks.drain(..) {
            self.chirp.unregister_discover_callback(id);
        }
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.cv.notify_all();
        if let Some(handle) = self.watchdog.take() {
            let _ = handle.join();
        }
        for addr in self.heartbeat_recv.subscribed() {
            self.heartbeat_recv.unsubscribe(addr);
        }
        let mut connections = self.shared.connections.lock();
        for (_, conn) in connections.iter() {
            conn.req.close();
        }
        connections.clear();
    }
}

/// Run the listener callback outside any lock.
fn notify(shared: &Shared, f: impl FnOnce(&dyn ControllerListener)) {
    let listener = shared.listener.lock().clone();
    if let Some(listener) = listener {
        f(listener.as_ref());
    }
}

/// CONTROL OFFER: connect, query the canonical name, register the
/// connection.
fn control_offered(shared: &Arc<Shared>, service: &DiscoveredService) {
    let addr = service.socket_addr();
    let mut req = match ReqChannel::connect(addr, shared.timeout) {
        Ok(req) => req,
        Err(e) => {
            log::warn!("[controller] cannot connect to satellite at {}: {}", addr, e);
            return;
        }
    };

    let get_name = CscpMessage::request(&shared.name, "get_name", CscpPayload::None);
    let name = match req.request(&get_name.assemble()) {
        Ok(frames) => match CscpMessage::disassemble(&frames) {
            Ok(reply) if reply.kind == CscpKind::Success => reply.verb,
            Ok(reply) => {
                log::warn!(
                    "[controller] satellite at {} refused get_name: {}",
                    addr,
                    reply.verb
                );
                return;
            }
            Err(e) => {
                log::warn!("[controller] invalid get_name reply from {}: {}", addr, e);
                return;
            }
        },
        Err(e) => {
            log::warn!("[controller] get_name roundtrip to {} failed: {}", addr, e);
            return;
        }
    };

    let now = Instant::now();
    let uri = req.uri().to_string();
    let position = {
        let mut connections = shared.connections.lock();
        connections.insert(
            name.clone(),
            Connection {
                req,
                host_id: service.host_id,
                uri: uri.clone(),
                state: State::New,
                last_cmd_kind: None,
                last_cmd_verb: String::new(),
                interval: Duration::from_millis(1000),
                last_heartbeat: now,
                last_checked: now,
                lives: CHP_LIVES,
            },
        );
        connections
            .keys()
            .position(|key| key == &name)
            .unwrap_or(0)
    };
    shared.cv.notify_all();

    log::info!("[controller] connected to {} at {}", name, uri);
    notify(shared, |listener| {
        listener.propagate_update(UpdateType::Added, position);
    });
}

/// CONTROL DEPART: close and remove the connection of that host.
fn control_departed(shared: &Arc<Shared>, service: &DiscoveredService) {
    let removed = {
        let mut connections = shared.connections.lock();
        let found = connections
            .iter()
            .position(|(_, conn)| conn.host_id == service.host_id);
        match found {
            Some(position) => {
                let name = connections
                    .keys()
                    .nth(position)
                    .cloned()
                    .unwrap_or_default();
                if let Some(conn) = connections.remove(&name) {
                    conn.req.close();
                }
                Some((name, position))
            }
            None => None,
        }
    };

    if let Some((name, position)) = removed {
        log::info!("[controller] {} departed", name);
        notify(shared, |listener| {
            listener.propagate_update(UpdateType::Removed, position);
        });
    }
}

/// Update the connection record from a received heartbeat.
fn process_heartbeat(shared: &Arc<Shared>, msg: ChpMessage) {
    let wall_now = crate::protocol::unix_time_ms();
    let deviation = wall_now.abs_diff(msg.time_ms);
    if deviation > CHP_CLOCK_SKEW_WARN.as_millis() as u64 {
        log::warn!(
            "[controller] detected time deviation of {} ms to {}",
            deviation,
            msg.sender
        );
    }

    let now = Instant::now();
    let update = {
        let mut connections = shared.connections.lock();
        let position = connections
            .keys()
            .position(|name| name == &msg.sender)
            .unwrap_or(0);
        match connections.get_mut(&msg.sender) {
            None => None,
            Some(conn) => {
                conn.interval = Duration::from_millis(u64::from(msg.interval_ms));
                conn.last_heartbeat = now;
                if msg.state != State::Error && msg.state != State::Safe {
                    conn.lives = CHP_LIVES;
                }
                if conn.state != msg.state {
                    conn.state = msg.state;
                    let converged = connections.values().all(|c| c.state == msg.state);
                    Some((position, converged))
                } else {
                    None
                }
            }
        }
    };
    shared.cv.notify_all();

    if let Some((position, converged)) = update {
        notify(shared, |listener| {
            listener.propagate_update(UpdateType::Updated, position);
        });
        if converged {
            log::debug!("[controller] constellation reached state {}", msg.state);
            notify(shared, |listener| {
                listener.reached_state(msg.state);
            });
        }
    }
}

/// Late-heartbeat bookkeeping; connections out of lives are dropped.
fn watchdog_loop(shared: &Arc<Shared>) {
    let mut wakeup = Instant::now() + CHP_WATCHDOG_SLEEP;
    loop {
        if shared.stop.load(Ordering::Relaxed) {
            break;
        }

        let removals = {
            let mut connections = shared.connections.lock();
            shared.cv.wait_until(&mut connections, wakeup);
            if shared.stop.load(Ordering::Relaxed) {
                break;
            }

            let now = Instant::now();
            wakeup = now + CHP_WATCHDOG_SLEEP;
            let mut dead = Vec::new();

            for (position, (name, conn)) in connections.iter_mut().enumerate() {
                // A satellite reporting ERROR or SAFE is a fatal interrupt
                // for its connection: zero the lives once and drop it below.
                if conn.lives > 0
                    && (conn.state == State::Error || conn.state == State::Safe)
                {
                    conn.lives = 0;
                    log::warn!(
                        "[controller] {} reports state {}, dropping connection",
                        name,
                        conn.state
                    );
                    dead.push((name.clone(), position));
                }

                if conn.lives > 0
                    && now.duration_since(conn.last_heartbeat) > conn.interval
                    && now.duration_since(conn.last_checked) > conn.interval
                {
                    conn.lives -= 1;
                    conn.last_checked = now;
                    log::trace!(
                        "[controller] missed heartbeat from {}, reduced lives to {}",
                        name,
                        conn.lives
                    );
                    if conn.lives == 0 {
                        log::warn!(
                            "[controller] no signs of life from {}, dropping connection",
                            name
                        );
                        dead.push((name.clone(), position));
                    }
                }

                if conn.lives > 0 {
                    let deadline = conn.last_heartbeat.max(conn.last_checked) + conn.interval;
                    if deadline > now {
                        wakeup = wakeup.min(deadline);
                    }
                }
            }

            for (name, _) in &dead {
                if let Some(conn) = connections.remove(name) {
                    conn.req.close();
                }
            }
            dead
        };

        for (_, position) in removals {
            notify(shared, |listener| {
                listener.propagate_update(UpdateType::Removed, position);
            });
        }
    }
}
