// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHIRP discovery manager.
//!
//! Announces locally offered services via UDP broadcast beacons and keeps a
//! cache of services offered by peers in the same group. Interested
//! subsystems register callbacks that fire on OFFER and DEPART events.
//!
//! # Filtering
//! Beacons from other groups and from the local host are dropped silently;
//! undecodable datagrams are dropped and logged at debug level.

use crate::config::CHIRP_PORT;
use crate::protocol::chirp::{
    ChirpMessage, ChirpMessageType, Md5Hash, ServiceIdentifier,
};
use crate::transport::broadcast_socket;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A service offered by a remote peer, as learned from an OFFER beacon.
///
/// Owned by the discovery cache from OFFER until DEPART or cache reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub group_id: Md5Hash,
    pub host_id: Md5Hash,
    pub identifier: ServiceIdentifier,
    pub address: IpAddr,
    pub port: u16,
}

impl DiscoveredService {
    /// Socket address of the remote endpoint.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// A locally offered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegisteredService {
    pub identifier: ServiceIdentifier,
    pub port: u16,
}

/// Callback invoked on OFFER (`depart == false`) and DEPART (`depart == true`)
/// events for a subscribed service identifier.
pub type DiscoverCallback = Arc<dyn Fn(&DiscoveredService, bool) + Send + Sync>;

/// Handle returned on callback registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

struct Inner {
    registered: BTreeSet<RegisteredService>,
    discovered: HashMap<(Md5Hash, ServiceIdentifier), DiscoveredService>,
    callbacks: Vec<(CallbackId, ServiceIdentifier, DiscoverCallback)>,
    next_callback_id: u64,
}

/// Discovery manager for one constellation process.
///
/// Create it once per process and hand an `Arc` to every component that
/// offers or consumes services. `start()` spawns the receive thread; drop
/// broadcasts DEPART for every registered service and joins the thread.
pub struct ChirpManager {
    group_name: String,
    host_name: String,
    group_id: Md5Hash,
    host_id: Md5Hash,
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    inner: Arc<Mutex<Inner>>,
    shutdown: Arc<AtomicBool>,
    recv_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ChirpManager {
    /// Create a manager with the production addresses: bind `0.0.0.0` on the
    /// CHIRP port, broadcast to `255.255.255.255`.
    pub fn new(group: &str, host: &str) -> io::Result<Self> {
        Self::with_addresses(
            group,
            host,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), CHIRP_PORT),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), CHIRP_PORT),
        )
    }

    /// Create a manager with explicit broadcast and bind addresses.
    ///
    /// Tests run whole constellations over loopback by pointing two managers
    /// at each other's bind ports.
    pub fn with_addresses(
        group: &str,
        host: &str,
        brd_addr: SocketAddr,
        any_addr: SocketAddr,
    ) -> io::Result<Self> {
        let socket = broadcast_socket(any_addr)?;
        log::debug!(
            "[chirp] manager for {:?} in group {:?} bound to {}",
            host,
            group,
            socket.local_addr()?
        );
        Ok(Self {
            group_name: group.to_string(),
            host_name: host.to_string(),
            group_id: Md5Hash::from_name(group),
            host_id: Md5Hash::from_name(host),
            socket: Arc::new(socket),
            target: brd_addr,
            inner: Arc::new(Mutex::new(Inner {
                registered: BTreeSet::new(),
                discovered: HashMap::new(),
                callbacks: Vec::new(),
                next_callback_id: 0,
            })),
            shutdown: Arc::new(AtomicBool::new(false)),
            recv_thread: Mutex::new(None),
        })
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn host_id(&self) -> Md5Hash {
        self.host_id
    }

    /// Address the beacon socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Begin receiving beacons. Safe to call once; later calls are no-ops.
    pub fn start(&self) -> io::Result<()> {
        let mut guard = self.recv_thread.lock();
        if guard.is_some() {
            return Ok(());
        }

        let socket = Arc::clone(&self.socket);
        let inner = Arc::clone(&self.inner);
        let shutdown = Arc::clone(&self.shutdown);
        let group_id = self.group_id;
        let host_id = self.host_id;
        let target = self.target;

        let handle = thread::Builder::new()
            .name("chirp-recv".to_string())
            .spawn(move || {
                recv_loop(&socket, &inner, &shutdown, group_id, host_id, target);
            })?;
        *guard = Some(handle);
        Ok(())
    }

    /// Record a locally offered service and broadcast an OFFER for it.
    ///
    /// Idempotent per `(service, port)`: repeating the call leaves the
    /// registered set unchanged and returns `false`.
    pub fn register_service(&self, identifier: ServiceIdentifier, port: u16) -> io::Result<bool> {
        let service = RegisteredService { identifier, port };
        let inserted = self.inner.lock().registered.insert(service);
        if inserted {
            log::debug!("[chirp] registered {} on port {}", identifier, port);
            self.send(ChirpMessageType::Offer, identifier, port)?;
        }
        Ok(inserted)
    }

    /// Broadcast a DEPART for the service and remove it from the registry.
    pub fn unregister_service(&self, identifier: ServiceIdentifier, port: u16) -> io::Result<bool> {
        let service = RegisteredService { identifier, port };
        let removed = self.inner.lock().registered.remove(&service);
        if removed {
            log::debug!("[chirp] unregistered {} on port {}", identifier, port);
            self.send(ChirpMessageType::Depart, identifier, port)?;
        }
        Ok(removed)
    }

    /// Depart and remove every registered service.
    pub fn unregister_services(&self) {
        let services: Vec<RegisteredService> = {
            let mut inner = self.inner.lock();
            let services = inner.registered.iter().copied().collect();
            inner.registered.clear();
            services
        };
        for service in services {
            if let Err(e) = self.send(ChirpMessageType::Depart, service.identifier, service.port) {
                log::debug!("[chirp] failed to depart {}: {}", service.identifier, e);
            }
        }
    }

    /// Register a callback for OFFER/DEPART events of one service type.
    ///
    /// Callbacks fire in registration order, on the receive thread.
    pub fn register_discover_callback(
        &self,
        identifier: ServiceIdentifier,
        callback: DiscoverCallback,
    ) -> CallbackId {
        let mut inner = self.inner.lock();
        let id = CallbackId(inner.next_callback_id);
        inner.next_callback_id += 1;
        inner.callbacks.push((id, identifier, callback));
        id
    }

    /// Remove a previously registered discover callback.
    pub fn unregister_discover_callback(&self, id: CallbackId) {
        self.inner.lock().callbacks.retain(|(cb_id, _, _)| *cb_id != id);
    }

    /// Broadcast a REQUEST asking peers to re-offer a service type.
    pub fn send_request(&self, identifier: ServiceIdentifier) -> io::Result<()> {
        log::debug!("[chirp] requesting offers for {}", identifier);
        self.send(ChirpMessageType::Request, identifier, 0)
    }

    /// Snapshot of locally registered services.
    pub fn get_registered_services(&self) -> Vec<RegisteredService> {
        self.inner.lock().registered.iter().copied().collect()
    }

    /// Snapshot of all discovered services.
    pub fn get_discovered_services(&self) -> Vec<DiscoveredService> {
        self.inner.lock().discovered.values().cloned().collect()
    }

    /// Snapshot of discovered services of one type.
    pub fn get_discovered_services_of(
        &self,
        identifier: ServiceIdentifier,
    ) -> Vec<DiscoveredService> {
        self.inner
            .lock()
            .discovered
            .values()
            .filter(|s| s.identifier == identifier)
            .cloned()
            .collect()
    }

    /// Clear the discovered-services cache without firing callbacks.
    pub fn forget_discovered_services(&self) {
        self.inner.lock().discovered.clear();
    }

    fn send(&self, msg_type: ChirpMessageType, identifier: ServiceIdentifier, port: u16) -> io::Result<()> {
        let msg = ChirpMessage::new(msg_type, self.group_id, self.host_id, identifier, port);
        self.socket.send_to(&msg.encode(), self.target)?;
        Ok(())
    }
}

impl Drop for ChirpManager {
    fn drop(&mut self) {
        self.unregister_services();
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.recv_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn recv_loop(
    socket: &UdpSocket,
    inner: &Mutex<Inner>,
    shutdown: &AtomicBool,
    group_id: Md5Hash,
    host_id: Md5Hash,
    target: SocketAddr,
) {
    let mut buf = [0u8; 64];
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::debug!("[chirp] receive failed: {}", e);
                break;
            }
        };

        let msg = match ChirpMessage::decode(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("[chirp] dropping undecodable beacon from {}: {}", src, e);
                continue;
            }
        };

        // Beacons from foreign groups and from ourselves are not for us.
        if msg.group_id != group_id || msg.host_id == host_id {
            continue;
        }

        match msg.msg_type {
            ChirpMessageType::Request => {
                let offers: Vec<RegisteredService> = inner
                    .lock()
                    .registered
                    .iter()
                    .filter(|s| s.identifier == msg.service_id)
                    .copied()
                    .collect();
                for service in offers {
                    let offer = ChirpMessage::new(
                        ChirpMessageType::Offer,
                        group_id,
                        host_id,
                        service.identifier,
                        service.port,
                    );
                    if let Err(e) = socket.send_to(&offer.encode(), target) {
                        log::debug!("[chirp] failed to answer request: {}", e);
                    }
                }
            }
            ChirpMessageType::Offer => {
                let service = DiscoveredService {
                    group_id: msg.group_id,
                    host_id: msg.host_id,
                    identifier: msg.service_id,
                    address: src.ip(),
                    port: msg.port,
                };
                let key = (msg.host_id, msg.service_id);
                let mut events = Vec::new();
                {
                    let mut guard = inner.lock();
                    match guard.discovered.get(&key) {
                        Some(existing) if *existing == service => {}
                        Some(existing) => {
                            // Endpoint moved: treat as DEPART of the old
                            // endpoint followed by OFFER of the new one.
                            events.push((existing.clone(), true));
                            events.push((service.clone(), false));
                            guard.discovered.insert(key, service);
                        }
                        None => {
                            log::debug!(
                                "[chirp] discovered {} at {}:{} ({})",
                                service.identifier,
                                service.address,
                                service.port,
                                service.host_id
                            );
                            events.push((service.clone(), false));
                            guard.discovered.insert(key, service);
                        }
                    }
                }
                dispatch(inner, &events);
            }
            ChirpMessageType::Depart => {
                let key = (msg.host_id, msg.service_id);
                let removed = inner.lock().discovered.remove(&key);
                if let Some(service) = removed {
                    log::debug!(
                        "[chirp] {} at {}:{} departed",
                        service.identifier,
                        service.address,
                        service.port
                    );
                    dispatch(inner, &[(service, true)]);
                }
            }
        }
    }
}

/// Invoke matching callbacks outside the cache lock, in registration order.
fn dispatch(inner: &Mutex<Inner>, events: &[(DiscoveredService, bool)]) {
    if events.is_empty() {
        return;
    }
    let callbacks: Vec<(ServiceIdentifier, DiscoverCallback)> = inner
        .lock()
        .callbacks
        .iter()
        .map(|(_, id, cb)| (*id, Arc::clone(cb)))
        .collect();
    for (service, depart) in events {
        for (identifier, callback) in &callbacks {
            if *identifier == service.identifier {
                callback(service, *depart);
            }
        }
    }
}
