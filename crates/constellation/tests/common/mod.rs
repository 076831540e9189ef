// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Test harness: a loopback "broadcast" segment for CHIRP.
//!
//! Real deployments broadcast beacons to 255.255.255.255; tests emulate the
//! shared segment with a reflector socket that forwards every datagram to
//! all registered peers. Each simulated process gets its own discovery
//! manager bound to an ephemeral loopback port.

use constellation::ChirpManager;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub struct Segment {
    socket: Arc<UdpSocket>,
    peers: Arc<Mutex<Vec<SocketAddr>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Segment {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let socket = UdpSocket::bind("127.0.0.1:0").expect("reflector bind");
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("reflector timeout");
        let socket = Arc::new(socket);
        let peers: Arc<Mutex<Vec<SocketAddr>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let socket_clone = Arc::clone(&socket);
        let peers_clone = Arc::clone(&peers);
        let stop_clone = Arc::clone(&stop);
        let thread = std::thread::spawn(move || {
            let mut buf = [0u8; 128];
            loop {
                if stop_clone.load(Ordering::Relaxed) {
                    break;
                }
                let (len, _src) = match socket_clone.recv_from(&mut buf) {
                    Ok(received) => received,
                    Err(_) => continue,
                };
                let peers = peers_clone.lock().expect("peer list lock");
                for peer in peers.iter() {
                    let _ = socket_clone.send_to(&buf[..len], peer);
                }
            }
        });

        Self {
            socket,
            peers,
            stop,
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("reflector addr")
    }

    /// Create a discovery manager attached to this segment.
    pub fn join(&self, group: &str, host: &str) -> Arc<ChirpManager> {
        let manager = ChirpManager::with_addresses(
            group,
            host,
            self.addr(),
            "127.0.0.1:0".parse().expect("static address"),
        )
        .expect("chirp manager");
        self.peers
            .lock()
            .expect("peer list lock")
            .push(manager.local_addr().expect("manager addr"));
        manager.start().expect("chirp start");
        Arc::new(manager)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
