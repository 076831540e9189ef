// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish/subscribe fan-out over TCP.
//!
//! The publisher owns a listener on an ephemeral port; every subscriber that
//! connects receives each published multipart message. Dead subscribers are
//! detected on write failure and pruned. Subscribers run their own receive
//! loops (see the heartbeat receiver).

use super::frame::write_frames;
use super::req::tcp_listener;
use parking_lot::Mutex;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Publisher endpoint: fan-out of multipart messages to all subscribers.
pub struct PubSocket {
    port: u16,
    subscribers: Arc<Mutex<Vec<TcpStream>>>,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl PubSocket {
    /// Bind to an ephemeral port on `bind_addr` and start accepting
    /// subscribers.
    pub fn bind(bind_addr: SocketAddr) -> io::Result<Self> {
        let listener = tcp_listener(bind_addr)?;
        let port = listener.local_addr()?.port();

        let subscribers = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let subscribers_clone = Arc::clone(&subscribers);
        let shutdown_clone = Arc::clone(&shutdown);
        let accept_thread = thread::Builder::new()
            .name("pub-accept".to_string())
            .spawn(move || loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                match listener.accept() {
                    Ok((stream, peer)) => {
                        log::debug!("[pubsub] subscriber connected from {}", peer);
                        let _ = stream.set_nodelay(true);
                        subscribers_clone.lock().push(stream);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => {
                        log::debug!("[pubsub] accept failed: {}", e);
                        break;
                    }
                }
            })?;

        Ok(Self {
            port,
            subscribers,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    /// Ephemeral port the publisher is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Publish one multipart message to every subscriber.
    ///
    /// Subscribers whose connection fails are dropped; publishing to zero
    /// subscribers is a no-op.
    pub fn publish(&self, frames: &[Vec<u8>]) {
        let mut subs = self.subscribers.lock();
        subs.retain_mut(|stream| match write_frames(stream, frames) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("[pubsub] dropping subscriber: {}", e);
                false
            }
        });
    }
}

impl Drop for PubSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        for stream in self.subscribers.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
