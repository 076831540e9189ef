// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHP heartbeat receiver.
//!
//! Maintains one subscription per discovered heartbeat publisher. Each
//! subscription runs a blocking receive thread that decodes CHP messages and
//! hands them to the registered callback. Undecodable messages are dropped
//! and logged; a transport failure ends the subscription.

use crate::protocol::chp::ChpMessage;
use crate::transport::frame::read_frames;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Invoked for every received heartbeat, on the subscription's thread.
pub type HeartbeatCallback = Arc<dyn Fn(ChpMessage) + Send + Sync>;

struct Subscription {
    stream: TcpStream,
    thread: Option<JoinHandle<()>>,
}

/// Heartbeat subscription pool.
pub struct HeartbeatRecv {
    callback: HeartbeatCallback,
    subscriptions: Mutex<HashMap<SocketAddr, Subscription>>,
}

impl HeartbeatRecv {
    pub fn new(callback: HeartbeatCallback) -> Self {
        Self {
            callback,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a heartbeat publisher. A second subscription to the same
    /// address is a no-op.
    pub fn subscribe(&self, addr: SocketAddr) -> io::Result<()> {
        let mut subs = self.subscriptions.lock();
        if subs.contains_key(&addr) {
            return Ok(());
        }

        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(3))?;
        let reader = stream.try_clone()?;
        let callback = Arc::clone(&self.callback);
        let thread = thread::Builder::new()
            .name("chp-recv".to_string())
            .spawn(move || {
                recv_loop(reader, addr, &callback);
            })?;

        log::debug!("[chp] subscribed to heartbeats from {}", addr);
        subs.insert(
            addr,
            Subscription {
                stream,
                thread: Some(thread),
            },
        );
        Ok(())
    }

    /// Drop the subscription to a departed publisher.
    pub fn unsubscribe(&self, addr: SocketAddr) {
        let removed = self.subscriptions.lock().remove(&addr);
        if let Some(mut sub) = removed {
            let _ = sub.stream.shutdown(Shutdown::Both);
            if let Some(handle) = sub.thread.take() {
                let _ = handle.join();
            }
            log::debug!("[chp] unsubscribed from {}", addr);
        }
    }

    /// Addresses currently subscribed to.
    pub fn subscribed(&self) -> Vec<SocketAddr> {
        self.subscriptions.lock().keys().copied().collect()
    }
}

impl Drop for HeartbeatRecv {
    fn drop(&mut self) {
        let mut subs = self.subscriptions.lock();
        for (_, sub) in subs.iter_mut() {
            let _ = sub.stream.shutdown(Shutdown::Both);
        }
        for (_, mut sub) in subs.drain() {
            if let Some(handle) = sub.thread.take() {
                let _ = handle.join();
            }
        }
    }
}

fn recv_loop(mut stream: TcpStream, addr: SocketAddr, callback: &HeartbeatCallback) {
    loop {
        let frames = match read_frames(&mut stream) {
            Ok(frames) => frames,
            Err(e) => {
                log::debug!("[chp] subscription to {} ended: {}", addr, e);
                break;
            }
        };
        match ChpMessage::disassemble(&frames) {
            Ok(msg) => callback(msg),
            Err(e) => {
                log::debug!("[chp] dropping undecodable heartbeat from {}: {}", addr, e);
            }
        }
    }
}
