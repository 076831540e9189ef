// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHP heartbeat sender.
//!
//! Publishes the current FSM state at a fixed interval and immediately on
//! demand (extrasystole) so peers observe state changes promptly. The
//! publisher binds an ephemeral port which the owner registers as the
//! HEARTBEAT service via CHIRP.

use crate::config::CHP_MAX_INTERVAL;
use crate::protocol::chp::ChpMessage;
use crate::protocol::cscp::State;
use crate::transport::PubSocket;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Returns the state to advertise in the next heartbeat.
pub type StateCallback = Arc<dyn Fn() -> State + Send + Sync>;

enum Wake {
    Extrasystole,
    Shutdown,
}

/// Heartbeat publisher thread handle.
pub struct HeartbeatSend {
    port: u16,
    interval_ms: Arc<AtomicU32>,
    wake_tx: Sender<Wake>,
    thread: Option<JoinHandle<()>>,
}

impl HeartbeatSend {
    /// Bind a publisher on `bind_addr` (port 0 for ephemeral) and start
    /// emitting heartbeats.
    pub fn new(
        sender_name: &str,
        state_callback: StateCallback,
        interval: Duration,
        bind_addr: SocketAddr,
    ) -> io::Result<Self> {
        let socket = PubSocket::bind(bind_addr)?;
        let port = socket.port();
        let interval_ms = Arc::new(AtomicU32::new(clamp_interval(interval)));
        let (wake_tx, wake_rx) = channel::unbounded();

        let name = sender_name.to_string();
        let interval_clone = Arc::clone(&interval_ms);
        let thread = thread::Builder::new()
            .name("chp-send".to_string())
            .spawn(move || loop {
                let interval = interval_clone.load(Ordering::Relaxed);
                let msg = ChpMessage::new(&name, state_callback(), interval);
                socket.publish(&msg.assemble());
                log::trace!(
                    "[chp] {} published state {}, next in {} ms",
                    name,
                    msg.state,
                    interval
                );

                match wake_rx.recv_timeout(Duration::from_millis(u64::from(interval))) {
                    Ok(Wake::Extrasystole) => {}
                    Ok(Wake::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            })?;

        log::debug!(
            "[chp] heartbeat sender for {} bound to port {}",
            sender_name,
            port
        );
        Ok(Self {
            port,
            interval_ms,
            wake_tx,
            thread: Some(thread),
        })
    }

    /// Ephemeral port the publisher is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Publish immediately, outside the regular cadence.
    pub fn send_extrasystole(&self) {
        let _ = self.wake_tx.send(Wake::Extrasystole);
    }

    /// Change the advertised interval (clamped to the protocol maximum).
    pub fn update_interval(&self, interval: Duration) {
        self.interval_ms
            .store(clamp_interval(interval), Ordering::Relaxed);
        let _ = self.wake_tx.send(Wake::Extrasystole);
    }
}

impl Drop for HeartbeatSend {
    fn drop(&mut self) {
        let _ = self.wake_tx.send(Wake::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn clamp_interval(interval: Duration) -> u32 {
    let ms = interval.as_millis().min(CHP_MAX_INTERVAL.as_millis());
    (ms as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::read_frames;
    use std::net::TcpStream;

    fn sender_with_state(state: State, interval: Duration) -> HeartbeatSend {
        HeartbeatSend::new(
            "cam.top",
            Arc::new(move || state),
            interval,
            "127.0.0.1:0".parse().unwrap(),
        )
        .unwrap()
    }

    fn connect(port: u16) -> TcpStream {
        TcpStream::connect(format!("127.0.0.1:{}", port)).unwrap()
    }

    #[test]
    fn test_periodic_heartbeats() {
        let sender = sender_with_state(State::Orbit, Duration::from_millis(100));
        let mut sub = connect(sender.port());

        // Two consecutive publications without any extrasystole.
        let first = ChpMessage::disassemble(&read_frames(&mut sub).unwrap()).unwrap();
        let second = ChpMessage::disassemble(&read_frames(&mut sub).unwrap()).unwrap();
        assert_eq!(first.sender, "cam.top");
        assert_eq!(first.state, State::Orbit);
        assert_eq!(second.state, State::Orbit);
        assert_eq!(first.interval_ms, 100);
    }

    #[test]
    fn test_extrasystole_is_immediate() {
        let sender = sender_with_state(State::Run, Duration::from_secs(5));
        let mut sub = connect(sender.port());

        // Give the accept loop a moment to register the subscription; the
        // regular cadence would otherwise only deliver after 5 s.
        thread::sleep(Duration::from_millis(100));

        let start = std::time::Instant::now();
        sender.send_extrasystole();
        let msg = ChpMessage::disassemble(&read_frames(&mut sub).unwrap()).unwrap();
        assert_eq!(msg.state, State::Run);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_interval_is_clamped_to_maximum() {
        let sender = sender_with_state(State::New, Duration::from_secs(60));
        let mut sub = connect(sender.port());
        thread::sleep(Duration::from_millis(100));
        sender.send_extrasystole();
        let msg = ChpMessage::disassemble(&read_frames(&mut sub).unwrap()).unwrap();
        assert_eq!(msg.interval_ms, CHP_MAX_INTERVAL.as_millis() as u32);
    }
}
