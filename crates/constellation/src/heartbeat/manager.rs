// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heartbeat manager: sender, receiver and liveness watchdog.
//!
//! Tracks one [`Remote`] per observed peer. A watchdog thread sleeps until
//! the earliest expected heartbeat (bounded by 3 s), decrements lives on
//! missed intervals and fires the interrupt callback when a peer runs out of
//! lives or reports ERROR/SAFE.
//!
//! The manager holds no reference to the FSM; it is wired with a read-only
//! state callback for the sender and a write-only interrupt callback.

use crate::config::{CHP_CLOCK_SKEW_WARN, CHP_LIVES, CHP_WATCHDOG_SLEEP};
use crate::heartbeat::recv::HeartbeatRecv;
use crate::heartbeat::send::{HeartbeatSend, StateCallback};
use crate::protocol::chp::ChpMessage;
use crate::protocol::cscp::State;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Invoked with a human-readable reason when a peer must be treated as lost.
pub type InterruptCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Liveness record for one observed peer.
///
/// Created on the first received heartbeat; never resurrected after lives
/// reach zero without a fresh discovery event.
#[derive(Debug, Clone)]
pub struct Remote {
    pub interval: Duration,
    pub last_heartbeat: Instant,
    pub last_state: State,
    last_checked: Instant,
    pub lives: u8,
}

struct Shared {
    remotes: Mutex<HashMap<String, Remote>>,
    cv: Condvar,
    stop: AtomicBool,
    interrupt: Option<InterruptCallback>,
}

/// Heartbeat manager owned by every satellite (and usable standalone).
pub struct HeartbeatManager {
    shared: Arc<Shared>,
    receiver: HeartbeatRecv,
    sender: HeartbeatSend,
    watchdog: Option<JoinHandle<()>>,
}

impl HeartbeatManager {
    /// Construct the manager: binds the sender's publisher, starts the
    /// watchdog, and prepares the subscription pool.
    pub fn new(
        sender_name: &str,
        interval: Duration,
        state_callback: StateCallback,
        interrupt_callback: Option<InterruptCallback>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            remotes: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
            stop: AtomicBool::new(false),
            interrupt: interrupt_callback,
        });

        let shared_recv = Arc::clone(&shared);
        let receiver = HeartbeatRecv::new(Arc::new(move |msg| {
            process_heartbeat(&shared_recv, msg);
        }));

        let sender = HeartbeatSend::new(
            sender_name,
            state_callback,
            interval,
            SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0)),
        )?;

        let shared_watchdog = Arc::clone(&shared);
        let watchdog = thread::Builder::new()
            .name("chp-watchdog".to_string())
            .spawn(move || watchdog_loop(&shared_watchdog))?;

        Ok(Self {
            shared,
            receiver,
            sender,
            watchdog: Some(watchdog),
        })
    }

    /// Port of the heartbeat publisher, for CHIRP registration.
    pub fn sender_port(&self) -> u16 {
        self.sender.port()
    }

    /// Publish the current state immediately.
    pub fn send_extrasystole(&self) {
        self.sender.send_extrasystole();
    }

    /// Change the advertised heartbeat interval.
    pub fn update_interval(&self, interval: Duration) {
        self.sender.update_interval(interval);
    }

    /// Subscribe to a discovered heartbeat publisher.
    pub fn subscribe(&self, addr: SocketAddr) -> io::Result<()> {
        self.receiver.subscribe(addr)
    }

    /// Drop the subscription to a departed publisher.
    pub fn unsubscribe(&self, addr: SocketAddr) {
        self.receiver.unsubscribe(addr);
    }

    /// Last state reported by a remote, if it is known.
    pub fn get_remote_state(&self, remote: &str) -> Option<State> {
        self.shared
            .remotes
            .lock()
            .get(remote)
            .map(|r| r.last_state)
    }

    /// Snapshot of one remote's liveness record.
    pub fn get_remote(&self, remote: &str) -> Option<Remote> {
        self.shared.remotes.lock().get(remote).cloned()
    }

    #[cfg(test)]
    pub(crate) fn process(&self, msg: ChpMessage) {
        process_heartbeat(&self.shared, msg);
    }
}

impl Drop for HeartbeatManager {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.cv.notify_all();
        if let Some(handle) = self.watchdog.take() {
            let _ = handle.join();
        }
        // Receiver and sender threads join in their own Drop impls.
    }
}

fn process_heartbeat(shared: &Shared, msg: ChpMessage) {
    log::trace!(
        "[chp] {} reports state {}, next message in {} ms",
        msg.sender,
        msg.state,
        msg.interval_ms
    );

    let wall_now = crate::protocol::unix_time_ms();
    let deviation = wall_now.abs_diff(msg.time_ms);
    if deviation > CHP_CLOCK_SKEW_WARN.as_millis() as u64 {
        log::warn!(
            "[chp] detected time deviation of {} ms to {}",
            deviation,
            msg.sender
        );
    }

    let now = Instant::now();
    {
        let mut remotes = shared.remotes.lock();
        let remote = remotes.entry(msg.sender.clone()).or_insert_with(|| Remote {
            interval: Duration::from_millis(u64::from(msg.interval_ms)),
            last_heartbeat: now,
            last_state: msg.state,
            last_checked: now,
            lives: CHP_LIVES,
        });
        remote.interval = Duration::from_millis(u64::from(msg.interval_ms));
        remote.last_heartbeat = now;
        remote.last_state = msg.state;

        // Replenish lives unless the peer reports ERROR or SAFE.
        if msg.state != State::Error && msg.state != State::Safe {
            remote.lives = CHP_LIVES;
        }
    }
    shared.cv.notify_all();
}

fn watchdog_loop(shared: &Shared) {
    let mut wakeup = Instant::now() + CHP_WATCHDOG_SLEEP;
    loop {
        if shared.stop.load(Ordering::Relaxed) {
            break;
        }

        let interrupts = {
            let mut remotes = shared.remotes.lock();
            shared.cv.wait_until(&mut remotes, wakeup);
            if shared.stop.load(Ordering::Relaxed) {
                break;
            }

            let now = Instant::now();
            wakeup = now + CHP_WATCHDOG_SLEEP;
            let mut interrupts = Vec::new();

            for (name, remote) in remotes.iter_mut() {
                // A peer reporting ERROR or SAFE is interrupted once; its
                // lives stay at zero until rediscovery.
                if remote.lives > 0
                    && (remote.last_state == State::Error || remote.last_state == State::Safe)
                {
                    remote.lives = 0;
                    log::debug!(
                        "[chp] detected state {} at {}, interrupting",
                        remote.last_state,
                        name
                    );
                    interrupts.push(format!("{} reports state {}", name, remote.last_state));
                }

                // Deduct at most one life per interval, tracked separately
                // from the heartbeat timestamp so interrupt latency stays
                // bounded by lives x interval.
                if remote.lives > 0
                    && now.duration_since(remote.last_heartbeat) > remote.interval
                    && now.duration_since(remote.last_checked) > remote.interval
                {
                    remote.lives -= 1;
                    remote.last_checked = now;
                    log::trace!(
                        "[chp] missed heartbeat from {}, reduced lives to {}",
                        name,
                        remote.lives
                    );
                    if remote.lives == 0 {
                        log::debug!("[chp] missed heartbeats from {}, no lives left", name);
                        interrupts
                            .push(format!("No signs of life detected anymore from {}", name));
                    }
                }

                // Sleep until the next deduction deadline of this remote:
                // one interval past the later of the last heartbeat and the
                // last check. This keeps interrupt latency bounded by
                // lives x interval even when a peer has gone silent.
                if remote.lives > 0 {
                    let deadline =
                        remote.last_heartbeat.max(remote.last_checked) + remote.interval;
                    if deadline > now {
                        wakeup = wakeup.min(deadline);
                    }
                }
            }
            interrupts
        };

        for reason in interrupts {
            if let Some(callback) = &shared.interrupt {
                callback(&reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn manager_with_interrupts() -> (HeartbeatManager, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let manager = HeartbeatManager::new(
            "ctrl.main",
            Duration::from_millis(100),
            Arc::new(|| State::New),
            Some(Arc::new(move |reason: &str| {
                let _ = tx.send(reason.to_string());
            })),
        )
        .unwrap();
        (manager, rx)
    }

    fn heartbeat(sender: &str, state: State, interval_ms: u32) -> ChpMessage {
        ChpMessage::new(sender, state, interval_ms)
    }

    #[test]
    fn test_heartbeat_replenishes_lives() {
        let (manager, _rx) = manager_with_interrupts();
        manager.process(heartbeat("cam.top", State::Orbit, 100));
        assert_eq!(manager.get_remote("cam.top").unwrap().lives, CHP_LIVES);
        assert_eq!(manager.get_remote_state("cam.top"), Some(State::Orbit));
    }

    #[test]
    fn test_missed_heartbeats_interrupt_once() {
        let (manager, rx) = manager_with_interrupts();
        manager.process(heartbeat("cam.top", State::Run, 100));

        let reason = rx.recv_timeout(Duration::from_secs(3)).unwrap();
        assert!(reason.contains("No signs of life"));
        assert!(reason.contains("cam.top"));
        assert_eq!(manager.get_remote("cam.top").unwrap().lives, 0);

        // No further interrupt without a fresh heartbeat.
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[test]
    fn test_error_state_interrupts_within_a_tick() {
        let (manager, rx) = manager_with_interrupts();
        manager.process(heartbeat("cam.top", State::Error, 1000));

        let reason = rx.recv_timeout(CHP_WATCHDOG_SLEEP + Duration::from_secs(1)).unwrap();
        assert!(reason.contains("cam.top"));
        assert!(reason.contains("ERROR"));
        assert_eq!(manager.get_remote("cam.top").unwrap().lives, 0);

        // Further ERROR heartbeats do not interrupt again.
        manager.process(heartbeat("cam.top", State::Error, 1000));
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[test]
    fn test_lives_do_not_replenish_in_safe_state() {
        let (manager, rx) = manager_with_interrupts();
        manager.process(heartbeat("cam.top", State::Safe, 100));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        manager.process(heartbeat("cam.top", State::Safe, 100));
        assert_eq!(manager.get_remote("cam.top").unwrap().lives, 0);
    }

    #[test]
    fn test_lives_decrement_monotonically() {
        let (manager, _rx) = manager_with_interrupts();
        manager.process(heartbeat("cam.top", State::Run, 50));

        let mut last = CHP_LIVES;
        for _ in 0..30 {
            thread::sleep(Duration::from_millis(25));
            let lives = manager.get_remote("cam.top").unwrap().lives;
            assert!(lives <= last);
            last = lives;
            if lives == 0 {
                break;
            }
        }
        assert_eq!(last, 0);
    }
}
