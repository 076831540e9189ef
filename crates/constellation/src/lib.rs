// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Constellation control plane
//!
//! Coordination core of the Constellation distributed data-acquisition
//! framework: a *constellation* is a named group of *satellites*
//! (independent processes running experiment hardware or data sinks)
//! orchestrated by one or more *controllers*.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                            Controller                              |
//! |  Connections | Command fan-out | Aggregate queries | Watchdog      |
//! +--------------------------------------------------------------------+
//! |   CSCP (TCP req/rep)      |      CHP (TCP pub/sub)                 |
//! |   command/response        |      heartbeats + liveness             |
//! +--------------------------------------------------------------------+
//! |                      CHIRP (UDP broadcast)                         |
//! |            zero-configuration service discovery                    |
//! +--------------------------------------------------------------------+
//! |                            Satellite                               |
//! |  FSM (NEW/INIT/ORBIT/RUN/SAFE/ERROR) | Command registry | Hooks    |
//! +--------------------------------------------------------------------+
//! ```
//!
//! CHIRP discovers a satellite, the controller opens a CSCP request channel
//! and subscribes to its CHP publisher, heartbeats feed state updates, and
//! CSCP commands drive the satellite FSM whose transitions are observed back
//! through heartbeat extrasystoles.
//!
//! ## Key types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChirpManager`] | UDP broadcast discovery of peer services |
//! | [`SatelliteServer`] | A running satellite: FSM, heartbeat, control endpoint |
//! | [`Satellite`] | User hooks for the satellite lifecycle |
//! | [`Controller`] | Connection pool, command fan-out and aggregate queries |
//! | [`ControllerConfiguration`] | TOML to per-satellite configuration dictionaries |
//!
//! ## Concurrency model
//!
//! No async runtime: components own OS threads communicating through
//! mutex-guarded state and condition variables, with cooperative stop
//! tokens. Every long-lived thread is requested to stop and joined on drop.

/// Protocol constants and the satellite-facing configuration view.
pub mod config;
/// Wire formats: CHIRP beacons, CSCP commands, CHP heartbeats.
pub mod protocol;
/// Socket plumbing: UDP broadcast, TCP framing, req/rep, pub/sub.
pub mod transport;

/// CHIRP peer discovery manager.
pub mod chirp;
/// CHP heartbeat sender, receiver and liveness manager.
pub mod heartbeat;
/// Satellite FSM, command registry and control endpoint.
pub mod satellite;

/// Controller and its configuration parser.
pub mod controller;

pub use chirp::{ChirpManager, DiscoveredService};
pub use config::{Configuration, CHIRP_PORT, CHP_LIVES};
pub use controller::{Controller, ControllerConfiguration, ControllerListener, UpdateType};
pub use heartbeat::HeartbeatManager;
pub use protocol::{
    ChpMessage, CscpKind, CscpMessage, CscpPayload, Dictionary, List, Md5Hash, ServiceIdentifier,
    State, Value,
};
pub use satellite::{
    CommandRegistry, Fsm, Satellite, SatelliteError, SatelliteServer, StopToken, Transition,
};
