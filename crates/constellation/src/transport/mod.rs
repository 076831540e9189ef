// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket plumbing for the control plane.
//!
//! UDP broadcast for discovery beacons, TCP for the request/reply command
//! channel and the heartbeat fan-out. All sockets are built through
//! `socket2` and converted to `std::net` types for use.

pub mod frame;
pub mod pubsub;
pub mod req;
pub mod udp;

pub use pubsub::PubSocket;
pub use req::{tcp_listener, ReqChannel};
pub use udp::broadcast_socket;
