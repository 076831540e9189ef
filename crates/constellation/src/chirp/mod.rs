// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHIRP peer discovery.
//!
//! Zero-configuration service discovery over UDP broadcast: each process
//! offers its services (control, heartbeat, monitoring, data endpoints) and
//! learns of peers in the same group via OFFER/DEPART beacons.

mod manager;

pub use manager::{
    CallbackId, ChirpManager, DiscoverCallback, DiscoveredService, RegisteredService,
};
