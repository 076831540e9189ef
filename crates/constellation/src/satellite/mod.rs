// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Satellite: finite state machine, command registry and control endpoint.

pub mod fsm;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod satellite;
pub mod server;

pub use fsm::{Fsm, InvalidTransition, StateChangeCallback, StopToken, Transition};
pub use registry::{parse_arg, CommandError, CommandRegistry, RegistryError};
pub use satellite::{Satellite, SatelliteError, TransitionResult};
pub use server::{SatelliteServer, ServerError};
