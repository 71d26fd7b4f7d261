// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Router-side IGMP/MLD group membership engine.
//!
//! [`protocols::router::Instance`] tracks what receivers on each interface
//! want, runs the querier side of the protocol and turns membership into
//! forwarding state that registered clients consume as notifications.
//! [`supervisor`] drives an instance from a command stream, in real or
//! virtual time.

pub mod config;
pub mod logging;
pub mod protocols;
pub mod supervisor;
