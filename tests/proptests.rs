//! Property-based tests
//!
//! Makes the modules in `proptests/` discoverable by cargo.

#[path = "proptests/membership.rs"]
mod membership;
