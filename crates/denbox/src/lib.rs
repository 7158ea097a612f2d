//! Denbox library
//!
//! Core components for running development containers whose inner user
//! matches the invoking host user. The `denbox` binary drives image builds
//! and container launches on the host; the `denbox-entrypoint` binary runs
//! as PID 1 inside the container, provisions the forwarded identity, and
//! hands control to the requested command.

pub mod config;
pub mod handoff;
pub mod identity;
pub mod provision;
pub mod runtime;
