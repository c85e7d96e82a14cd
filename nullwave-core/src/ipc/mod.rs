//! Typed events broadcast to hosts (UI, CLI, tests).

pub mod events;
