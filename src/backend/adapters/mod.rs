//! Adapter implementations for the backend port.

mod scripted;

pub use scripted::{ScriptStep, ScriptedBackend};
