//! Step definitions for switchboard behaviour scenarios.

mod given;
mod then;
mod when;
pub mod world;
