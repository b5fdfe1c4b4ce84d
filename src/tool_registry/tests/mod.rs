//! Unit tests for the tool registry module.

mod executor_tests;
mod registry_tests;
mod support;
