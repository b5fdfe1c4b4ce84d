//! Unit tests for the execution context module.
