//! Unit tests for the streaming module.
