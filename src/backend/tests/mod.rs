//! Unit tests for the backend module.
