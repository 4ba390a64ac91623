//! Helpers for tests: database setup/teardown and in-memory doubles for the payment rails.

pub mod fakes;
pub mod prepare_env;
