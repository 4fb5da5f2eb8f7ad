//! tests/mod.rs
mod support;

mod dispatcher_tests;
