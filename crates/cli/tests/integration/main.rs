//! End-to-end tests driving the `ldeploy` binary against a shell builder and
//! a directory target.

#![cfg(unix)]

mod apply_tests;
mod common;
mod plan_status_tests;
