//! Shared test utilities for scoretally integration tests.
//!
//! This module provides:
//! - `ScriptedGateway` returning canned results per file name
//! - `BlockingGateway` holding every call until the test releases it
//! - `TestHarness` with a temp input directory of fake screenshots

#![allow(dead_code)]

pub mod gateways;
pub mod harness;

pub use gateways::{BlockingGateway, Script, ScriptedGateway};
pub use harness::{uploads, TestHarness};
