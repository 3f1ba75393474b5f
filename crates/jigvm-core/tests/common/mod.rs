#![allow(dead_code, unused_imports)]
//! Shared test utilities for jigvm-core integration tests.
//!
//! # Modules
//!
//! - `fixtures`: loading the wasm/ABI fixture packages
//! - `setup`: a VM with the fixture packages deployed, keys and tx builders

pub mod fixtures;
pub mod setup;

pub use fixtures::{package_sources, read_fixture};
pub use setup::{address_of, arg, keypair, sign_to, signed, world, world_with, World};
