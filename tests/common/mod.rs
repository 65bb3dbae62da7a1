//! Common test utilities and fixtures for dirapp integration tests
//!
//! This module provides:
//! - `TestDir` builder for creating watched directories
//! - `TestClient`, a raw protocol client that checks every byte
//! - `TestServer` for running a server on an ephemeral port

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod test_client;
pub mod test_dir;
pub mod test_server;

pub use test_client::TestClient;
pub use test_dir::TestDir;
pub use test_server::{eventually, TestServer};
