//! Common test utilities for the device link
//!
//! Scripted device clients, a recording platform and a hub fixture.

#![allow(dead_code)]

mod mock_client;
mod mock_platform;
mod test_hub;

pub use mock_client::*;
pub use mock_platform::*;
pub use test_hub::*;
