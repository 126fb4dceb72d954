//! Wire types, configuration and platform paths shared by the hub and the
//! client.

pub mod config;
pub mod discovery;
pub mod error;
pub mod platform;
pub mod protocol;
