//! Relay hub: session registry, pairing, command/state routing and LAN
//! discovery responder.

pub mod core;
pub mod discovery;
pub mod http;
pub mod identity;
pub mod outbox;
pub mod position;
pub mod registry;
pub mod socket;
