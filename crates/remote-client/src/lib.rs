//! Client side of the couch remote: LAN discovery, the controller state
//! machine with its play-state mirror, and the target command executor.

pub mod connection;
pub mod controller;
pub mod devices;
pub mod discovery;
pub mod input;
pub mod mirror;
pub mod player;
pub mod runtime;
pub mod target;
pub mod timer;
