//! Line-oriented text control protocol.
//!
//! Frames an inbound byte stream into lines, dispatches each line to a
//! command interpreter and routes replies back onto the connection's
//! outbound buffer.
//!
//! - `framer`: line extraction under several end-of-line conventions
//! - `output`: reply channels appending newline-terminated text
//! - `session`: the read-line / dispatch / reply loop
//! - `server`: tokio transport driving sessions over TCP or stdio

pub mod buffer;
pub mod client;
pub mod commands;
pub mod config;
pub mod framer;
pub mod interpreter;
pub mod output;
pub mod server;
pub mod session;
pub mod store;
