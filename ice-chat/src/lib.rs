//! Real-time chat relay over WebSockets.
//!
//! Every chat message a client sends is fanned out to all connected clients,
//! and everyone is kept informed of who is online.
//!
//! - [`hub`] owns the registry of connected clients and serializes every
//!   registration, removal, and broadcast through one event loop.
//! - [`connection`] runs the read and write loops for one client.
//! - [`message`] defines the JSON envelope exchanged with browsers.
//! - [`transport`] is the framed channel the connection loops consume, with
//!   an in-memory implementation for tests.
//! - [`server`] serves the chat page and upgrades `/ws` requests.
//! - [`cli`] parses the command-line configuration.
//! - [`error`] collects the error types.

pub mod cli;
pub mod connection;
pub mod error;
pub mod hub;
pub mod message;
pub mod server;
pub mod transport;
