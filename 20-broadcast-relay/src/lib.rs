//! TCP broadcast relay with interchangeable runtime cores.
//!
//! Bytes read from one connected peer are forwarded, prefixed with a
//! `Client <id>: ` tag, to every other connected peer. There is no framing:
//! a relayed message is whatever a single read returned.
//!
//! - [`registry`] holds the lock-guarded set of live peers.
//! - [`broadcast`] fans a message out to every peer but its sender.
//! - [`threaded`] runs one blocking OS thread per connection.
//! - [`event_loop`] runs one `mio` readiness loop for all connections.
//! - [`tasks`] runs one tokio task per connection.
//! - [`cli`] and [`config`] describe how a relay is started.
//!
//! Integration tests drive each core over loopback sockets.

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod event_loop;
pub mod message;
pub mod peer;
pub mod registry;
pub mod tasks;
pub mod threaded;
