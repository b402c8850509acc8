//! Desktop link manager for the Parachord browser extension.
//!
//! Keeps one WebSocket open to the Parachord desktop app, queues what the
//! browser produces while it is down, and plays the extension's background
//! role for the browser through a local bridge socket.

pub mod badge;
pub mod bridge;
pub mod core;
pub mod host;
pub mod http;
pub mod intercept;
pub mod keepalive;
pub mod queue;
pub mod reconnect;
pub mod router;
pub mod tabs;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod timer;
pub mod transport;
