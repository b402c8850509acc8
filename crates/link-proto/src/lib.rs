//! Shared types for the Parachord browser link: desktop wire messages, the
//! browser bridge framing, configuration, durable settings and the
//! supported-site catalog.

pub mod bridge;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod settings;
pub mod sites;
