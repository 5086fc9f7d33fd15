//! # epd-cli: command-line front-end
//!
//! Encodes image files for an e-paper panel and drives a full link
//! session against the simulated peripheral: configuration, reconnection
//! policy and progress reporting live here, the protocol in `epd-core`.

pub mod config;
pub mod imaging;
pub mod reconnect;
