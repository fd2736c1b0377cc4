//! Core domain + application logic for the SMS ↔ Telegram relay.
//!
//! This crate is framework-agnostic. Telegram, Twilio and the HTTP surface
//! live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod ports;
pub mod registration;
pub mod relay;
pub mod stats;
pub mod store;

pub use errors::{Error, Result};
