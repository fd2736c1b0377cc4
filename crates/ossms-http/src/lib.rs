//! HTTP surface: platform webhooks plus the dashboard JSON API.

pub mod error;
pub mod handlers;
pub mod server;

#[cfg(test)]
mod testing;

pub use handlers::{configure_webhooks, WebhookSetup};
pub use server::{router, serve, HttpState};
