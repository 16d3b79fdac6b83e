//! busd: a single-process SSM message bus.
//!
//! One TCP listener routes typed key/value frames between long-lived
//! clients — addressed delivery to one peer via `TO`, broadcast to all
//! eligible peers otherwise — plus an admin HTTP listener for status and
//! out-of-band injection, and a webhook divert for one reserved broadcast
//! destination.

pub mod admin;
pub mod config;
pub mod connection;
pub mod registry;
pub mod router;
pub mod server;
pub mod webhook;

pub use admin::AdminServer;
pub use config::Config;
pub use router::Bus;
pub use server::BusServer;
pub use webhook::WebhookSender;
