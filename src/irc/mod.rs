pub mod bridge;
pub mod channel;
pub mod codec;
pub mod command;
pub mod error;
mod handlers;
pub mod identity;
pub mod message;
pub mod metrics;
pub mod sanitize;
pub mod server;
pub mod session;
