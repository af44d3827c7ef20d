//! Webhook authentication

pub mod middleware;

pub use middleware::{require_webhook_secret, AuthError};
