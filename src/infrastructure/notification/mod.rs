//! Credential lifecycle notifiers

mod composite;
mod log;
mod webhook;

pub use composite::CompositeNotifier;
pub use log::LogNotifier;
pub use webhook::{sign_payload, WebhookNotifier, EVENT_HEADER, SIGNATURE_HEADER};
