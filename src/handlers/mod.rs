//! HTTP request handlers
//!
//! - `api` - Health check endpoint
//! - `lead_webhook` - Lead-source event ingestion
//! - `telephony_webhook` - Call provider event ingestion

pub mod api;
pub mod lead_webhook;
pub mod telephony_webhook;

pub use lead_webhook::handle_lead_webhook;
pub use telephony_webhook::handle_telephony_webhook;
