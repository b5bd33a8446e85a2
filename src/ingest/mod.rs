//! The ingestion pipeline core.
//!
//! Flow per request: tenant resolution (handlers) → event classification
//! (`event`) → contact resolution (`contact`) → lead resolution (`lead`) →
//! call merge-upsert (`call`) and derived metrics (`metrics`). Everything
//! here is request-scoped and stateless; coordination between concurrent
//! requests happens only through the store's constraints.

pub mod call;
pub mod contact;
pub mod event;
pub mod lead;
pub mod metrics;
pub mod phone;
