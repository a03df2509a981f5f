//! Service-request lifecycle and offer-arbitration core for a
//! mechanic-dispatch marketplace.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
