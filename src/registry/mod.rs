//! Registration Module
//!
//! The pipeline feeding the log: statement decoding, issuer signature
//! policy, append, metadata recording and receipt synthesis.
//!
//! This module contains:
//! - The registration service
//! - Receipt synthesis (JSON and COSE forms)
//! - Issuer key discovery with a TTL cache

pub mod jwks;
pub mod receipt;
pub mod service;

// Re-exports for convenience
pub use jwks::{Jwk, JwkSet, JwksCache};
pub use receipt::Receipt;
pub use service::{RegistrationOutcome, RegistrationResponse, RegistrationService};
