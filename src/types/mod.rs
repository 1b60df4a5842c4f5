//! Garmin Types
//!
//! Credential data model, configuration, and the clock used to evaluate expiry.

pub mod clock;
pub mod config;
pub mod token;

pub use clock::*;
pub use config::*;
pub use token::*;
