//! Authentication
//!
//! Credential acquisition through the external auth helper.

pub mod acquirer;
pub mod helper;

pub use acquirer::{locate_payload, parse_helper_output, AcquiredCredentials, CredentialAcquirer};
pub use helper::{AuthHelper, HelperOutput, ProcessAuthHelper, DEFAULT_HELPER_TIMEOUT};
