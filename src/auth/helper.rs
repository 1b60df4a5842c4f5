//! Auth Helper
//!
//! Boundary to the external program that performs the interactive Garmin SSO
//! exchange and prints the resulting tokens.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::GarminError;
use crate::types::OAuthConfig;

/// Default upper bound for one helper run.
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(120);

/// Captured result of one helper run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperOutput {
    /// Process exited with status zero.
    pub success: bool,
    /// Exit code, when the process was not terminated by a signal.
    pub exit_code: Option<i32>,
    /// Standard output followed by standard error.
    pub output: String,
}

impl HelperOutput {
    /// Successful run with the given output.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            output: output.into(),
        }
    }

    /// Failed run with the given exit code and output.
    pub fn failure(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            output: output.into(),
        }
    }
}

/// Capability to run the authentication helper once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthHelper: Send + Sync {
    /// Run `authenticate <identity> <secret>` and capture its combined output.
    async fn run(&self, identity: &str, secret: &SecretString) -> Result<HelperOutput, GarminError>;
}

/// Helper invoked as a child process: `<interpreter> <script> authenticate <identity> <secret>`.
#[derive(Debug, Clone)]
pub struct ProcessAuthHelper {
    interpreter: PathBuf,
    script: PathBuf,
    timeout: Duration,
}

impl ProcessAuthHelper {
    /// Create a helper runner.
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }

    /// Create a helper runner from credential configuration.
    pub fn from_config(config: &OAuthConfig) -> Self {
        Self::new(&config.python_path, &config.auth_helper_path)
    }

    /// Set the upper bound for one run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AuthHelper for ProcessAuthHelper {
    async fn run(&self, identity: &str, secret: &SecretString) -> Result<HelperOutput, GarminError> {
        debug!(
            interpreter = %self.interpreter.display(),
            script = %self.script.display(),
            "Starting auth helper"
        );

        let child = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg("authenticate")
            .arg(identity)
            .arg(secret.expose_secret())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GarminError::authentication(format!("failed to start auth helper: {}", e))
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                GarminError::authentication(format!(
                    "auth helper did not finish within {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| GarminError::authentication(format!("auth helper failed: {}", e)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(HelperOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            output: combined,
        })
    }
}
