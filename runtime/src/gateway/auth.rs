//! Bearer credentials for the Artifact Registry API.

use std::time::{Duration, Instant};

use image_archive_core::error::{ArchiveError, Result};
use tokio::sync::Mutex;

/// Tokens minted by gcloud are valid for an hour.
const GCLOUD_TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Environment variables consulted for a pre-minted access token, in order.
const TOKEN_ENV_VARS: [&str; 2] = ["GOOGLE_OAUTH_ACCESS_TOKEN", "CLOUDSDK_AUTH_ACCESS_TOKEN"];

enum Source {
    Token(String),
    Gcloud,
}

/// Access token provider for registry API calls.
pub struct GatewayAuth {
    source: Source,
    cached: Mutex<Option<(String, Instant)>>,
}

impl GatewayAuth {
    /// Use a fixed access token.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            source: Source::Token(token.into()),
            cached: Mutex::new(None),
        }
    }

    /// Mint tokens with `gcloud auth print-access-token`.
    pub fn gcloud() -> Self {
        Self {
            source: Source::Gcloud,
            cached: Mutex::new(None),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `GOOGLE_OAUTH_ACCESS_TOKEN`, then `CLOUDSDK_AUTH_ACCESS_TOKEN`.
    /// Falls back to gcloud if neither is set.
    pub fn from_env() -> Self {
        TOKEN_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|t| !t.trim().is_empty()))
            .map(|token| Self::token(token.trim()))
            .unwrap_or_else(Self::gcloud)
    }

    /// Current bearer token, refreshing a gcloud token when it is near expiry.
    pub async fn bearer(&self) -> Result<String> {
        match &self.source {
            Source::Token(token) => Ok(token.clone()),
            Source::Gcloud => {
                let mut cached = self.cached.lock().await;
                if let Some((token, minted)) = cached.as_ref() {
                    if minted.elapsed() < GCLOUD_TOKEN_TTL {
                        return Ok(token.clone());
                    }
                }

                let token = print_access_token().await?;
                *cached = Some((token.clone(), Instant::now()));
                Ok(token)
            }
        }
    }
}

impl std::fmt::Debug for GatewayAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            Source::Token(_) => f.write_str("GatewayAuth::Token(<redacted>)"),
            Source::Gcloud => f.write_str("GatewayAuth::Gcloud"),
        }
    }
}

async fn print_access_token() -> Result<String> {
    tracing::debug!("Minting access token with gcloud");

    let output = tokio::process::Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| ArchiveError::Config(format!("Failed to run gcloud: {}", e)))?;

    if !output.status.success() {
        return Err(ArchiveError::Config(format!(
            "gcloud auth print-access-token failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(ArchiveError::Config(
            "gcloud returned an empty access token".to_string(),
        ));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_token() {
        let auth = GatewayAuth::token("abc");
        assert_eq!(auth.bearer().await.unwrap(), "abc");
    }

    #[test]
    fn test_debug_hides_token() {
        let auth = GatewayAuth::token("secret-token");
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("redacted"));
    }
}
