//! Credential lifecycle shared by the ad-platform token and the CRM API key.
//!
//! Both credentials follow the same contract: `verify()` checks the held value
//! without changing anything, `interactive_obtain()` runs a single acquisition
//! attempt and persists the value when it verifies. The HTTP checks and the
//! terminal prompt sit behind [`TokenVerifier`] and [`SecretPrompt`] so the
//! contract can be exercised without a network or a TTY.

use crate::errors::{AppError, ResultExt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Observable state of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Absent,
    Invalid,
    Valid,
}

/// A secret value that never prints itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Arc<str>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 prefix, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.fingerprint())
    }
}

/// Credential contract used by the orchestrator.
#[async_trait]
pub trait Credential: Send + Sync {
    /// Name used in logs and errors.
    fn label(&self) -> &'static str;

    /// Current state of the held value. Does not mutate anything.
    async fn state(&self) -> CredentialState;

    /// `true` only when the held value passes verification.
    async fn verify(&self) -> bool {
        self.state().await == CredentialState::Valid
    }

    /// One interactive acquisition attempt; persists the value on success.
    async fn interactive_obtain(&mut self) -> bool;

    /// The held value, if any.
    fn secret(&self) -> Option<Secret>;
}

/// Remote validity check for a secret.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `Ok(false)` means the remote side rejected the secret.
    async fn check(&self, secret: &str) -> Result<bool, AppError>;

    /// Hook applied to a freshly entered secret before it is verified and saved.
    async fn finalize(&self, secret: String) -> Result<String, AppError> {
        Ok(secret)
    }
}

/// Source of interactively entered secrets.
pub trait SecretPrompt: Send + Sync {
    /// `None` when the operator cancels.
    fn ask_secret(&self, label: &str) -> Option<String>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    secret: String,
    saved_at: DateTime<Utc>,
}

/// JSON file holding one persisted secret.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored secret. Unreadable or corrupt files count as absent.
    pub fn load(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<StoredToken>(&raw) {
            Ok(stored) if !stored.secret.trim().is_empty() => Some(stored.secret),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring corrupt credential file");
                None
            }
        }
    }

    pub fn save(&self, secret: &str) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(&StoredToken {
            secret: secret.to_string(),
            saved_at: Utc::now(),
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        restrict_permissions(&tmp);
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!(path = %path.display(), error = %e, "Could not restrict credential file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Credential backed by an optional environment variable, a [`TokenFile`]
/// and a remote [`TokenVerifier`].
///
/// The environment variable, when set, wins over the file. The value is
/// loaded once at construction and only replaced by `interactive_obtain`.
pub struct StoredCredential<V> {
    label: &'static str,
    file: TokenFile,
    verifier: V,
    prompt: Arc<dyn SecretPrompt>,
    secret: Option<Secret>,
}

impl<V: TokenVerifier> StoredCredential<V> {
    pub fn new(
        label: &'static str,
        file: TokenFile,
        env_key: Option<&str>,
        verifier: V,
        prompt: Arc<dyn SecretPrompt>,
    ) -> Self {
        let from_env = env_key
            .and_then(|key| std::env::var(key).ok())
            .filter(|value| !value.trim().is_empty());
        let secret = from_env.or_else(|| file.load()).map(Secret::new);

        match &secret {
            Some(s) => tracing::info!(credential = label, fingerprint = %s.fingerprint(), "Loaded stored credential"),
            None => tracing::info!(credential = label, "No stored credential"),
        }

        Self {
            label,
            file,
            verifier,
            prompt,
            secret,
        }
    }
}

#[async_trait]
impl<V: TokenVerifier> Credential for StoredCredential<V> {
    fn label(&self) -> &'static str {
        self.label
    }

    async fn state(&self) -> CredentialState {
        let Some(secret) = &self.secret else {
            return CredentialState::Absent;
        };
        match self.verifier.check(secret.expose()).await {
            Ok(true) => CredentialState::Valid,
            Ok(false) => {
                tracing::warn!(credential = self.label, fingerprint = %secret.fingerprint(), "Credential rejected");
                CredentialState::Invalid
            }
            Err(e) => {
                tracing::warn!(credential = self.label, error = %e, "Credential check failed");
                CredentialState::Invalid
            }
        }
    }

    async fn interactive_obtain(&mut self) -> bool {
        let Some(entered) = self.prompt.ask_secret(self.label) else {
            tracing::warn!(credential = self.label, "Credential entry cancelled");
            return false;
        };
        let entered = entered.trim().to_string();
        if entered.is_empty() {
            tracing::warn!(credential = self.label, "Empty credential entered");
            return false;
        }

        let finalized = match self.verifier.finalize(entered).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(credential = self.label, error = %e, "Credential exchange failed");
                return false;
            }
        };

        match self.verifier.check(&finalized).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(credential = self.label, "Entered credential was rejected");
                return false;
            }
            Err(e) => {
                tracing::error!(credential = self.label, error = %e, "Could not verify entered credential");
                return false;
            }
        }

        if let Err(e) = self.file.save(&finalized) {
            tracing::error!(credential = self.label, path = %self.file.path().display(), error = %e, "Failed to persist credential");
            return false;
        }

        let secret = Secret::new(finalized);
        tracing::info!(credential = self.label, fingerprint = %secret.fingerprint(), "Credential saved");
        self.secret = Some(secret);
        true
    }

    fn secret(&self) -> Option<Secret> {
        self.secret.clone()
    }
}
