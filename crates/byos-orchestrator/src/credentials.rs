//! Activation key resolution
//!
//! The key is resolved once per run, before any worker starts, from the first
//! configured source: an explicit key vault lookup, the environment, or
//! nothing at all when the mode allows it.

use crate::config::{RunMode, RunOptions};
use crate::{Error, Result};
use azure_fleet::SecretStore;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Environment variable holding the activation key
pub const ACTIVATION_KEY_ENV: &str = "BYOS_ACTIVATION_KEY";

/// Most characters of the key shown in test mode
const PREVIEW_CHARS: usize = 20;

/// Registration credential for the management server
///
/// Cheap to clone and shared read-only by every worker. It has no `Display`
/// and its `Debug` output never contains the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ActivationSecret(Arc<str>);

impl ActivationSecret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    /// The raw value, for embedding into the remote command unit only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length in characters
    pub fn char_count(&self) -> usize {
        self.0.chars().count()
    }

    /// First characters of the key plus its total length
    ///
    /// Never more than half of the key, so short keys stay hidden too.
    pub fn preview(&self) -> String {
        let count = self.char_count();
        let prefix: String = self.0.chars().take(PREVIEW_CHARS.min(count / 2)).collect();
        format!("{}... ({} chars)", prefix, count)
    }
}

impl fmt::Debug for ActivationSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivationSecret(<redacted>, {} chars)", self.char_count())
    }
}

/// Where the activation key came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Key vault lookup
    SecretStore {
        /// Key vault name
        store: String,
        /// Secret name
        name: String,
    },
    /// The environment variable
    Environment,
    /// No key; registration runs without one or is skipped
    Absent,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::SecretStore { store, name } => {
                write!(f, "key vault '{}' secret '{}'", store, name)
            }
            CredentialSource::Environment => write!(f, "environment variable {}", ACTIVATION_KEY_ENV),
            CredentialSource::Absent => write!(f, "none"),
        }
    }
}

/// The credential sources configured for a run
#[derive(Clone)]
pub struct CredentialRequest {
    /// Key vault and secret name
    pub store: Option<(String, String)>,
    /// Value of the environment variable
    pub env_value: Option<String>,
    /// Run mode
    pub mode: RunMode,
}

impl CredentialRequest {
    /// Collect the sources from run options
    pub fn from_options(options: &RunOptions) -> Self {
        let store = match (&options.key_vault, &options.secret_name) {
            (Some(store), Some(name)) => Some((store.clone(), name.clone())),
            _ => None,
        };
        Self {
            store,
            env_value: options.env_secret.clone(),
            mode: options.mode(),
        }
    }
}

impl fmt::Debug for CredentialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRequest")
            .field("store", &self.store)
            .field("env_value", &self.env_value.as_ref().map(|_| "<redacted>"))
            .field("mode", &self.mode)
            .finish()
    }
}

/// Outcome of credential resolution
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    /// The key, or `None` when the run proceeds without one
    pub secret: Option<ActivationSecret>,
    /// Source the key was taken from
    pub source: CredentialSource,
    /// Prefix and length of the key, only in test mode
    pub preview: Option<String>,
}

impl ResolvedCredential {
    /// True when registration must run without an activation key
    pub fn skip_activation_key(&self) -> bool {
        self.secret.is_none()
    }
}

/// Resolves the activation key for a run
pub struct CredentialProvider<'a> {
    store: &'a dyn SecretStore,
}

impl<'a> CredentialProvider<'a> {
    /// Create a provider backed by `store`
    pub fn new(store: &'a dyn SecretStore) -> Self {
        Self { store }
    }

    /// Resolve the key; the first configured source wins
    ///
    /// A failed key vault lookup is fatal and never falls back to the
    /// environment.
    pub async fn resolve(&self, request: &CredentialRequest) -> Result<ResolvedCredential> {
        let (secret, source) = if let Some((store, name)) = &request.store {
            let value = self
                .store
                .get_secret(store, name)
                .await
                .map_err(|e| Error::SecretStore {
                    store: store.clone(),
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            if value.is_empty() {
                return Err(Error::SecretStore {
                    store: store.clone(),
                    name: name.clone(),
                    reason: "secret value is empty".to_string(),
                });
            }
            let source = CredentialSource::SecretStore {
                store: store.clone(),
                name: name.clone(),
            };
            (Some(ActivationSecret::new(value)), source)
        } else if let Some(value) = request.env_value.as_deref().filter(|v| !v.is_empty()) {
            (Some(ActivationSecret::new(value)), CredentialSource::Environment)
        } else if request.mode.allows_missing_secret() {
            (None, CredentialSource::Absent)
        } else {
            return Err(Error::MissingActivationKey {
                env_var: ACTIVATION_KEY_ENV,
            });
        };

        let preview = match (&secret, request.mode) {
            (Some(secret), RunMode::Test) => Some(secret.preview()),
            _ => None,
        };

        match (&secret, &preview) {
            (Some(_), Some(preview)) => info!("Activation key from {}: {}", source, preview),
            (Some(_), None) => info!("Activation key resolved from {}", source),
            (None, _) => info!("No activation key configured, registration runs without one"),
        }

        Ok(ResolvedCredential {
            secret,
            source,
            preview,
        })
    }
}
