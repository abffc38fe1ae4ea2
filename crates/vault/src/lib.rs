//! Per-client one-time-code secret storage.
//!
//! The hub only needs `lookup`; `store` persists a secret minted during
//! enrollment so the client keeps it across reconnects.

pub mod file;
pub mod memory;

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    parley_config::{SecretsBackend, SecretsConfig},
    secrecy::SecretString,
    tracing::debug,
};

pub use {file::FileSecretStore, memory::MemorySecretStore};

/// Maps a client identifier to its shared secret.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// The client's secret, or `None` for an unknown client.
    async fn lookup(&self, client_id: &str) -> Result<Option<SecretString>>;

    /// Remember `secret` for `client_id`, replacing any previous one.
    async fn store(&self, client_id: &str, secret: &SecretString) -> Result<()>;
}

/// A store that knows no one. Every connection enrolls afresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSecretStore;

#[async_trait]
impl SecretStore for NullSecretStore {
    async fn lookup(&self, _client_id: &str) -> Result<Option<SecretString>> {
        Ok(None)
    }

    async fn store(&self, _client_id: &str, _secret: &SecretString) -> Result<()> {
        Ok(())
    }
}

/// Build the store selected by config.
pub fn from_config(config: &SecretsConfig) -> Arc<dyn SecretStore> {
    match config.backend {
        SecretsBackend::File => {
            let path = config.resolved_path();
            debug!(path = %path.display(), "using file secret store");
            Arc::new(FileSecretStore::with_path(path))
        },
        SecretsBackend::Memory => Arc::new(MemorySecretStore::new()),
        SecretsBackend::None => Arc::new(NullSecretStore),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[tokio::test]
    async fn null_store_forgets_everything() {
        let store = NullSecretStore;
        store
            .store("alice", &SecretString::new("AAAA".into()))
            .await
            .unwrap();
        assert!(store.lookup("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn from_config_selects_backend() {
        let store = from_config(&SecretsConfig {
            backend: SecretsBackend::Memory,
            path: None,
        });
        store
            .store("bob", &SecretString::new("BBBB".into()))
            .await
            .unwrap();
        let found = store.lookup("bob").await.unwrap().unwrap();
        assert_eq!(found.expose_secret(), "BBBB");

        let none = from_config(&SecretsConfig {
            backend: SecretsBackend::None,
            path: None,
        });
        assert!(none.lookup("bob").await.unwrap().is_none());
    }
}
