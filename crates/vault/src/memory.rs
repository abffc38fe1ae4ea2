use std::collections::HashMap;

use {
    anyhow::Result,
    async_trait::async_trait,
    secrecy::{ExposeSecret, SecretString},
    tokio::sync::RwLock,
};

use crate::SecretStore;

/// Process-local store; secrets vanish on restart.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, SecretString>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with known secrets.
    pub fn with_secrets<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let secrets = entries
            .into_iter()
            .map(|(k, v)| (k.into(), SecretString::new(v.into())))
            .collect();
        Self {
            secrets: RwLock::new(secrets),
        }
    }
}

impl std::fmt::Debug for MemorySecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySecretStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn lookup(&self, client_id: &str) -> Result<Option<SecretString>> {
        Ok(self
            .secrets
            .read()
            .await
            .get(client_id)
            .map(|s| SecretString::new(s.expose_secret().clone())))
    }

    async fn store(&self, client_id: &str, secret: &SecretString) -> Result<()> {
        self.secrets.write().await.insert(
            client_id.to_string(),
            SecretString::new(secret.expose_secret().clone()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_secrets_are_found() {
        let store = MemorySecretStore::with_secrets([("alice", "AAAA"), ("bob", "BBBB")]);
        let alice = store.lookup("alice").await.unwrap().unwrap();
        assert_eq!(alice.expose_secret(), "AAAA");
        assert!(store.lookup("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_replaces_previous_secret() {
        let store = MemorySecretStore::with_secrets([("alice", "AAAA")]);
        store
            .store("alice", &SecretString::new("ZZZZ".into()))
            .await
            .unwrap();
        let alice = store.lookup("alice").await.unwrap().unwrap();
        assert_eq!(alice.expose_secret(), "ZZZZ");
    }
}
