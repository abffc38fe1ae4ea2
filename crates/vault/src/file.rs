use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    secrecy::{ExposeSecret, SecretString},
    tokio::{io::AsyncWriteExt, sync::Mutex},
    tracing::debug,
};

use crate::SecretStore;

/// JSON file mapping client id → base32 secret.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Sibling file the next map is written to before it replaces `path`.
    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read_map(&self) -> Result<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => serde_json::from_str(&data)
                .with_context(|| format!("corrupt secret store {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn lookup(&self, client_id: &str) -> Result<Option<SecretString>> {
        let map = self.read_map().await?;
        Ok(map.get(client_id).cloned().map(SecretString::new))
    }

    async fn store(&self, client_id: &str, secret: &SecretString) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut map = self.read_map().await?;
        map.insert(client_id.to_string(), secret.expose_secret().clone());

        let data = serde_json::to_string_pretty(&map)?;
        let staging = self.staging_path();
        write_owner_only(&staging, data.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        // Readers see either the old map or the new one, never a partial file.
        tokio::fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        debug!(client_id, path = %self.path.display(), "stored client secret");
        Ok(())
    }
}

async fn write_owner_only(path: &Path, data: &[u8]) -> Result<()> {
    // A leftover from an interrupted write may carry looser permissions.
    let _ = tokio::fs::remove_file(path).await;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_means_unknown_client() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::with_path(dir.path().join("secrets.json"));
        assert!(store.lookup("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn secrets_survive_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secrets.json");

        let store = FileSecretStore::with_path(path.clone());
        store
            .store("alice", &SecretString::new("AAAA".into()))
            .await
            .unwrap();
        store
            .store("bob", &SecretString::new("BBBB".into()))
            .await
            .unwrap();

        let reopened = FileSecretStore::with_path(path);
        let alice = reopened.lookup("alice").await.unwrap().unwrap();
        assert_eq!(alice.expose_secret(), "AAAA");
        let bob = reopened.lookup("bob").await.unwrap().unwrap();
        assert_eq!(bob.expose_secret(), "BBBB");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn store_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        let store = FileSecretStore::with_path(path.clone());
        store
            .store("alice", &SecretString::new("AAAA".into()))
            .await
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lookups_stay_consistent_while_enrolling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        let store = std::sync::Arc::new(FileSecretStore::with_path(path.clone()));
        for i in 0..50 {
            store
                .store(&format!("known{i}"), &SecretString::new(format!("SECRET{i}")))
                .await
                .unwrap();
        }

        let writer = {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..200 {
                    store
                        .store(&format!("new{i}"), &SecretString::new("NEWSECRET".into()))
                        .await
                        .unwrap();
                }
            })
        };

        loop {
            let found = store.lookup("known0").await.unwrap().unwrap();
            assert_eq!(found.expose_secret(), "SECRET0");
            if writer.is_finished() {
                break;
            }
        }
        writer.await.unwrap();

        assert!(store.lookup("new199").await.unwrap().is_some());
        assert!(!store.staging_path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileSecretStore::with_path(path);
        assert!(store.lookup("alice").await.is_err());
    }
}
