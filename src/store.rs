//! Membership snapshot persistence
//!
//! The set of joined rooms is kept as a JSON array of room ids and rewritten
//! wholesale after every membership change.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::types::RoomId;

/// Backup file name inside the backup directory
pub const BACKUP_FILE_NAME: &str = "rooms.json";

/// Backup directory used when none is configured
pub fn default_backup_dir() -> PathBuf {
    std::env::temp_dir().join("chat-relay")
}

/// Make sure `dir/name` exists, seeding it with an empty room list
///
/// Called once at bootstrap so that a missing file later on points at an
/// operator problem rather than a fresh install.
pub async fn prepare_backup_file(dir: &Path, name: &str) -> Result<PathBuf, StoreError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

    let path = dir.join(name);
    let exists = tokio::fs::try_exists(&path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

    if !exists {
        tokio::fs::write(&path, b"[]")
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        info!("created backup file {:?}", path);
    }
    Ok(path)
}

/// Durable list of joined room ids
#[derive(Debug, Clone)]
pub struct MembershipStore {
    path: PathBuf,
}

impl MembershipStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted room ids
    ///
    /// A missing file means no rooms; an unreadable or malformed one is an
    /// error.
    pub async fn load(&self) -> Result<Vec<RoomId>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no backup at {:?}, starting with no rooms", self.path);
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Overwrite the snapshot with `room_ids`, logging any failure
    pub async fn save(&self, room_ids: &[RoomId]) {
        if let Err(e) = self.write(room_ids).await {
            error!("saving rooms failed: {}", e);
        }
    }

    async fn write(&self, room_ids: &[RoomId]) -> Result<(), StoreError> {
        let json = serde_json::to_vec(room_ids).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use uuid::Uuid;

    use super::*;

    /// Fresh path under the temp dir, not created yet
    pub(crate) fn temp_backup_path() -> PathBuf {
        std::env::temp_dir().join(format!("chat-relay-test-{}.json", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let store = MembershipStore::new(temp_backup_path());
        let ids = vec![RoomId::from("ops"), RoomId::from("dev")];

        store.save(&ids).await;
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, ids);

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let store = MembershipStore::new(temp_backup_path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_malformed_file_fails() {
        let path = temp_backup_path();
        std::fs::write(&path, "{not json").unwrap();

        let result = MembershipStore::new(&path).load().await;
        assert!(matches!(result, Err(StoreError::Json { .. })));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_file() {
        let store = MembershipStore::new(temp_backup_path());
        store
            .save(&[RoomId::from("a"), RoomId::from("b"), RoomId::from("c")])
            .await;
        store.save(&[RoomId::from("b")]).await;

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, r#"["b"]"#);

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_save_failure_is_not_propagated() {
        let store = MembershipStore::new("/non-existing-dir/rooms.json");
        store.save(&[RoomId::from("a")]).await;
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_backup_file_seeds_empty_list() {
        let dir = std::env::temp_dir().join(format!("chat-relay-test-{}", Uuid::new_v4()));

        let path = prepare_backup_file(&dir, BACKUP_FILE_NAME).await.unwrap();
        assert!(path.ends_with(BACKUP_FILE_NAME));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");

        // existing content is left alone
        std::fs::write(&path, r#"["ops"]"#).unwrap();
        prepare_backup_file(&dir, BACKUP_FILE_NAME).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"["ops"]"#);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_prepare_backup_file_in_unwritable_dir_fails() {
        let result = prepare_backup_file(Path::new("/proc/chat-relay-test"), BACKUP_FILE_NAME).await;
        assert!(result.is_err());
    }
}
