use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use wakeline_types::{
    IdentitySource, SessionCredential, UserProfile, OFFLINE_FLAG_TTL, PROFILE_TTL,
    REFRESH_TOKEN_TTL, TOKEN_TTL,
};

pub const KEY_TOKEN: &str = "token";
pub const KEY_REFRESH_TOKEN: &str = "refreshToken";
pub const KEY_USER_DATA: &str = "userData";
pub const KEY_OFFLINE_MODE: &str = "offline_mode";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: Value,
    expires_at_ms: u64,
}

impl StoredEntry {
    fn is_live(&self, now: u64) -> bool {
        now < self.expires_at_ms
    }
}

/// Profile plus the bookkeeping needed to rebuild a credential on the next start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUserData {
    #[serde(flatten)]
    profile: UserProfile,
    source: IdentitySource,
    issued_at: DateTime<Utc>,
}

/// Durable key-value state with per-key lifetimes.
///
/// Writes replace the backing file through a temp file and a rename, so a reader never sees a
/// half-written credential. `offline_mode` is also mirrored into a session-scoped map that
/// lives as long as the process.
pub struct SessionStore {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<String, StoredEntry>>,
    session_scope: RwLock<HashMap<String, Value>>,
    /// Held from snapshot to rename so file writes land in snapshot order.
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut entries = if path.exists() {
            let raw = fs::read_to_string(&path).await?;
            serde_json::from_str::<HashMap<String, StoredEntry>>(&raw).unwrap_or_else(|err| {
                tracing::warn!("session store at {} is unreadable: {}", path.display(), err);
                HashMap::new()
            })
        } else {
            HashMap::new()
        };
        let now = now_ms();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
            session_scope: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
            session_scope: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = now_ms();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        {
            let mut entries = self.entries.write().await;
            entries.insert(key.to_string(), entry_for(value, ttl));
        }
        self.flush().await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes token, refresh token and profile in one step.
    pub async fn save_credential(&self, credential: &SessionCredential) -> Result<(), StoreError> {
        let user_data = serde_json::to_value(StoredUserData {
            profile: credential.profile.clone(),
            source: credential.source,
            issued_at: credential.issued_at,
        })?;
        {
            let mut entries = self.entries.write().await;
            entries.insert(
                KEY_TOKEN.to_string(),
                entry_for(Value::String(credential.token.clone()), TOKEN_TTL),
            );
            match &credential.refresh_token {
                Some(refresh) => {
                    entries.insert(
                        KEY_REFRESH_TOKEN.to_string(),
                        entry_for(Value::String(refresh.clone()), REFRESH_TOKEN_TTL),
                    );
                }
                None => {
                    entries.remove(KEY_REFRESH_TOKEN);
                }
            }
            entries.insert(KEY_USER_DATA.to_string(), entry_for(user_data, PROFILE_TTL));
        }
        self.flush().await
    }

    /// Rebuilds the stored credential. A missing or expired token yields `None` even when the
    /// longer-lived profile is still present.
    pub async fn load_credential(&self) -> Option<SessionCredential> {
        let token = self.get(KEY_TOKEN).await?.as_str()?.to_string();
        let user_data = self.get(KEY_USER_DATA).await?;
        let stored = serde_json::from_value::<StoredUserData>(user_data).ok()?;
        let refresh_token = self
            .get(KEY_REFRESH_TOKEN)
            .await
            .and_then(|v| v.as_str().map(ToString::to_string));
        Some(SessionCredential {
            token,
            refresh_token,
            profile: stored.profile,
            source: stored.source,
            issued_at: stored.issued_at,
        })
    }

    pub async fn stored_profile(&self) -> Option<UserProfile> {
        let user_data = self.get(KEY_USER_DATA).await?;
        serde_json::from_value::<StoredUserData>(user_data)
            .ok()
            .map(|stored| stored.profile)
    }

    pub async fn clear_credential(&self) -> Result<(), StoreError> {
        {
            let mut entries = self.entries.write().await;
            entries.remove(KEY_TOKEN);
            entries.remove(KEY_REFRESH_TOKEN);
            entries.remove(KEY_USER_DATA);
        }
        self.flush().await
    }

    pub async fn set_offline(&self, enabled: bool) -> Result<(), StoreError> {
        {
            let mut scope = self.session_scope.write().await;
            if enabled {
                scope.insert(KEY_OFFLINE_MODE.to_string(), Value::Bool(true));
            } else {
                scope.remove(KEY_OFFLINE_MODE);
            }
        }
        if enabled {
            self.set(KEY_OFFLINE_MODE, Value::Bool(true), OFFLINE_FLAG_TTL)
                .await
        } else {
            self.remove(KEY_OFFLINE_MODE).await
        }
    }

    pub async fn offline_mode(&self) -> bool {
        if let Some(Value::Bool(true)) = self.get(KEY_OFFLINE_MODE).await {
            return true;
        }
        self.session_value(KEY_OFFLINE_MODE).await == Some(Value::Bool(true))
    }

    pub async fn session_value(&self, key: &str) -> Option<Value> {
        self.session_scope.read().await.get(key).cloned()
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let now = now_ms();
            let mut entries = self.entries.write().await;
            entries.retain(|_, entry| entry.is_live(now));
            entries.clone()
        };
        let payload = serde_json::to_string_pretty(&snapshot)?;
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, payload).await?;
        if let Err(err) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }
}

fn entry_for(value: Value, ttl: Duration) -> StoredEntry {
    StoredEntry {
        value,
        expires_at_ms: now_ms().saturating_add(ttl.as_millis() as u64),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credential(source: IdentitySource, refresh: Option<&str>) -> SessionCredential {
        SessionCredential {
            token: "T".to_string(),
            refresh_token: refresh.map(ToString::to_string),
            profile: UserProfile {
                username: "a".to_string(),
                email: "a@b.com".to_string(),
                country: "NO".to_string(),
                age: Some(30),
            },
            source,
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn credential_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state").join("session.json");
        let store = SessionStore::open(&path).await.expect("open");
        let saved = credential(IdentitySource::Remote, Some("R"));
        store.save_credential(&saved).await.expect("save");

        let reopened = SessionStore::open(&path).await.expect("reopen");
        let loaded = reopened.load_credential().await.expect("credential");
        assert_eq!(loaded, saved);
        assert_eq!(reopened.get(KEY_TOKEN).await, Some(json!("T")));
    }

    #[tokio::test]
    async fn saving_without_refresh_token_drops_stale_one() {
        let store = SessionStore::in_memory();
        store
            .save_credential(&credential(IdentitySource::Remote, Some("old")))
            .await
            .expect("save");
        store
            .save_credential(&credential(IdentitySource::Synthesized, None))
            .await
            .expect("save");

        let loaded = store.load_credential().await.expect("credential");
        assert_eq!(loaded.refresh_token, None);
        assert!(loaded.offline_synthesized());
    }

    #[tokio::test]
    async fn clearing_credential_keeps_offline_flag() {
        let store = SessionStore::in_memory();
        store
            .save_credential(&credential(IdentitySource::Remote, Some("R")))
            .await
            .expect("save");
        store.set_offline(true).await.expect("offline");
        assert_eq!(
            store.stored_profile().await.map(|p| p.username),
            Some("a".to_string())
        );

        store.clear_credential().await.expect("clear");
        assert!(store.load_credential().await.is_none());
        assert!(store.stored_profile().await.is_none());
        assert!(store.offline_mode().await);
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let store = SessionStore::in_memory();
        store
            .set(KEY_TOKEN, json!("gone"), Duration::ZERO)
            .await
            .expect("set");
        assert_eq!(store.get(KEY_TOKEN).await, None);
    }

    #[tokio::test]
    async fn offline_flag_is_durable_and_session_mirrored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        let store = SessionStore::open(&path).await.expect("open");
        store.set_offline(true).await.expect("offline");

        assert!(store.offline_mode().await);
        assert_eq!(
            store.session_value(KEY_OFFLINE_MODE).await,
            Some(Value::Bool(true))
        );
        let reopened = SessionStore::open(&path).await.expect("reopen");
        assert!(reopened.offline_mode().await);

        reopened.set_offline(false).await.expect("online");
        assert!(!reopened.offline_mode().await);
    }

    #[tokio::test]
    async fn concurrent_writes_all_reach_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        let store = SessionStore::open(&path).await.expect("open");

        let saved = credential(IdentitySource::Synthesized, Some("R"));
        for _ in 0..8 {
            let (a, b) = tokio::join!(store.save_credential(&saved), store.set_offline(true));
            a.expect("save");
            b.expect("offline");
        }

        let reopened = SessionStore::open(&path).await.expect("reopen");
        assert_eq!(reopened.load_credential().await, Some(saved));
        assert!(reopened.offline_mode().await);
    }

    #[tokio::test]
    async fn flush_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        let store = SessionStore::open(&path).await.expect("open");
        store
            .save_credential(&credential(IdentitySource::Remote, None))
            .await
            .expect("save");

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["session.json".to_string()]);
    }
}
