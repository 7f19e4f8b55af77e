use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedPaths {
    pub canonical_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub session_store_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl SharedPaths {
    pub fn from_root(canonical_root: PathBuf) -> Self {
        let state_dir = canonical_root.join("state");
        Self {
            config_path: canonical_root.join("config.json"),
            session_store_path: state_dir.join("session.json"),
            logs_dir: canonical_root.join("logs"),
            state_dir,
            canonical_root,
        }
    }
}

pub fn resolve_shared_paths() -> anyhow::Result<SharedPaths> {
    let base = dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Failed to resolve data dir"))?;
    Ok(SharedPaths::from_root(base.join("wakeline")))
}

/// Explicit flag first, then `WAKELINE_STATE_DIR`, then the shared data dir.
pub fn resolve_state_root(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag.filter(|d| !d.trim().is_empty()) {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("WAKELINE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    resolve_shared_paths()
        .map(|p| p.canonical_root)
        .unwrap_or_else(|_| PathBuf::from(".wakeline"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_paths_hang_off_the_root() {
        let paths = SharedPaths::from_root(PathBuf::from("/tmp/wl"));
        assert_eq!(paths.config_path, PathBuf::from("/tmp/wl/config.json"));
        assert_eq!(
            paths.session_store_path,
            PathBuf::from("/tmp/wl/state/session.json")
        );
        assert_eq!(paths.logs_dir, PathBuf::from("/tmp/wl/logs"));
    }

    #[test]
    fn explicit_state_root_wins() {
        let root = resolve_state_root(Some("/srv/wakeline".to_string()));
        assert_eq!(root, PathBuf::from("/srv/wakeline"));
    }
}
