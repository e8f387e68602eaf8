use std::{
    io,
    path::{Path, PathBuf},
};

use uuid::Uuid;

use crate::session::SessionError;

pub const MANIFEST_FILE: &str = "index.m3u8";
pub const SEGMENT_PATTERN: &str = "seg_%03d.ts";

/// Fresh session identifier: a random UUIDv4 in 32-character hex form.
/// Never derived from the request, so directory names cannot collide.
pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Owns the workspace root that the static file layer serves from.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    mount_prefix: String,
}

/// One session's private output directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    session_id: String,
    dir: PathBuf,
    mount_prefix: String,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>, mount_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            mount_prefix: mount_prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mount_prefix(&self) -> &str {
        &self.mount_prefix
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Creates the session directory. `create_dir` (not `create_dir_all`)
    /// makes an already existing directory an error instead of a reuse.
    pub async fn allocate(&self, session_id: &str) -> Result<Workspace, SessionError> {
        let dir = self.path_for(session_id);
        tokio::fs::create_dir(&dir).await.map_err(|err| {
            SessionError::WorkspaceError(format!("{}: {err}", dir.display()))
        })?;
        Ok(Workspace {
            session_id: session_id.to_string(),
            dir,
            mount_prefix: self.mount_prefix.clone(),
        })
    }
}

impl Workspace {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Path under which the static file layer exposes `file`.
    pub fn public_path(&self, file: &str) -> String {
        format!("{}/{}/{}", self.mount_prefix, self.session_id, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn session_ids_do_not_collide() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_session_id()).collect();
        assert_eq!(ids.len(), 10_000);
        assert!(ids.iter().all(|id| id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[tokio::test]
    async fn allocates_directory_and_public_path() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path(), "/hls");
        let workspace = manager.allocate("abc").await.unwrap();

        assert!(workspace.dir().is_dir());
        assert_eq!(workspace.manifest_path(), root.path().join("abc").join(MANIFEST_FILE));
        assert_eq!(workspace.public_path(MANIFEST_FILE), "/hls/abc/index.m3u8");
    }

    #[tokio::test]
    async fn existing_directory_is_never_reused() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path(), "/hls");
        manager.allocate("dup").await.unwrap();
        let err = manager.allocate("dup").await.unwrap_err();
        assert!(matches!(err, SessionError::WorkspaceError(_)));
    }

    #[tokio::test]
    async fn missing_root_is_a_workspace_error() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().join("missing"), "/hls");
        assert!(matches!(
            manager.allocate("x").await,
            Err(SessionError::WorkspaceError(_))
        ));
    }
}
