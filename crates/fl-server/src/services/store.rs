//! Persistence of bulk artifacts received from agents.

use std::path::PathBuf;

use async_trait::async_trait;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `bytes` received from `identity` under `name`; returns where it went.
    async fn save(&self, identity: &str, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf>;
}

/// Writes artifacts as `{identity}_{name}` inside one directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, identity: &str, name: &str) -> anyhow::Result<PathBuf> {
        check_component("identity", identity)?;
        check_component("name", name)?;
        Ok(self.root.join(format!("{identity}_{name}")))
    }
}

/// Names come off the wire; keep them inside the store directory.
fn check_component(what: &str, value: &str) -> anyhow::Result<()> {
    if value.is_empty() {
        anyhow::bail!("artifact {what} is empty");
    }
    if value.contains(&['/', '\\'][..]) || value == "." || value == ".." {
        anyhow::bail!("artifact {what} '{value}' is not a plain file name");
    }
    Ok(())
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save(&self, identity: &str, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.path_for(identity, name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}
