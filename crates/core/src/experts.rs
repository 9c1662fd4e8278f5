//! Where expert definitions come from. The chat path only sees
//! [`ExpertRepository`]; a JSON file and an in-memory list back it.

use crate::error::{RagError, Result};
use crate::models::Expert;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[async_trait]
pub trait ExpertRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Expert>>;

    async fn get(&self, expert_id: &str) -> Result<Option<Expert>>;

    /// Inserts or replaces the expert with the same id.
    async fn upsert(&self, expert: Expert) -> Result<()>;

    async fn remove(&self, expert_id: &str) -> Result<bool>;

    async fn require(&self, expert_id: &str) -> Result<Expert> {
        self.get(expert_id).await?.ok_or_else(|| RagError::NotFound {
            entity: "expert",
            id: expert_id.to_string(),
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExpertsFile {
    #[serde(default)]
    experts: Vec<Expert>,
}

/// Experts stored as `{"experts": [...]}` in a JSON file.
///
/// A missing file reads as an empty list and is created on first write.
pub struct JsonExpertRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonExpertRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<ExpertsFile> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "experts file missing, using empty list");
                Ok(ExpertsFile::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn save(&self, file: &ExpertsFile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(file)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl ExpertRepository for JsonExpertRepository {
    async fn list(&self) -> Result<Vec<Expert>> {
        Ok(self.load().await?.experts)
    }

    async fn get(&self, expert_id: &str) -> Result<Option<Expert>> {
        Ok(self
            .load()
            .await?
            .experts
            .into_iter()
            .find(|expert| expert.id == expert_id))
    }

    async fn upsert(&self, expert: Expert) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        match file.experts.iter_mut().find(|existing| existing.id == expert.id) {
            Some(existing) => *existing = expert,
            None => file.experts.push(expert),
        }
        self.save(&file).await
    }

    async fn remove(&self, expert_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await?;
        let before = file.experts.len();
        file.experts.retain(|expert| expert.id != expert_id);
        if file.experts.len() == before {
            return Ok(false);
        }
        self.save(&file).await?;
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryExpertRepository {
    experts: RwLock<Vec<Expert>>,
}

impl InMemoryExpertRepository {
    pub fn new(experts: Vec<Expert>) -> Self {
        Self {
            experts: RwLock::new(experts),
        }
    }
}

#[async_trait]
impl ExpertRepository for InMemoryExpertRepository {
    async fn list(&self) -> Result<Vec<Expert>> {
        Ok(self.experts.read().await.clone())
    }

    async fn get(&self, expert_id: &str) -> Result<Option<Expert>> {
        Ok(self
            .experts
            .read()
            .await
            .iter()
            .find(|expert| expert.id == expert_id)
            .cloned())
    }

    async fn upsert(&self, expert: Expert) -> Result<()> {
        let mut experts = self.experts.write().await;
        match experts.iter_mut().find(|existing| existing.id == expert.id) {
            Some(existing) => *existing = expert,
            None => experts.push(expert),
        }
        Ok(())
    }

    async fn remove(&self, expert_id: &str) -> Result<bool> {
        let mut experts = self.experts.write().await;
        let before = experts.len();
        experts.retain(|expert| expert.id != expert_id);
        Ok(experts.len() != before)
    }
}
