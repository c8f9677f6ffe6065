//! Generation history: the record sink the orchestrator writes to
//!
//! Every successfully completed job produces exactly one record, written as
//! the job finishes. A record failure is logged by the caller and never
//! retroactively fails the generation that produced it.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Kind of operation that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Generate,
    Edit,
    Combine,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Generate => "generate",
            GenerationKind::Edit => "edit",
            GenerationKind::Combine => "combine",
        }
    }
}

/// A new record, before the store assigns an id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGeneration {
    pub kind: GenerationKind,
    pub prompt: String,
    pub model: String,
    pub image_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

/// A stored record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: i64,
    pub kind: GenerationKind,
    pub prompt: String,
    pub model: String,
    pub image_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query filter for listing history
#[derive(Debug, Clone, Default)]
pub struct GenerationFilter {
    pub kind: Option<GenerationKind>,
    /// Substring match against the prompt
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl GenerationFilter {
    fn matches(&self, record: &GenerationRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !record
                .prompt
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// The record sink interface consumed by the orchestrator
#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn add_generation(&self, new: NewGeneration) -> Result<i64>;
    async fn get_generations(&self, filter: &GenerationFilter) -> Result<Vec<GenerationRecord>>;
    async fn delete_generation(&self, id: i64) -> Result<bool>;
}

/// Append-only JSONL file store
pub struct JsonlStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<GenerationRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<GenerationRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("skipping corrupt history line: {}", e),
            }
        }
        Ok(records)
    }

    async fn write_all(&self, records: &[GenerationRecord]) -> Result<()> {
        let mut contents = String::new();
        for record in records {
            contents.push_str(&serde_json::to_string(record)?);
            contents.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

#[async_trait]
impl GenerationStore for JsonlStore {
    async fn add_generation(&self, new: NewGeneration) -> Result<i64> {
        let _guard = self.lock.lock().await;
        let records = self.read_all().await?;
        let id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;

        let record = GenerationRecord {
            id,
            kind: new.kind,
            prompt: new.prompt,
            model: new.model,
            image_path: new.image_path,
            resolution: new.resolution,
            negative_prompt: new.negative_prompt,
            created_at: Utc::now(),
        };

        let line = serde_json::to_string(&record)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::Store(e.to_string())),
        };
        contents.push_str(&line);
        contents.push('\n');
        tokio::fs::write(&self.path, contents).await?;

        Ok(id)
    }

    async fn get_generations(&self, filter: &GenerationFilter) -> Result<Vec<GenerationRecord>> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        // Newest first, like the original gallery; id breaks timestamp ties
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let filtered: Vec<GenerationRecord> = records
            .into_iter()
            .filter(|r| filter.matches(r))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(100))
            .collect();
        Ok(filtered)
    }

    async fn delete_generation(&self, id: i64) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let records = self.read_all().await?;
        let before = records.len();
        let remaining: Vec<GenerationRecord> =
            records.into_iter().filter(|r| r.id != id).collect();
        let deleted = remaining.len() < before;
        if deleted {
            self.write_all(&remaining).await?;
        }
        Ok(deleted)
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<GenerationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn add_generation(&self, new: NewGeneration) -> Result<i64> {
        let mut records = self.records.lock().await;
        let id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        records.push(GenerationRecord {
            id,
            kind: new.kind,
            prompt: new.prompt,
            model: new.model,
            image_path: new.image_path,
            resolution: new.resolution,
            negative_prompt: new.negative_prompt,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_generations(&self, filter: &GenerationFilter) -> Result<Vec<GenerationRecord>> {
        let records = self.records.lock().await;
        let mut matched: Vec<GenerationRecord> =
            records.iter().filter(|r| filter.matches(r)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(100))
            .collect())
    }

    async fn delete_generation(&self, id: i64) -> Result<bool> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: GenerationKind, prompt: &str) -> NewGeneration {
        NewGeneration {
            kind,
            prompt: prompt.to_string(),
            model: "flash".to_string(),
            image_path: PathBuf::from("/tmp/img.png"),
            resolution: Some("2048".to_string()),
            negative_prompt: None,
        }
    }

    #[tokio::test]
    async fn jsonl_store_assigns_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("history.jsonl"));

        let a = store
            .add_generation(sample(GenerationKind::Generate, "a cat"))
            .await
            .unwrap();
        let b = store
            .add_generation(sample(GenerationKind::Edit, "a dog"))
            .await
            .unwrap();
        assert!(b > a);

        let all = store
            .get_generations(&GenerationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn filters_apply_kind_and_prompt_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("history.jsonl"));

        store
            .add_generation(sample(GenerationKind::Generate, "a red cat"))
            .await
            .unwrap();
        store
            .add_generation(sample(GenerationKind::Edit, "a blue dog"))
            .await
            .unwrap();

        let edits = store
            .get_generations(&GenerationFilter {
                kind: Some(GenerationKind::Edit),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].prompt, "a blue dog");

        let cats = store
            .get_generations(&GenerationFilter {
                search: Some("CAT".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(cats.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_exactly_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("history.jsonl"));

        let id = store
            .add_generation(sample(GenerationKind::Generate, "a cat"))
            .await
            .unwrap();
        store
            .add_generation(sample(GenerationKind::Generate, "a dog"))
            .await
            .unwrap();

        assert!(store.delete_generation(id).await.unwrap());
        assert!(!store.delete_generation(id).await.unwrap());

        let all = store
            .get_generations(&GenerationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_paginates_newest_first_like_the_file_store() {
        let store = MemoryStore::new();
        for prompt in ["first", "second", "third"] {
            store
                .add_generation(sample(GenerationKind::Generate, prompt))
                .await
                .unwrap();
        }

        let page = store
            .get_generations(&GenerationFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);

        let rest = store
            .get_generations(&GenerationFilter {
                offset: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].prompt, "first");
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        tokio::fs::write(&path, "not json\n").await.unwrap();

        let store = JsonlStore::new(&path);
        store
            .add_generation(sample(GenerationKind::Generate, "a cat"))
            .await
            .unwrap();
        let all = store
            .get_generations(&GenerationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }
}
