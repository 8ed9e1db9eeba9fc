//! Passage storage and the retrieval capability trait.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ranking::rank_passages;

const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;
const DEFAULT_MIN_SIMILARITY: f32 = 0.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `KnowledgePassage` used across Coral components.
pub struct KnowledgePassage {
    pub id: String,
    pub tenant_id: String,
    pub document_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `KnowledgeMatch` used across Coral components.
pub struct KnowledgeMatch {
    pub passage_id: String,
    pub document_id: String,
    pub text: String,
    pub score: f32,
}

#[async_trait]
/// Trait contract for `KnowledgeSearch` behavior.
///
/// `document_scope` limits retrieval to an agent's documents; an empty scope
/// searches everything the tenant owns. Failures are surfaced as errors so
/// the caller can degrade to zero passages.
pub trait KnowledgeSearch: Send + Sync {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        k: usize,
        document_scope: &[String],
    ) -> Result<Vec<KnowledgeMatch>>;
}

/// JSONL-backed passage store with deterministic local ranking.
#[derive(Debug)]
pub struct FileKnowledgeStore {
    path: PathBuf,
    dimensions: usize,
    min_similarity: f32,
    passages: Mutex<Vec<KnowledgePassage>>,
}

impl FileKnowledgeStore {
    /// Opens the store at `path`, loading any existing passages.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let passages = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| {
                    serde_json::from_str::<KnowledgePassage>(line)
                        .with_context(|| format!("invalid passage line in {}", path.display()))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            passages: Mutex::new(passages),
        })
    }

    /// Appends a passage to the store and its backing file.
    pub fn insert(&self, passage: KnowledgePassage) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let encoded = serde_json::to_string(&passage).context("failed to encode passage")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(encoded.as_bytes())
            .with_context(|| format!("failed to append {}", self.path.display()))?;
        file.write_all(b"\n")
            .with_context(|| format!("failed to append newline {}", self.path.display()))?;

        self.lock().push(passage);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<KnowledgePassage>> {
        self.passages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KnowledgeSearch for FileKnowledgeStore {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        k: usize,
        document_scope: &[String],
    ) -> Result<Vec<KnowledgeMatch>> {
        let candidates = self
            .lock()
            .iter()
            .filter(|passage| passage.tenant_id == tenant_id)
            .filter(|passage| {
                document_scope.is_empty()
                    || document_scope
                        .iter()
                        .any(|document_id| document_id == &passage.document_id)
            })
            .cloned()
            .collect::<Vec<_>>();

        Ok(rank_passages(
            query,
            &candidates,
            k,
            self.dimensions,
            self.min_similarity,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{FileKnowledgeStore, KnowledgePassage, KnowledgeSearch};

    fn passage(id: &str, tenant: &str, document: &str, text: &str) -> KnowledgePassage {
        KnowledgePassage {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            document_id: document.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn functional_search_is_tenant_and_scope_filtered() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let store = FileKnowledgeStore::open(tempdir.path().join("passages.jsonl"))
            .expect("open");
        store
            .insert(passage("p-1", "tenant-1", "doc-1", "refund policy and returns"))
            .expect("insert");
        store
            .insert(passage("p-2", "tenant-1", "doc-2", "refund policy appendix"))
            .expect("insert");
        store
            .insert(passage("p-3", "tenant-2", "doc-1", "refund policy for tenant two"))
            .expect("insert");

        let scoped = store
            .search("tenant-1", "refund policy", 5, &["doc-1".to_string()])
            .await
            .expect("search");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].passage_id, "p-1");

        let unscoped = store
            .search("tenant-1", "refund policy", 5, &[])
            .await
            .expect("search");
        assert_eq!(unscoped.len(), 2);
    }

    #[tokio::test]
    async fn integration_store_reloads_passages_from_disk() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("passages.jsonl");
        {
            let store = FileKnowledgeStore::open(&path).expect("open");
            store
                .insert(passage("p-1", "tenant-1", "doc-1", "shipping times"))
                .expect("insert");
        }

        let reopened = FileKnowledgeStore::open(&path).expect("reopen");
        let matches = reopened
            .search("tenant-1", "shipping", 3, &[])
            .await
            .expect("search");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "shipping times");
    }
}
