//! Markdown workspace memory: `<root>/<agent_id>/*.md`.
//!
//! Every file becomes one `### <file>` section of the workspace block. A
//! SHA-256 per file lets callers skip re-sending content that has not
//! changed since the last turn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use gatehouse_core::{MemoryContext, MemoryStore};

/// File that agent-authored notes are appended to.
pub const MEMORY_NOTES_FILE: &str = "MEMORY.md";

pub struct FileMemoryStore {
    root: PathBuf,
}

impl FileMemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn agent_dir(&self, agent_id: &str) -> Result<PathBuf> {
        if agent_id.is_empty()
            || agent_id.contains(['/', '\\'])
            || agent_id == "."
            || agent_id == ".."
        {
            bail!("invalid agent id for memory directory: {agent_id:?}");
        }
        Ok(self.root.join(agent_id))
    }

    /// Markdown files for an agent, sorted by file name.
    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e).with_context(|| format!("reading {}", dir.display())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_md = path.extension().is_some_and(|ext| ext == "md");
            if is_md && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Append a dated bullet to the agent's notes file, creating it if needed.
    pub async fn append_note(&self, agent_id: &str, note: &str) -> Result<PathBuf> {
        let note = note.trim();
        if note.is_empty() {
            bail!("memory note is empty");
        }
        let dir = self.agent_dir(agent_id)?;
        fs::create_dir_all(&dir).await?;

        let path = dir.join(MEMORY_NOTES_FILE);
        let line = format!(
            "- [{}] {}\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M"),
            note.replace('\n', " ")
        );
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        info!(agent_id, file = %path.display(), "Memory note appended");
        Ok(path)
    }
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn build_context(
        &self,
        agent_id: &str,
        last_hashes: &HashMap<String, String>,
    ) -> Result<MemoryContext> {
        let dir = self.agent_dir(agent_id)?;
        let mut sections = Vec::new();
        let mut hashes = HashMap::new();

        for path in self.list_files(&dir).await? {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let content = content.trim();
            if content.is_empty() {
                continue;
            }
            hashes.insert(name.clone(), content_hash(content));
            sections.push(format!("### {name}\n{content}"));
        }

        let changed = &hashes != last_hashes;
        debug!(agent_id, files = hashes.len(), changed, "Workspace memory loaded");

        Ok(MemoryContext {
            text: sections.join("\n\n"),
            hashes,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::new(dir.path());
        let ctx = store.build_context("nobody", &HashMap::new()).await.unwrap();
        assert!(ctx.text.is_empty());
        assert!(ctx.hashes.is_empty());
        assert!(!ctx.changed);
    }

    #[tokio::test]
    async fn test_sections_sorted_and_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let agent_dir = dir.path().join("main");
        std::fs::create_dir_all(&agent_dir).unwrap();
        std::fs::write(agent_dir.join("b.md"), "second").unwrap();
        std::fs::write(agent_dir.join("a.md"), "first\n").unwrap();
        std::fs::write(agent_dir.join("skip.txt"), "ignored").unwrap();

        let store = FileMemoryStore::new(dir.path());
        let ctx = store.build_context("main", &HashMap::new()).await.unwrap();
        assert_eq!(ctx.text, "### a.md\nfirst\n\n### b.md\nsecond");
        assert_eq!(ctx.hashes.len(), 2);
        assert!(ctx.changed);

        let again = store.build_context("main", &ctx.hashes).await.unwrap();
        assert!(!again.changed);

        std::fs::write(agent_dir.join("b.md"), "edited").unwrap();
        let edited = store.build_context("main", &ctx.hashes).await.unwrap();
        assert!(edited.changed);
        assert_ne!(edited.hashes["b.md"], ctx.hashes["b.md"]);
        assert_eq!(edited.hashes["a.md"], ctx.hashes["a.md"]);
    }

    #[tokio::test]
    async fn test_append_note() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemoryStore::new(dir.path());
        store.append_note("main", "likes tea").await.unwrap();
        store.append_note("main", "lives\nin Oslo").await.unwrap();

        let ctx = store.build_context("main", &HashMap::new()).await.unwrap();
        assert!(ctx.text.starts_with("### MEMORY.md\n- ["));
        assert!(ctx.text.contains("likes tea"));
        assert!(ctx.text.contains("lives in Oslo"));
        assert!(store.append_note("main", "  ").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_path_like_agent_ids() {
        let store = FileMemoryStore::new("/tmp");
        assert!(store.build_context("../etc", &HashMap::new()).await.is_err());
        assert!(store.append_note("a/b", "x").await.is_err());
    }
}
