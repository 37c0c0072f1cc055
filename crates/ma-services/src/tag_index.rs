//! # TagIndex
//!
//! Named tags, the parent/child hierarchy between them and their attachment
//! to tracked files. Names resolve through a run-scoped cache so importers
//! tagging thousands of files hit the catalog once per name.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use ma_core::error::{AppError, Result};
use ma_core::models::{Tag, TrackedFile};
use ma_core::traits::TagRepo;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name to tag lookups made during one run. Tags are never renamed or deleted
/// while a run is in progress, so entries never go stale within it.
#[derive(Debug, Default)]
pub struct TagCache {
    tags: DashMap<String, Tag>,
}

impl TagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Tag> {
        self.tags.get(name).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, tag: Tag) {
        self.tags.insert(tag.name.clone(), tag);
    }

}

pub struct TagIndex {
    repo: Arc<dyn TagRepo>,
    cache: TagCache,
}

impl TagIndex {
    pub fn new(repo: Arc<dyn TagRepo>) -> Self {
        Self {
            repo,
            cache: TagCache::new(),
        }
    }

    pub fn cache(&self) -> &TagCache {
        &self.cache
    }

    /// Returns the tag called `name`, creating it on first use.
    pub async fn get_or_create(&self, name: &str) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError("Tag name must not be empty".into()));
        }
        if let Some(tag) = self.cache.get(name) {
            return Ok(tag);
        }

        let tag = match self.repo.find_tag(name).await? {
            Some(tag) => tag,
            None => self.create(name).await?,
        };
        self.cache.insert(tag.clone());
        Ok(tag)
    }

    async fn create(&self, name: &str) -> Result<Tag> {
        let tag = Tag::new(name);
        match self.repo.insert_tag(&tag).await {
            Ok(()) => {
                info!(tag = name, "Created tag");
                Ok(tag)
            }
            // Created concurrently; use the stored row.
            Err(AppError::Conflict(_)) => self
                .repo
                .find_tag(name)
                .await?
                .ok_or_else(|| AppError::Internal(format!("Tag {name} vanished after conflict"))),
            Err(e) => Err(e),
        }
    }

    /// Records `child` under `parent`, refusing any link that would close a
    /// cycle. Adding an existing link again is a no-op.
    pub async fn add_child(&self, parent: &Tag, child: &Tag) -> Result<()> {
        let circular = || AppError::CircularTag {
            parent: parent.name.clone(),
            child: child.name.clone(),
        };

        if parent.id == child.id || self.is_ancestor(child.id, parent.id).await? {
            warn!(parent = %parent.name, child = %child.name, "Refusing circular tag link");
            return Err(circular());
        }

        self.repo.link_child(parent.id, child.id).await?;
        debug!(parent = %parent.name, child = %child.name, "Linked tags");
        Ok(())
    }

    /// Whether `candidate` is reachable by walking parent links up from `tag`.
    pub async fn is_ancestor(&self, candidate: Uuid, tag: Uuid) -> Result<bool> {
        let mut seen = HashSet::from([tag]);
        let mut queue = VecDeque::from([tag]);

        while let Some(current) = queue.pop_front() {
            for parent in self.repo.parents_of(current).await? {
                if parent.id == candidate {
                    return Ok(true);
                }
                if seen.insert(parent.id) {
                    queue.push_back(parent.id);
                }
            }
        }
        Ok(false)
    }

    pub async fn children(&self, tag: &Tag) -> Result<Vec<Tag>> {
        self.repo.children_of(tag.id).await
    }

    pub async fn parents(&self, tag: &Tag) -> Result<Vec<Tag>> {
        self.repo.parents_of(tag.id).await
    }

    /// Tags `file` with `name`, creating the tag if needed.
    pub async fn tag_file(&self, file: &TrackedFile, name: &str) -> Result<Tag> {
        let tag = self.get_or_create(name).await?;
        self.attach(&tag, file).await?;
        Ok(tag)
    }

    pub async fn attach(&self, tag: &Tag, file: &TrackedFile) -> Result<()> {
        self.repo.attach_tag_to_file(tag.id, file.id).await
    }

    pub async fn tags_for_file(&self, file: &TrackedFile) -> Result<Vec<Tag>> {
        self.repo.tags_for_file(file.id).await
    }

    pub async fn files_for_tag(&self, name: &str) -> Result<Vec<TrackedFile>> {
        let name = name.trim();
        let tag = match self.cache.get(name) {
            Some(tag) => tag,
            None => self
                .repo
                .find_tag(name)
                .await?
                .ok_or_else(|| AppError::NotFound("Tag".into(), name.to_string()))?,
        };
        self.repo.files_for_tag(tag.id).await
    }
}
