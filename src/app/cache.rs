use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::{
    domain::{
        identity::{note_key, note_prefix, ItemIdentity, ItemKind},
        label::{Label, LabelScope},
        models::{IssueModel, Note, NoteRecord, RequestModel},
        platform::Platform,
    },
    ports::BlobStorePort,
};

#[derive(Debug, Default)]
pub struct CacheWriteStats {
    failures: AtomicUsize,
}

impl CacheWriteStats {
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredItem<M> {
    model: M,
    label: String,
}

/// Cached models and labels keyed by `path#!N` / `path##N`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedItems<M> {
    pub models: BTreeMap<String, M>,
    pub labels: BTreeMap<String, Label>,
}

impl<M> Default for CachedItems<M> {
    fn default() -> Self {
        Self {
            models: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }
}

pub struct ActivityCache<S> {
    store: S,
    platform: Platform,
    stats: CacheWriteStats,
}

impl<S: BlobStorePort> ActivityCache<S> {
    pub fn new(store: S, platform: Platform) -> Self {
        Self {
            store,
            platform,
            stats: CacheWriteStats::default(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn bucket(&self, kind: &str) -> String {
        format!("{}_{kind}", self.platform.as_str())
    }

    fn item_bucket(&self, kind: ItemKind) -> String {
        match kind {
            ItemKind::Request => self.bucket("requests"),
            ItemKind::Issue => self.bucket("issues"),
        }
    }

    pub fn upsert_request(
        &self,
        identity: &ItemIdentity,
        model: &RequestModel,
        label: Label,
    ) -> Result<()> {
        self.put_item(identity, model, label)
    }

    pub fn upsert_issue(&self, identity: &ItemIdentity, model: &IssueModel, label: Label) -> Result<()> {
        self.put_item(identity, model, label)
    }

    fn put_item<M: Serialize>(&self, identity: &ItemIdentity, model: &M, label: Label) -> Result<()> {
        let stored = StoredItem {
            model,
            label: label.as_str().to_string(),
        };
        let bytes = serde_json::to_vec(&stored)
            .with_context(|| format!("failed to encode cache record for {identity}"))?;
        self.store
            .put(&self.item_bucket(identity.kind), &identity.cache_key(), &bytes)
            .with_context(|| format!("failed to write cache record for {identity}"))
    }

    /// The update time of the cached copy, if the item was cached before.
    pub fn cached_updated_at(&self, identity: &ItemIdentity) -> Result<Option<DateTime<Utc>>> {
        #[derive(Deserialize)]
        struct UpdatedOnly {
            updated_at: Option<DateTime<Utc>>,
        }
        #[derive(Deserialize)]
        struct Stored {
            model: UpdatedOnly,
        }

        let Some(bytes) = self
            .store
            .get(&self.item_bucket(identity.kind), &identity.cache_key())?
        else {
            return Ok(None);
        };
        let stored: Stored = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to decode cache record for {identity}"))?;
        Ok(stored.model.updated_at)
    }

    pub fn load_requests(&self) -> Result<CachedItems<RequestModel>> {
        self.load_items(ItemKind::Request, LabelScope::Request)
    }

    pub fn load_issues(&self) -> Result<CachedItems<IssueModel>> {
        self.load_items(ItemKind::Issue, LabelScope::Issue)
    }

    fn load_items<M: DeserializeOwned>(
        &self,
        kind: ItemKind,
        scope: LabelScope,
    ) -> Result<CachedItems<M>> {
        let bucket = self.item_bucket(kind);
        let mut items = CachedItems::default();
        for (key, bytes) in self.store.scan_prefix(&bucket, "")? {
            let stored: StoredItem<M> = serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to decode cache record {bucket}/{key}"))?;
            let label = scope
                .parse(&stored.label)
                .with_context(|| format!("invalid label in cache record {bucket}/{key}"))?;
            items.labels.insert(key.clone(), label);
            items.models.insert(key, stored.model);
        }
        Ok(items)
    }

    pub fn append_note(&self, record: &NoteRecord) -> Result<()> {
        let key = note_key(
            &record.project_path,
            record.item_kind,
            record.item_number,
            record.note_id,
        );
        let bytes = serde_json::to_vec(record)
            .with_context(|| format!("failed to encode note {key}"))?;
        self.store
            .put(&self.bucket("notes"), &key, &bytes)
            .with_context(|| format!("failed to write note {key}"))
    }

    /// Notes of one item, oldest note id first.
    pub fn notes(&self, project: &str, kind: ItemKind, number: u64) -> Result<Vec<Note>> {
        let bucket = self.bucket("notes");
        let prefix = note_prefix(project, kind, number);
        let mut records = self
            .store
            .scan_prefix(&bucket, &prefix)?
            .into_iter()
            .map(|(key, bytes)| {
                serde_json::from_slice::<NoteRecord>(&bytes)
                    .with_context(|| format!("failed to decode note {bucket}/{key}"))
            })
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|record| record.note_id);
        Ok(records.into_iter().map(NoteRecord::into_note).collect())
    }

    pub fn has_data(&self) -> Result<bool> {
        for kind in [ItemKind::Request, ItemKind::Issue] {
            if !self.store.scan_prefix(&self.item_bucket(kind), "")?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Counts and logs a failed best-effort write; never fails the caller.
    pub fn record_write_failure(&self, what: &str, err: &anyhow::Error) {
        self.stats.record_failure();
        warn!(what, error = %format!("{err:#}"), "cache write failed");
    }

    pub fn write_failures(&self) -> usize {
        self.stats.failures()
    }
}
