//! mailsift — concurrent IMAP mailbox search and attachment retrieval.
//!
//! The engine locates messages matching business-identifier criteria across
//! multiple folders, decodes their MIME structure, and materializes selected
//! attachments to disk. HTTP routing, authentication and configuration
//! loading live in the embedding service; this crate exposes the engine
//! facade, the pure [`pagination::paginate`] helper and a [`logging::init`]
//! hook.

pub mod attachments;
pub mod cache;
pub mod config;
pub mod error;
pub mod imap;
pub mod logging;
pub mod message;
pub mod pagination;
pub mod search;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::attachments::AttachmentExtractor;
use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::imap::ImapStore;
use crate::message::MessageResult;
use crate::search::{SearchCriteria, SearchExecutor};
use crate::store::MailStore;

pub use crate::error::MailError;
pub use crate::pagination::{paginate, PageParams, PageWindow};

/// Engine facade: explicitly constructed, no global state. Holds the mail
/// store, the cache and the configured limits.
pub struct Engine<S: MailStore> {
    executor: SearchExecutor<S>,
    extractor: AttachmentExtractor<S>,
    folders: Vec<String>,
    default_page_size: usize,
}

impl Engine<ImapStore> {
    /// Wire the engine against a real IMAP store. Probes the remote cache
    /// once; when it is down the engine runs on the local cache.
    pub async fn new(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(Cache::connect(config.cache_url.as_deref()).await);
        let store = Arc::new(ImapStore::new(Arc::clone(&config)));
        Self::with_store(store, cache, &config)
    }
}

impl<S: MailStore> Engine<S> {
    /// Assemble the engine from parts. Tests inject an in-memory store here.
    pub fn with_store(store: Arc<S>, cache: Arc<Cache>, config: &EngineConfig) -> Self {
        let executor = SearchExecutor::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.folder_workers,
            config.message_workers,
            config.per_folder_limit,
            Duration::from_secs(config.cache_ttl_secs),
        );
        let extractor = AttachmentExtractor::new(
            store,
            config.folder_workers,
            config.output_dir.clone(),
        );
        Self {
            executor,
            extractor,
            folders: config.folders.clone(),
            default_page_size: config.default_page_size,
        }
    }

    /// Ordered message list for the boundary: either an exact-UID lookup or
    /// a criteria search over the two business identifiers (joined with a
    /// comma when both are present). Never fails — trouble comes back as
    /// error-placeholder results.
    pub async fn fetch_messages(
        &self,
        id: Option<u32>,
        business_id: Option<&str>,
        registration_id: Option<&str>,
    ) -> Vec<MessageResult> {
        if let Some(uid) = id {
            return self.executor.fetch_by_uid(uid, &self.folders).await;
        }

        let criteria_text: String = [business_id, registration_id]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        if criteria_text.is_empty() {
            error!("fetch_messages called without identifier or criteria");
            return vec![MessageResult::from_error("no search criteria given")];
        }

        let criteria = SearchCriteria::new(&criteria_text, self.folders.clone());
        self.executor.fetch_messages(&criteria).await
    }

    /// Materialized attachment path for the boundary, `None` when nothing
    /// matched. The caller serves the file and removes its scratch directory.
    pub async fn fetch_attachments(&self, id: u32, selection_token: &str) -> Option<PathBuf> {
        match self
            .extractor
            .fetch_attachments(id, &self.folders, selection_token)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                error!("attachment extraction for uid {id} failed: {e}");
                None
            }
        }
    }

    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }
}
