//! Bounded two-level fan-out search across folders and messages.
//!
//! Outer level: folders searched concurrently under `folder_workers`. Inner
//! level: messages fetched and decoded concurrently under `message_workers`
//! per folder. Both caps are hard — a permit is acquired before any session
//! opens — so at most `folder_workers * message_workers` sessions exist at
//! once during the fetch phase.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cache::{Cache, CacheKey};
use crate::error::MailError;
use crate::message::{decode_message, sort_results, MessageResult};
use crate::store::{MailSession, MailStore};

/// Immutable search input: OR-combined match terms, a one-year lower date
/// bound fixed at construction, and the target folder set.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    terms: Vec<String>,
    since: chrono::NaiveDate,
    folders: Vec<String>,
}

impl SearchCriteria {
    pub fn new(criteria: &str, folders: Vec<String>) -> Self {
        let terms = criteria
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            terms,
            since: (Utc::now() - chrono::Duration::days(365)).date_naive(),
            folders,
        }
    }

    pub fn folders(&self) -> &[String] {
        &self.folders
    }

    /// Canonical comma-joined term list, used for cache keys.
    pub fn raw(&self) -> String {
        self.terms.join(",")
    }

    /// Server-side query: `SENTSINCE <date>` plus a `TEXT` clause per term,
    /// OR-combined when more than one term is present.
    pub fn query(&self) -> String {
        let mut args = vec![format!("SENTSINCE {}", self.since.format("%d-%b-%Y"))];
        if self.terms.len() > 1 {
            args.push("OR".to_string());
        }
        for term in &self.terms {
            args.push(format!("TEXT {term}"));
        }
        args.join(" ")
    }
}

pub struct SearchExecutor<S> {
    store: Arc<S>,
    cache: Arc<Cache>,
    folder_workers: usize,
    message_workers: usize,
    per_folder_limit: usize,
    cache_ttl: Duration,
}

impl<S> Clone for SearchExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            folder_workers: self.folder_workers,
            message_workers: self.message_workers,
            per_folder_limit: self.per_folder_limit,
            cache_ttl: self.cache_ttl,
        }
    }
}

impl<S: MailStore> SearchExecutor<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<Cache>,
        folder_workers: usize,
        message_workers: usize,
        per_folder_limit: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            folder_workers,
            message_workers,
            per_folder_limit,
            cache_ttl,
        }
    }

    /// Multi-folder criteria search. Always returns a list: matches sorted
    /// newest-first (undated last), then any error placeholders.
    pub async fn fetch_messages(&self, criteria: &SearchCriteria) -> Vec<MessageResult> {
        let raw = criteria.raw();
        let key = CacheKey::Search {
            criteria: &raw,
            folders: criteria.folders(),
        };
        let outcome = self
            .cache
            .get_or_compute(key, self.cache_ttl, || async {
                Ok(self.run_search(criteria).await)
            })
            .await;
        match outcome {
            Ok(results) => results,
            Err(e) => vec![MessageResult::from_error(e.to_string())],
        }
    }

    async fn run_search(&self, criteria: &SearchCriteria) -> Vec<MessageResult> {
        let gate = Arc::new(Semaphore::new(self.folder_workers));
        let mut set: JoinSet<(Vec<MessageResult>, Vec<MessageResult>)> = JoinSet::new();

        for folder in criteria.folders().to_vec() {
            let gate = Arc::clone(&gate);
            let this = self.clone();
            let query = criteria.query();
            let raw = criteria.raw();
            set.spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                this.process_folder(&folder, &query, &raw).await
            });
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((ok, err)) => {
                    results.extend(ok);
                    errors.extend(err);
                }
                Err(e) => errors.push(MessageResult::from_error(format!("folder task failed: {e}"))),
            }
        }

        sort_results(&mut results);
        results.extend(errors);
        results
    }

    /// Search one folder and fan out over its matches. Returns successful
    /// results and error placeholders separately so the caller can sort the
    /// former and append the latter.
    async fn process_folder(
        &self,
        folder: &str,
        query: &str,
        criteria: &str,
    ) -> (Vec<MessageResult>, Vec<MessageResult>) {
        let uids = match self.search_folder(folder, query).await {
            Ok(uids) => uids,
            Err(e) => {
                warn!("search in {folder} failed: {e}");
                return (Vec::new(), vec![MessageResult::from_error(e.to_string())]);
            }
        };

        let total = uids.len();
        let uids: Vec<u32> = uids.into_iter().take(self.per_folder_limit).collect();
        if uids.len() < total {
            // Resource-protection cap, not a failure
            info!(
                "folder {folder}: {total} matches, processing first {}",
                uids.len()
            );
        }

        let gate = Arc::new(Semaphore::new(self.message_workers));
        let mut set: JoinSet<Result<Option<MessageResult>, MailError>> = JoinSet::new();
        for uid in uids {
            let gate = Arc::clone(&gate);
            let this = self.clone();
            let folder = folder.to_string();
            let criteria = criteria.to_string();
            set.spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                this.message_data(uid, &folder, &criteria).await
            });
        }

        let mut ok = Vec::new();
        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(Some(result))) => ok.push(result),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => errors.push(MessageResult::from_error(e.to_string())),
                Err(e) => errors.push(MessageResult::from_error(format!("fetch task failed: {e}"))),
            }
        }
        (ok, errors)
    }

    async fn search_folder(&self, folder: &str, query: &str) -> Result<Vec<u32>, MailError> {
        let mut session = self.store.open(folder).await?;
        let outcome = session.search(query).await;
        session.close().await;
        outcome
    }

    async fn fetch_raw(&self, uid: u32, folder: &str) -> Result<Option<Vec<u8>>, MailError> {
        let mut session = self.store.open(folder).await?;
        let outcome = session.fetch_raw(uid).await;
        session.close().await;
        outcome
    }

    /// Fetch and decode one message, memoized. `None` when the message does
    /// not exist in `folder` or carries no attachments.
    pub(crate) async fn message_data(
        &self,
        uid: u32,
        folder: &str,
        criteria: &str,
    ) -> Result<Option<MessageResult>, MailError> {
        let key = CacheKey::Message {
            uid,
            folder,
            criteria,
        };
        self.cache
            .get_or_compute(key, self.cache_ttl, || async {
                let Some(raw) = self.fetch_raw(uid, folder).await? else {
                    return Ok(None);
                };
                match decode_message(&raw, uid, folder) {
                    Ok(msg) if msg.has_attachments() => Ok(Some(msg)),
                    Ok(_) => Ok(None),
                    Err(e) => Err(MailError::DataNotFound(format!(
                        "decode of uid {uid} in {folder} failed: {e}"
                    ))),
                }
            })
            .await
    }

    /// Single-message lookup: probe every folder for `uid` concurrently and
    /// return all matches (the same UID may exist in several folders).
    pub async fn fetch_by_uid(&self, uid: u32, folders: &[String]) -> Vec<MessageResult> {
        let gate = Arc::new(Semaphore::new(self.folder_workers));
        let mut set: JoinSet<Result<Option<MessageResult>, MailError>> = JoinSet::new();

        for folder in folders.to_vec() {
            let gate = Arc::clone(&gate);
            let this = self.clone();
            set.spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                this.message_data(uid, &folder, "").await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(Some(result))) => results.push(result),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!("lookup of uid {uid} failed in one folder: {e}"),
                Err(e) => warn!("lookup task for uid {uid} failed: {e}"),
            }
        }
        results
    }
}
