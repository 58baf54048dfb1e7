//! Engine tests against an in-memory mail store double. The double counts
//! simultaneously open sessions so the concurrency caps can be asserted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mailsift::cache::Cache;
use mailsift::config::EngineConfig;
use mailsift::error::MailError;
use mailsift::message::attachment_id;
use mailsift::store::{MailSession, MailStore};
use mailsift::Engine;

// ── Test double ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct SessionGauge {
    open: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl SessionGauge {
    fn opened(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct FakeStore {
    folders: Arc<HashMap<String, HashMap<u32, Vec<u8>>>>,
    gauge: Arc<SessionGauge>,
    open_delay: Duration,
}

impl FakeStore {
    fn new(folders: Vec<(&str, Vec<(u32, Vec<u8>)>)>) -> Self {
        let folders = folders
            .into_iter()
            .map(|(name, msgs)| (name.to_string(), msgs.into_iter().collect()))
            .collect();
        Self {
            folders: Arc::new(folders),
            gauge: Arc::new(SessionGauge::default()),
            open_delay: Duration::from_millis(10),
        }
    }
}

struct FakeSession {
    messages: HashMap<u32, Vec<u8>>,
    gauge: Arc<SessionGauge>,
}

impl MailStore for FakeStore {
    type Session = FakeSession;

    async fn open(&self, folder: &str) -> Result<FakeSession, MailError> {
        let Some(messages) = self.folders.get(folder) else {
            let mut available: Vec<String> = self.folders.keys().cloned().collect();
            available.sort();
            return Err(MailError::FolderNotFound {
                folder: folder.to_string(),
                available: Some(available.join(",")),
            });
        };
        self.gauge.opened();
        tokio::time::sleep(self.open_delay).await;
        Ok(FakeSession {
            messages: messages.clone(),
            gauge: Arc::clone(&self.gauge),
        })
    }
}

impl MailSession for FakeSession {
    async fn search(&mut self, _query: &str) -> Result<Vec<u32>, MailError> {
        let mut uids: Vec<u32> = self.messages.keys().copied().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>, MailError> {
        Ok(self.messages.get(&uid).cloned())
    }

    async fn close(&mut self) {
        self.gauge.closed();
    }
}

// ── Fixtures ────────────────────────────────────────────────────────────────

fn raw_message(date: &str, attachments: &[&str]) -> Vec<u8> {
    let mut msg = String::new();
    msg.push_str("Return-Path: <billing@supplier.example>\r\n");
    if !date.is_empty() {
        msg.push_str(&format!("Date: {date}\r\n"));
    }
    msg.push_str("Subject: Invoice 1234567890\r\n");
    msg.push_str("MIME-Version: 1.0\r\n");
    msg.push_str("Content-Type: multipart/mixed; boundary=\"sep\"\r\n\r\n");
    msg.push_str("--sep\r\nContent-Type: text/plain\r\n\r\nsee attached\r\n");
    for name in attachments {
        msg.push_str(&format!(
            "--sep\r\nContent-Type: application/pdf; name=\"{name}\"\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\r\npayload\r\n"
        ));
    }
    msg.push_str("--sep--\r\n");
    msg.into_bytes()
}

fn test_config(folders: &[&str]) -> EngineConfig {
    serde_json::from_value(serde_json::json!({
        "host": "mail.test",
        "user": "svc",
        "password": "secret",
        "folders": folders,
        "output_dir": std::env::temp_dir()
            .join(format!("mailsift-test-{}", uuid::Uuid::new_v4())),
    }))
    .expect("test config")
}

async fn engine_with(store: FakeStore, config: &EngineConfig) -> Engine<FakeStore> {
    let cache = Arc::new(Cache::connect(None).await);
    Engine::with_store(Arc::new(store), cache, config)
}

// ── Search scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn criteria_search_finds_single_match_across_two_folders() {
    let store = FakeStore::new(vec![
        (
            "Inbox",
            vec![(101, raw_message("Tue, 03 Jun 2025 10:15:00 +0000", &["invoice.pdf"]))],
        ),
        ("Sent", vec![]),
    ]);
    let config = test_config(&["Inbox", "Sent"]);
    let engine = engine_with(store, &config).await;

    let results = engine
        .fetch_messages(None, Some("1234567890"), None)
        .await;

    assert_eq!(results.len(), 1);
    let found = &results[0];
    assert_eq!(found.uid, 101);
    assert_eq!(found.folder, "Inbox");
    assert_eq!(found.files.len(), 1);
    assert_eq!(found.files[0].name, "invoice.pdf");
    assert!(found.error.is_none());
}

#[tokio::test]
async fn attachmentless_messages_are_excluded() {
    let store = FakeStore::new(vec![(
        "Inbox",
        vec![
            (1, raw_message("Mon, 02 Jun 2025 08:00:00 +0000", &[])),
            (2, raw_message("Tue, 03 Jun 2025 08:00:00 +0000", &["act.xlsx"])),
        ],
    )]);
    let config = test_config(&["Inbox"]);
    let engine = engine_with(store, &config).await;

    let results = engine.fetch_messages(None, Some("1234567890"), None).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].uid, 2);
}

#[tokio::test]
async fn results_are_sorted_newest_first_with_undated_last() {
    let store = FakeStore::new(vec![(
        "Inbox",
        vec![
            (1, raw_message("Mon, 02 Jun 2025 08:00:00 +0000", &["a.pdf"])),
            (2, raw_message("", &["b.pdf"])),
            (3, raw_message("Thu, 05 Jun 2025 08:00:00 +0000", &["c.pdf"])),
        ],
    )]);
    let config = test_config(&["Inbox"]);
    let engine = engine_with(store, &config).await;

    let results = engine.fetch_messages(None, Some("1234567890"), None).await;
    let order: Vec<u32> = results.iter().map(|r| r.uid).collect();
    assert_eq!(order, vec![3, 1, 2]);
}

#[tokio::test]
async fn missing_folder_yields_placeholder_naming_available_folders() {
    let store = FakeStore::new(vec![
        (
            "Inbox",
            vec![(5, raw_message("Tue, 03 Jun 2025 10:00:00 +0000", &["a.pdf"]))],
        ),
        ("Sent", vec![]),
    ]);
    let config = test_config(&["Inbox", "Sent", "Archive"]);
    let engine = engine_with(store, &config).await;

    let results = engine.fetch_messages(None, Some("1234567890"), None).await;

    // The good folder still produced its match
    assert!(results.iter().any(|r| r.uid == 5 && r.error.is_none()));
    // The bad folder produced one trailing placeholder with diagnostics
    let placeholder = results.last().expect("placeholder expected");
    let text = placeholder.error.as_deref().expect("error text");
    assert!(text.contains("Archive"));
    assert!(text.contains("Inbox,Sent"));
}

#[tokio::test]
async fn outer_concurrency_bound_caps_open_sessions() {
    let folders: Vec<(&str, Vec<(u32, Vec<u8>)>)> = vec![
        ("F1", vec![]),
        ("F2", vec![]),
        ("F3", vec![]),
        ("F4", vec![]),
        ("F5", vec![]),
        ("F6", vec![]),
    ];
    let store = FakeStore::new(folders);
    let gauge = Arc::clone(&store.gauge);

    let mut config = test_config(&["F1", "F2", "F3", "F4", "F5", "F6"]);
    config.folder_workers = 2;
    let engine = engine_with(store, &config).await;

    let results = engine.fetch_messages(None, Some("1234567890"), None).await;
    assert!(results.is_empty());
    assert_eq!(gauge.total.load(Ordering::SeqCst), 6);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn folder_matches_beyond_the_cap_are_dropped() {
    let msgs: Vec<(u32, Vec<u8>)> = (1..=8)
        .map(|uid| {
            (
                uid,
                raw_message("Tue, 03 Jun 2025 10:00:00 +0000", &["invoice.pdf"]),
            )
        })
        .collect();
    let store = FakeStore::new(vec![("Inbox", msgs)]);
    let gauge = Arc::clone(&store.gauge);

    let mut config = test_config(&["Inbox"]);
    config.per_folder_limit = 3;
    let engine = engine_with(store, &config).await;

    let results = engine.fetch_messages(None, Some("1234567890"), None).await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.error.is_none()));
    // one search session plus one fetch per processed uid
    assert_eq!(gauge.total.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn inner_concurrency_bound_caps_fetch_sessions() {
    let msgs: Vec<(u32, Vec<u8>)> = (1..=6)
        .map(|uid| {
            (
                uid,
                raw_message("Tue, 03 Jun 2025 10:00:00 +0000", &["invoice.pdf"]),
            )
        })
        .collect();
    let store = FakeStore::new(vec![("Inbox", msgs)]);
    let gauge = Arc::clone(&store.gauge);

    let mut config = test_config(&["Inbox"]);
    config.folder_workers = 1;
    config.message_workers = 2;
    let engine = engine_with(store, &config).await;

    let results = engine.fetch_messages(None, Some("1234567890"), None).await;
    assert_eq!(results.len(), 6);
    // the search session closes before the fetch fan-out begins, so the
    // message worker cap bounds the whole run
    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(gauge.total.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn repeated_search_is_served_from_cache() {
    let store = FakeStore::new(vec![(
        "Inbox",
        vec![(9, raw_message("Tue, 03 Jun 2025 10:00:00 +0000", &["a.pdf"]))],
    )]);
    let gauge = Arc::clone(&store.gauge);
    let config = test_config(&["Inbox"]);
    let engine = engine_with(store, &config).await;

    let first = engine.fetch_messages(None, Some("1234567890"), None).await;
    let opens_after_first = gauge.total.load(Ordering::SeqCst);
    let second = engine.fetch_messages(None, Some("1234567890"), None).await;

    assert_eq!(first.len(), second.len());
    assert_eq!(gauge.total.load(Ordering::SeqCst), opens_after_first);
}

#[tokio::test]
async fn uid_lookup_returns_matches_from_every_folder() {
    let msg = raw_message("Tue, 03 Jun 2025 10:00:00 +0000", &["a.pdf"]);
    let store = FakeStore::new(vec![
        ("Inbox", vec![(7, msg.clone())]),
        ("Sent", vec![(7, msg)]),
    ]);
    let config = test_config(&["Inbox", "Sent"]);
    let engine = engine_with(store, &config).await;

    let results = engine.fetch_messages(Some(7), None, None).await;
    assert_eq!(results.len(), 2);
    let mut folders: Vec<&str> = results.iter().map(|r| r.folder.as_str()).collect();
    folders.sort_unstable();
    assert_eq!(folders, vec!["Inbox", "Sent"]);
}

#[tokio::test]
async fn search_without_criteria_returns_error_placeholder() {
    let store = FakeStore::new(vec![("Inbox", vec![])]);
    let config = test_config(&["Inbox"]);
    let engine = engine_with(store, &config).await;

    let results = engine.fetch_messages(None, None, None).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].error.is_some());
}

// ── Attachment extraction scenarios ─────────────────────────────────────────

#[tokio::test]
async fn select_all_attachments_returns_archive_path() {
    let store = FakeStore::new(vec![(
        "Inbox",
        vec![(
            101,
            raw_message("Tue, 03 Jun 2025 10:00:00 +0000", &["invoice.pdf", "act.xlsx"]),
        )],
    )]);
    let config = test_config(&["Inbox"]);
    let engine = engine_with(store, &config).await;

    let path = engine.fetch_attachments(101, "0").await.expect("archive path");
    assert_eq!(path.file_name().unwrap(), "attachments.zip");
    assert!(path.exists());

    let scratch: PathBuf = path.parent().unwrap().to_path_buf();
    assert!(scratch.join("invoice.pdf").exists());
    assert!(scratch.join("act.xlsx").exists());
}

#[tokio::test]
async fn select_one_attachment_returns_its_file_path() {
    let store = FakeStore::new(vec![(
        "Inbox",
        vec![(
            101,
            raw_message("Tue, 03 Jun 2025 10:00:00 +0000", &["invoice.pdf", "act.xlsx"]),
        )],
    )]);
    let config = test_config(&["Inbox"]);
    let engine = engine_with(store, &config).await;

    let selection = attachment_id("invoice.pdf");
    let path = engine.fetch_attachments(101, &selection).await.expect("file path");
    assert_eq!(path.file_name().unwrap(), "invoice.pdf");
    assert!(path.exists());
    assert!(!path.parent().unwrap().join("attachments.zip").exists());
}

#[tokio::test]
async fn every_folder_probed_for_attachments_closes_its_session() {
    // The uid exists in both folders; whichever answers first wins, but the
    // losing session must still be closed.
    let msg = raw_message("Tue, 03 Jun 2025 10:00:00 +0000", &["invoice.pdf"]);
    let store = FakeStore::new(vec![
        ("Inbox", vec![(101, msg.clone())]),
        ("Sent", vec![(101, msg)]),
    ]);
    let gauge = Arc::clone(&store.gauge);
    let config = test_config(&["Inbox", "Sent"]);
    let engine = engine_with(store, &config).await;

    let path = engine.fetch_attachments(101, "0").await;
    assert!(path.is_some());
    assert_eq!(gauge.total.load(Ordering::SeqCst), 2);
    assert_eq!(gauge.open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_message_or_selection_yields_none() {
    let store = FakeStore::new(vec![(
        "Inbox",
        vec![(101, raw_message("Tue, 03 Jun 2025 10:00:00 +0000", &["invoice.pdf"]))],
    )]);
    let config = test_config(&["Inbox"]);
    let engine = engine_with(store, &config).await;

    assert!(engine.fetch_attachments(999, "0").await.is_none());
    assert!(engine.fetch_attachments(101, "ffffffff").await.is_none());
}
