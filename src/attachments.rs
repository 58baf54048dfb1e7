//! Attachment materialization: probe folders for a message, write the
//! selected attachments into a fresh scratch directory, bundle when more
//! than one file is selected.
//!
//! The scratch directory is a deliberate side effect: the boundary serves
//! the returned path and deletes the directory tree afterwards. Nothing is
//! deleted here.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use mailparse::{DispositionType, ParsedMail};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::MailError;
use crate::message::{attachment_filename, attachment_id};
use crate::store::{MailSession, MailStore};

/// Caller's choice of attachments: everything, or a set of descriptor ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Ids(HashSet<String>),
}

impl Selection {
    /// `""` and `"0"` mean "all attachments"; anything else is a
    /// comma-separated set of descriptor identifiers.
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "" | "0" => Selection::All,
            token => Selection::Ids(
                token
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }

    fn matches(&self, filename: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Ids(ids) => ids.contains(&attachment_id(filename)),
        }
    }
}

pub struct AttachmentExtractor<S> {
    store: Arc<S>,
    folder_workers: usize,
    output_dir: PathBuf,
}

impl<S: MailStore> AttachmentExtractor<S> {
    pub fn new(store: Arc<S>, folder_workers: usize, output_dir: PathBuf) -> Self {
        Self {
            store,
            folder_workers,
            output_dir,
        }
    }

    /// Locate `uid` across `folders` (first folder to answer wins), write the
    /// selected attachments and return the path to serve: the single file, or
    /// a zip archive when several were selected. `None` when the message was
    /// not found or the selection matched nothing.
    pub async fn fetch_attachments(
        &self,
        uid: u32,
        folders: &[String],
        selection_token: &str,
    ) -> Result<Option<PathBuf>, MailError> {
        let Some(raw) = self.find_message(uid, folders).await else {
            return Ok(None);
        };
        let selection = Selection::parse(selection_token);
        self.materialize(&raw, &selection)
    }

    /// Probe every candidate folder concurrently and take the first raw
    /// message found. A UID existing in more than one folder resolves to
    /// whichever session answered first, an accepted race. Every probe runs
    /// to completion so each one closes its own session.
    async fn find_message(&self, uid: u32, folders: &[String]) -> Option<Vec<u8>> {
        let gate = Arc::new(Semaphore::new(self.folder_workers));
        let mut set: JoinSet<Option<Vec<u8>>> = JoinSet::new();

        for folder in folders.to_vec() {
            let gate = Arc::clone(&gate);
            let store = Arc::clone(&self.store);
            set.spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                let mut session = match store.open(&folder).await {
                    Ok(session) => session,
                    Err(e) => {
                        warn!("probe of {folder} for uid {uid} failed: {e}");
                        return None;
                    }
                };
                let outcome = session.fetch_raw(uid).await;
                session.close().await;
                match outcome {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("fetch of uid {uid} from {folder} failed: {e}");
                        None
                    }
                }
            });
        }

        let mut found = None;
        while let Some(joined) = set.join_next().await {
            if let Ok(Some(raw)) = joined {
                found.get_or_insert(raw);
            }
        }
        found
    }

    /// Write the selected attachment parts into a fresh scratch directory.
    /// Duplicate filenames within one message are written once.
    fn materialize(&self, raw: &[u8], selection: &Selection) -> Result<Option<PathBuf>, MailError> {
        let parsed = mailparse::parse_mail(raw)
            .map_err(|e| MailError::DataNotFound(format!("message does not parse: {e}")))?;

        let mut parts = Vec::new();
        collect_attachment_parts(&parsed, &mut parts);

        let scratch = self.scratch_dir();
        let mut written: Vec<String> = Vec::new();

        for (filename, contents) in parts {
            if written.iter().any(|w| w == &filename) || !selection.matches(&filename) {
                continue;
            }
            if written.is_empty() {
                fs::create_dir_all(&scratch)?;
            }
            fs::write(scratch.join(sanitize_filename(&filename)), &contents)?;
            written.push(filename);
        }

        match written.len() {
            0 => Ok(None),
            1 => Ok(Some(scratch.join(sanitize_filename(&written[0])))),
            _ => {
                info!("bundling {} attachments into archive", written.len());
                make_archive(&scratch, &written).map(Some)
            }
        }
    }

    fn scratch_dir(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}-{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            Uuid::new_v4()
        ))
    }
}

fn collect_attachment_parts(part: &ParsedMail, out: &mut Vec<(String, Vec<u8>)>) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_attachment_parts(sub, out);
        }
        return;
    }
    if part.get_content_disposition().disposition != DispositionType::Attachment {
        return;
    }
    let Some(filename) = attachment_filename(part) else {
        return;
    };
    match part.get_body_raw() {
        Ok(contents) => out.push((filename, contents)),
        Err(e) => warn!("undecodable attachment part {filename:?}: {e}"),
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Zip every written file into `attachments.zip` next to them.
fn make_archive(dir: &Path, files: &[String]) -> Result<PathBuf, MailError> {
    use zip::write::SimpleFileOptions;

    let archive_path = dir.join("attachments.zip");
    let file = fs::File::create(&archive_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for name in files {
        let safe = sanitize_filename(name);
        zip.start_file(safe.clone(), options).map_err(zip_err)?;
        let mut src = fs::File::open(dir.join(&safe))?;
        std::io::copy(&mut src, &mut zip)?;
    }
    zip.finish().map_err(zip_err)?;
    Ok(archive_path)
}

fn zip_err(e: zip::result::ZipError) -> MailError {
    MailError::Io(std::io::Error::other(e))
}
