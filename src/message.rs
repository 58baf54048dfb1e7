//! Pure MIME decoding: raw RFC 822 bytes → structured message data.
//!
//! Nothing here touches the network. A failure decoding one header or part
//! degrades that single field to its default and never aborts the rest of
//! the message.

use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::warn;

/// Stable handle for one attachment within one message.
///
/// The identifier is derived from the filename alone (first 8 hex characters
/// of its SHA-1), not from the content: two files sharing a name collide,
/// identical bytes under different names do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub id: String,
    pub name: String,
}

impl AttachmentDescriptor {
    pub fn from_filename(name: &str) -> Self {
        Self {
            id: attachment_id(name),
            name: name.to_string(),
        }
    }
}

/// First 8 hex characters of the SHA-1 of `name`.
pub fn attachment_id(name: &str) -> String {
    let digest = Sha1::digest(name.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// One matched message, or an error placeholder carried through the pipeline
/// for visibility (`error` set, everything else at its default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResult {
    pub uid: u32,
    pub folder: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// Send date as epoch seconds; `None` when absent or unparseable.
    pub date: Option<i64>,
    pub files: Vec<AttachmentDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResult {
    pub fn from_error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            uid: 0,
            folder: String::new(),
            sender: String::new(),
            subject: String::new(),
            body: message.clone(),
            date: None,
            files: Vec::new(),
            error: Some(message),
        }
    }

    /// A message is only relevant when it carries at least one attachment.
    pub fn has_attachments(&self) -> bool {
        !self.files.is_empty()
    }
}

/// Decode a raw message into a [`MessageResult`].
pub fn decode_message(raw: &[u8], uid: u32, folder: &str) -> Result<MessageResult, mailparse::MailParseError> {
    let parsed = mailparse::parse_mail(raw)?;

    let subject = parsed
        .headers
        .get_first_value("Subject")
        .unwrap_or_default();
    let sender = parsed
        .headers
        .get_first_value("Return-Path")
        .or_else(|| parsed.headers.get_first_value("From"))
        .unwrap_or_default();
    let date = parsed
        .headers
        .get_first_value("Date")
        .and_then(|d| match mailparse::dateparse(&d) {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!("unparseable Date header {d:?}: {e}");
                None
            }
        });

    let mut body = None;
    let mut files = Vec::new();
    walk_parts(&parsed, &mut body, &mut files);

    Ok(MessageResult {
        uid,
        folder: folder.to_string(),
        sender,
        subject,
        body: body.unwrap_or_default(),
        date,
        files,
        error: None,
    })
}

/// Walk the part tree. The first text leaf becomes the body; every
/// attachment-disposed part contributes a descriptor, regardless of order.
fn walk_parts(part: &ParsedMail, body: &mut Option<String>, files: &mut Vec<AttachmentDescriptor>) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_parts(sub, body, files);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    if disposition.disposition == DispositionType::Attachment {
        if let Some(name) = attachment_filename(part) {
            files.push(AttachmentDescriptor::from_filename(&name));
        }
    } else if part.ctype.mimetype.starts_with("text/") && body.is_none() {
        *body = Some(extract_body_text(part));
    }
}

/// Filename from the disposition params, falling back to the content-type
/// `name` param. mailparse has already decoded any RFC 2047 encoded-words.
pub(crate) fn attachment_filename(part: &ParsedMail) -> Option<String> {
    part.get_content_disposition()
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned()
}

/// Transfer-decoded part payload as plain text: HTML is stripped to text and
/// runs of consecutive newlines collapse to one.
fn extract_body_text(part: &ParsedMail) -> String {
    // get_body handles base64 / quoted-printable / raw and charset
    let contents = match part.get_body() {
        Ok(c) => c,
        Err(e) => {
            warn!("failed to decode body part: {e}");
            return String::new();
        }
    };
    let text = if part.ctype.mimetype.eq_ignore_ascii_case("text/html") {
        match htmd::convert(&contents) {
            Ok(t) => t,
            Err(e) => {
                warn!("failed to strip HTML body: {e}");
                contents
            }
        }
    } else {
        contents
    };
    collapse_newlines(&text)
}

fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_newline = false;
    for c in text.chars() {
        match c {
            '\r' => {}
            '\n' => {
                if !last_was_newline {
                    out.push('\n');
                }
                last_was_newline = true;
            }
            _ => {
                out.push(c);
                last_was_newline = false;
            }
        }
    }
    out
}

/// Order successful results: dated items strictly newest-first, undated ones
/// after all dated ones in their original relative order.
pub fn sort_results(results: &mut [MessageResult]) {
    results.sort_by(|a, b| match (a.date, b.date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
