use std::future::Future;

use crate::error::MailError;

/// The session primitive: a stateful mail-store client.
///
/// [`MailStore::open`] yields a session already connected, authenticated and
/// scoped to one folder. Every unit of work (one search, one fetch) opens its
/// own session and closes it before the unit finishes — sessions are never
/// shared between concurrent operations and never reused across units.
pub trait MailStore: Send + Sync + 'static {
    type Session: MailSession + 'static;

    /// Connect, authenticate and select `folder`.
    ///
    /// Fails with [`MailError::Connection`] on transport/timeout trouble,
    /// [`MailError::AccessDenied`] on rejected credentials and
    /// [`MailError::FolderNotFound`] (carrying the folders that do exist,
    /// when obtainable) on a failed select. No half-open session survives
    /// any of these paths.
    fn open(&self, folder: &str) -> impl Future<Output = Result<Self::Session, MailError>> + Send;
}

/// One open, authenticated handle to one folder on the mail store.
pub trait MailSession: Send {
    /// Server-side UID SEARCH. An empty match set is not an error.
    fn search(&mut self, query: &str) -> impl Future<Output = Result<Vec<u32>, MailError>> + Send;

    /// Fetch the raw RFC 822 bytes of one message; `None` when the UID does
    /// not exist in the selected folder.
    fn fetch_raw(
        &mut self,
        uid: u32,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, MailError>> + Send;

    /// Close and log out. Failures are swallowed; the session is considered
    /// gone either way.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
