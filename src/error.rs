use thiserror::Error;

/// Failure taxonomy for mailbox operations.
///
/// Per-message and per-folder failures inside a search are converted to
/// error-placeholder results and never abort sibling work; these variants
/// surface only from single-target operations or from the session layer.
#[derive(Debug, Error)]
pub enum MailError {
    /// Transport or protocol failure while talking to the mail store.
    #[error("connection to mail store failed: {0}")]
    Connection(String),

    /// Credentials rejected by the remote store.
    #[error("access denied for {0}")]
    AccessDenied(String),

    /// The selected folder does not exist. Carries the folders that do,
    /// when the diagnostic listing itself succeeded.
    #[error("folder {folder:?} not found{}", available_suffix(.available))]
    FolderNotFound {
        folder: String,
        available: Option<String>,
    },

    /// The operation completed but returned nothing usable.
    #[error("no data found: {0}")]
    DataNotFound(String),

    /// Malformed input from the boundary.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Filesystem failure while materializing attachments.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

fn available_suffix(available: &Option<String>) -> String {
    match available {
        Some(folders) => format!(". Available folders: {folders}"),
        None => String::new(),
    }
}
