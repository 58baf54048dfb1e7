//! async-imap implementation of the session primitive.

use async_native_tls::TlsConnector;
use async_std::net::TcpStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::MailError;
use crate::store::{MailSession, MailStore};

type Session = async_imap::Session<async_native_tls::TlsStream<TcpStream>>;

/// Mail-store client backed by a real IMAP server over TLS.
#[derive(Clone)]
pub struct ImapStore {
    config: Arc<EngineConfig>,
}

impl ImapStore {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Session, MailError> {
        let addr = self.config.address();

        // Resolve to IPv4 only — avoids IPv6 hangs with some providers
        use async_std::net::ToSocketAddrs;
        let addrs: Vec<std::net::SocketAddr> = addr
            .to_socket_addrs()
            .await
            .map_err(|e| MailError::Connection(format!("DNS resolve failed for {addr}: {e}")))?
            .filter(|a| a.is_ipv4())
            .collect();

        if addrs.is_empty() {
            return Err(MailError::Connection(format!(
                "no IPv4 address found for {}",
                self.config.host
            )));
        }

        let tcp = async_std::io::timeout(
            Duration::from_secs(self.config.connect_timeout_secs),
            TcpStream::connect(&addrs[..]),
        )
        .await
        .map_err(|e| MailError::Connection(format!("TCP connect to {addr} failed: {e}")))?;

        let tls = TlsConnector::new();
        let tls_stream = tls
            .connect(&self.config.host, tcp)
            .await
            .map_err(|e| {
                MailError::Connection(format!("TLS handshake with {} failed: {}", self.config.host, e))
            })?;

        let client = async_imap::Client::new(tls_stream);
        let session = client
            .login(&self.config.user, &self.config.password)
            .await
            .map_err(|(e, _)| MailError::AccessDenied(format!("{}: {}", self.config.user, e)))?;

        info!("IMAP session established for {}", self.config.user);
        Ok(session)
    }

    /// LIST the folder names that do exist, for the `FolderNotFound`
    /// diagnostic. `None` when the listing itself fails — the caller reports
    /// the original select failure either way.
    async fn list_folders(session: &mut Session) -> Option<String> {
        let stream = match session.list(Some(""), Some("*")).await {
            Ok(s) => s,
            Err(e) => {
                warn!("LIST for folder diagnostics failed: {e}");
                return None;
            }
        };
        let names: Vec<String> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .map(|name| name.name().to_string())
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names.join(","))
        }
    }
}

impl MailStore for ImapStore {
    type Session = ImapFolderSession;

    async fn open(&self, folder: &str) -> Result<ImapFolderSession, MailError> {
        let mut session = self.connect().await?;

        if let Err(select_err) = session.select(folder).await {
            let available = Self::list_folders(&mut session).await;
            let _ = session.logout().await;
            warn!("SELECT {folder} failed: {select_err}");
            return Err(MailError::FolderNotFound {
                folder: folder.to_string(),
                available,
            });
        }

        Ok(ImapFolderSession { inner: session })
    }
}

/// One open session scoped to one selected folder.
pub struct ImapFolderSession {
    inner: Session,
}

impl MailSession for ImapFolderSession {
    async fn search(&mut self, query: &str) -> Result<Vec<u32>, MailError> {
        let uids = self
            .inner
            .uid_search(query)
            .await
            .map_err(|e| MailError::Connection(format!("UID SEARCH failed: {e}")))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>, MailError> {
        let stream = self
            .inner
            .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
            .await
            .map_err(|e| MailError::Connection(format!("UID FETCH {uid} failed: {e}")))?;

        let fetches: Vec<_> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .collect();

        Ok(fetches
            .first()
            .and_then(|fetch| fetch.body())
            .map(|body| body.to_vec()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close().await {
            warn!("IMAP CLOSE failed: {e}");
        }
        if let Err(e) = self.inner.logout().await {
            warn!("IMAP LOGOUT failed: {e}");
        }
    }
}
