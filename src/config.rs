use std::path::PathBuf;

use serde::Deserialize;

/// Engine configuration, read once at process start by the surrounding
/// service and handed to [`crate::Engine::new`].
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,

    /// Folders a multi-folder search fans out over.
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,

    /// Outer bound: folders searched simultaneously.
    #[serde(default = "default_folder_workers")]
    pub folder_workers: usize,
    /// Inner bound: messages fetched simultaneously within one folder.
    #[serde(default = "default_message_workers")]
    pub message_workers: usize,
    /// UIDs processed per folder; matches beyond this are dropped.
    #[serde(default = "default_per_folder_limit")]
    pub per_folder_limit: usize,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Redis URL for the shared cache. Absent → process-local cache only.
    #[serde(default)]
    pub cache_url: Option<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Base directory for attachment scratch directories.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl EngineConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_port() -> u16 {
    993
}

fn default_folders() -> Vec<String> {
    vec!["Inbox".to_string()]
}

fn default_folder_workers() -> usize {
    4
}

fn default_message_workers() -> usize {
    8
}

fn default_per_folder_limit() -> usize {
    100
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_page_size() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("mailsift")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{"host":"mail.example.com","user":"svc","password":"secret"}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 993);
        assert_eq!(cfg.folders, vec!["Inbox".to_string()]);
        assert_eq!(cfg.folder_workers, 4);
        assert_eq!(cfg.message_workers, 8);
        assert_eq!(cfg.per_folder_limit, 100);
        assert_eq!(cfg.connect_timeout_secs, 30);
        assert!(cfg.cache_url.is_none());
        assert_eq!(cfg.address(), "mail.example.com:993");
    }
}
