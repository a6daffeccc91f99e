use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::cards::{validate_collection, Card};
use crate::config::{PersistenceBackend, PersistenceConfig};
use crate::editor::UNKNOWN_ERROR_MESSAGE;

const TMP_EXTENSION: &str = "json.tmp";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("could not reach the card service: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("card service answered {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("could not encode cards: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

impl PersistError {
    /// Text shown to the user; failures without a message of their own get
    /// the generic fallback.
    pub fn user_message(&self) -> String {
        match self {
            PersistError::Rejected { message, .. } | PersistError::Other(message)
                if message.trim().is_empty() =>
            {
                UNKNOWN_ERROR_MESSAGE.to_string()
            }
            PersistError::Other(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Receives the whole updated collection after every save or delete.
pub trait CardStore: Send + Sync {
    fn update_data(&self, cards: &[Card]) -> Result<(), PersistError>;

    fn describe(&self) -> String;
}

/// Posts the collection as JSON to the card service.
pub struct HttpCardStore {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: Option<String>,
}

impl HttpCardStore {
    pub fn new(config: &PersistenceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            url: config.update_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CardStore for HttpCardStore {
    fn update_data(&self, cards: &[Card]) -> Result<(), PersistError> {
        tracing::debug!(url = %self.url, cards = cards.len(), "posting card collection");
        let response = self.client.post(&self.url).json(cards).send()?;
        let status = response.status();
        if status.is_success() {
            tracing::info!(url = %self.url, %status, "card collection stored");
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| body.trim().to_string());
        tracing::warn!(url = %self.url, %status, %message, "card service rejected update");
        Err(PersistError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    fn describe(&self) -> String {
        format!("POST {}", self.url)
    }
}

/// Writes the collection back to a local JSON file.
pub struct FileCardStore {
    path: PathBuf,
}

impl FileCardStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CardStore for FileCardStore {
    fn update_data(&self, cards: &[Card]) -> Result<(), PersistError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PersistError::Io { path, source }
        };
        let json = serde_json::to_vec_pretty(cards)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
        }
        let tmp_path = self.path.with_extension(TMP_EXTENSION);
        fs::write(&tmp_path, &json).map_err(io_error(tmp_path.as_path()))?;
        fs::rename(&tmp_path, &self.path).map_err(io_error(self.path.as_path()))?;
        tracing::info!(path = %self.path.display(), cards = cards.len(), "card collection written");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

pub fn store_from_config(
    config: &PersistenceConfig,
    cards_path: &Path,
) -> Result<Arc<dyn CardStore>> {
    let store: Arc<dyn CardStore> = match config.backend {
        PersistenceBackend::Http => Arc::new(HttpCardStore::new(config)?),
        PersistenceBackend::File => Arc::new(FileCardStore::new(cards_path)),
    };
    tracing::debug!(store = %store.describe(), "persistence ready");
    Ok(store)
}

/// Reads the card collection. A missing file is an empty collection.
pub fn load_cards(path: &Path) -> Result<Vec<Card>> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no card collection yet, starting empty");
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading cards {}", path.display()))?;
    let cards: Vec<Card> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing cards {}", path.display()))?;
    validate_collection(&cards)
        .with_context(|| format!("validating cards {}", path.display()))?;
    tracing::debug!(path = %path.display(), cards = cards.len(), "cards loaded");
    Ok(cards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn sample_cards() -> Vec<Card> {
        let mut card = Card::new("A1B2C3");
        card.name = "Launch".into();
        card.start_date = "2024-01-01".into();
        vec![card]
    }

    /// Serves exactly one request with `status` and `body`, handing the
    /// request body back through the join handle.
    fn one_shot_server(
        status: &'static str,
        body: &'static str,
    ) -> anyhow::Result<(String, thread::JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return String::new();
            };
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                if line == "\r\n" {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
                line.clear();
            }
            let mut request_body = vec![0u8; content_length];
            let _ = reader.read_exact(&mut request_body);
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = reader.get_mut().write_all(response.as_bytes());
            String::from_utf8(request_body).unwrap_or_default()
        });
        Ok((format!("http://{addr}"), handle))
    }

    fn http_store(base_url: String) -> anyhow::Result<HttpCardStore> {
        HttpCardStore::new(&PersistenceConfig {
            base_url,
            timeout_ms: 5_000,
            ..PersistenceConfig::default()
        })
    }

    #[test]
    fn http_store_posts_the_whole_collection() -> anyhow::Result<()> {
        let (base_url, server) = one_shot_server("200 OK", "{}")?;
        let store = http_store(base_url)?;
        assert!(store.url().ends_with("/api/updateData"));

        store.update_data(&sample_cards())?;
        let posted = server.join().map_err(|_| anyhow::anyhow!("server thread panicked"))?;
        let cards: Vec<Card> = serde_json::from_str(&posted)?;
        assert_eq!(cards, sample_cards());
        Ok(())
    }

    #[test]
    fn http_store_reports_rejections() -> anyhow::Result<()> {
        let (base_url, server) =
            one_shot_server("500 Internal Server Error", r#"{"message":"disk full"}"#)?;
        let store = http_store(base_url)?;

        let err = store.update_data(&sample_cards()).err();
        let _ = server.join();
        assert_matches!(
            &err,
            Some(PersistError::Rejected { status: 500, message }) if message == "disk full"
        );
        Ok(())
    }

    #[test]
    fn empty_failures_fall_back_to_the_generic_message() {
        let err = PersistError::Rejected {
            status: 502,
            message: String::new(),
        };
        assert_eq!(err.user_message(), UNKNOWN_ERROR_MESSAGE);
        assert_eq!(PersistError::Other("offline".into()).user_message(), "offline");
    }

    #[test]
    fn file_store_replaces_the_collection_atomically() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("nested/cards.json");
        let store = FileCardStore::new(&path);

        store.update_data(&sample_cards())?;
        assert!(!path.with_extension(TMP_EXTENSION).exists());
        assert_eq!(load_cards(&path)?, sample_cards());

        store.update_data(&[])?;
        assert!(load_cards(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn loading_rejects_duplicate_ids() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("cards.json");
        fs::write(&path, r#"[{"id":"A1"},{"id":"A1"}]"#)?;
        assert!(load_cards(&path).is_err());
        assert!(load_cards(&temp.path().join("missing.json"))?.is_empty());
        Ok(())
    }
}
