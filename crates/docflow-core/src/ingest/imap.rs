//! IMAP poller: every 60 s, for each active `imap` import source, connects,
//! selects the configured mailbox, searches `UNSEEN`, and imports attachments
//! matching [`super::ALLOWED_EXTENSIONS`]. Connects fresh each cycle, then
//! either moves the message to the processed folder and expunges it or
//! marks it `\Seen`; per-message errors are isolated so one bad message
//! never poisons the rest of the mailbox. Built on `async-imap` +
//! `async-native-tls` over the workspace's existing `tokio` runtime, with
//! `mail-parser` for RFC 2047 header decoding and attachment extraction.

use super::{apply_post_import_action, has_allowed_extension, ingest_one};
use crate::blob::BlobStore;
use crate::db::Repository;
use crate::embedding::EmbeddingProvider;
use crate::error::{CoreError, CoreResult};
use crate::event_bus::EventBus;
use crate::extractor::TextExtractor;
use crate::llm::LlmProvider;
use crate::models::{ImportSource, ImportSourceType};
use crate::orchestrator::Orchestrator;
use crate::queue::JobQueue;
use async_imap::types::Fetch;
use futures::TryStreamExt;
use mail_parser::MessageParser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(60);

pub struct ImapPoller {
    repository: Arc<Repository>,
    blob_store: Arc<BlobStore>,
    extractor: Arc<TextExtractor>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    llm_provider: Option<Arc<dyn LlmProvider>>,
    queue: Arc<JobQueue>,
    event_bus: Arc<EventBus>,
    configured_dimension: usize,
}

impl ImapPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<Repository>,
        blob_store: Arc<BlobStore>,
        extractor: Arc<TextExtractor>,
        embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
        llm_provider: Option<Arc<dyn LlmProvider>>,
        queue: Arc<JobQueue>,
        event_bus: Arc<EventBus>,
        configured_dimension: usize,
    ) -> Self {
        Self {
            repository,
            blob_store,
            extractor,
            embedding_provider,
            llm_provider,
            queue,
            event_bus,
            configured_dimension,
        }
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(
            &self.repository,
            &self.blob_store,
            &self.extractor,
            self.embedding_provider.as_deref(),
            self.llm_provider.as_deref(),
            &self.queue,
            &self.event_bus,
            self.configured_dimension,
        )
    }

    /// Runs forever, polling every active IMAP source once per
    /// [`POLL_INTERVAL`]. A source's connection/mailbox error never affects
    /// the others.
    pub async fn run(&self) {
        loop {
            self.poll_once().await;
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn poll_once(&self) {
        let sources = match self.repository.list_active_sources(ImportSourceType::Imap).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to list active IMAP sources");
                return;
            }
        };
        info!(count = sources.len(), "checking active IMAP sources");

        for source in sources {
            if let Err(e) = self.check_source(&source).await {
                let message = redact_credentials(
                    &e.to_string(),
                    source.imap_username.as_deref().unwrap_or(""),
                    source.imap_password.as_deref().unwrap_or(""),
                );
                warn!(source_id = source.id, error = %message, "IMAP source check failed");
                let _ = self.repository.mark_source_error(source.id, &message).await;
            }
        }
    }

    async fn check_source(&self, source: &ImportSource) -> CoreResult<()> {
        let host = source
            .imap_host
            .as_deref()
            .ok_or_else(|| CoreError::InvalidInput("IMAP source has no host".into()))?;
        let username = source
            .imap_username
            .as_deref()
            .ok_or_else(|| CoreError::InvalidInput("IMAP source has no username".into()))?;
        let password = source
            .imap_password
            .as_deref()
            .ok_or_else(|| CoreError::InvalidInput("IMAP source has no password".into()))?;
        let port = source.imap_port.unwrap_or(993) as u16;
        let use_ssl = source.imap_use_ssl.unwrap_or(true);
        let mailbox = source.imap_mailbox.clone().unwrap_or_else(|| "INBOX".to_string());

        let mut session = connect(host, port, use_ssl, username, password).await?;

        let outcome = self.drain_mailbox(&mut session, source, &mailbox).await;

        let _ = session.logout().await;

        outcome?;
        self.repository.mark_source_ok(source.id).await?;
        Ok(())
    }

    async fn drain_mailbox(
        &self,
        session: &mut ImapSession,
        source: &ImportSource,
        mailbox: &str,
    ) -> CoreResult<()> {
        session
            .select(mailbox)
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("select {mailbox} failed: {e}")))?;

        let uids = session
            .uid_search("UNSEEN")
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("UNSEEN search failed: {e}")))?;

        if uids.is_empty() {
            return Ok(());
        }
        info!(mailbox, count = uids.len(), "found unseen messages");

        let mut processed_folder_used = false;
        for uid in uids {
            match self.process_message(session, source, uid).await {
                Ok(()) => {
                    if let Some(folder) = &source.imap_processed_folder {
                        if let Err(e) = session.uid_copy(uid.to_string(), folder).await {
                            warn!(uid, error = %e, "failed to copy message to processed folder");
                        } else if let Err(e) =
                            session.uid_store(uid.to_string(), "+FLAGS (\\Deleted)").await
                        {
                            warn!(uid, error = %e, "failed to flag message deleted");
                        } else {
                            processed_folder_used = true;
                        }
                    } else if let Err(e) = session.uid_store(uid.to_string(), "+FLAGS (\\Seen)").await {
                        warn!(uid, error = %e, "failed to flag message seen");
                    }
                }
                Err(e) => warn!(uid, error = %e, "failed to process message, leaving unseen"),
            }
        }

        if processed_folder_used {
            let _ = session.expunge().try_collect::<Vec<_>>().await;
        }
        Ok(())
    }

    async fn process_message(&self, session: &mut ImapSession, source: &ImportSource, uid: u32) -> CoreResult<()> {
        let messages: Vec<Fetch> = session
            .uid_fetch(uid.to_string(), "RFC822")
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("fetch {uid} failed: {e}")))?
            .try_collect()
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("fetch {uid} stream failed: {e}")))?;

        let Some(raw) = messages.into_iter().find_map(|m| m.body().map(|b| b.to_vec())) else {
            return Err(CoreError::ProviderTransient(format!("message {uid} has no body")));
        };

        let message = MessageParser::default()
            .parse(&raw)
            .ok_or_else(|| CoreError::InvalidInput(format!("message {uid} is not valid RFC822")))?;

        let subject = message.subject().unwrap_or("(no subject)").to_string();
        let attachments: Vec<(String, Vec<u8>)> = message
            .attachments()
            .filter_map(|part| {
                let name = part.attachment_name()?.to_string();
                has_allowed_extension(&name).then(|| (name, part.contents().to_vec()))
            })
            .collect();

        if attachments.is_empty() {
            info!(uid, subject, "no matching attachments");
            return Ok(());
        }

        let orchestrator = self.orchestrator();
        for (filename, bytes) in attachments {
            if let Err(e) =
                ingest_one(&self.repository, &self.blob_store, &orchestrator, source.owner_id, &filename, &bytes)
                    .await
            {
                warn!(uid, filename, error = %e, "failed to import IMAP attachment");
            }
        }
        Ok(())
    }
}

type ImapSession = async_imap::Session<Box<dyn AsyncReadWrite>>;

trait AsyncReadWrite: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

async fn connect(host: &str, port: u16, use_ssl: bool, username: &str, password: &str) -> CoreResult<ImapSession> {
    let tcp = tokio::net::TcpStream::connect((host, port))
        .await
        .map_err(|e| CoreError::ProviderTransient(format!("connect {host}:{port} failed: {e}")))?;

    let stream: Box<dyn AsyncReadWrite> = if use_ssl {
        let tls = async_native_tls::TlsConnector::new();
        let tls_stream = tls
            .connect(host, tcp)
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("TLS handshake failed: {e}")))?;
        Box::new(tls_stream)
    } else {
        Box::new(tcp)
    };

    let client = async_imap::Client::new(stream);
    let session = client
        .login(username, password)
        .await
        .map_err(|(e, _)| CoreError::ProviderTransient(format!("IMAP login failed: {e}")))?;
    Ok(session)
}

/// Strips the account username/password out of an error message before it
/// is persisted to `last_error` — credentials must never be echoed into
/// error messages emitted off-host.
fn redact_credentials(message: &str, username: &str, password: &str) -> String {
    let mut redacted = message.to_string();
    if !username.is_empty() {
        redacted = redacted.replace(username, "<redacted>");
    }
    if !password.is_empty() {
        redacted = redacted.replace(password, "<redacted>");
    }
    redacted
}
