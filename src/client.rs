//! Gmail API client with request limiting and retry logic

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff, ExponentialBackoffBuilder};
use google_gmail1::{
    api::{Message, ModifyMessageRequest},
    hyper_rustls, hyper_util, Gmail,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{GmailError, Result};
use crate::models::{MessageFormat, MessagePage, RemoteMessage};
use crate::shutdown::ShutdownSignal;

/// Full mailbox access; permanent deletion needs nothing narrower
pub const SCOPE_FULL: &str = "https://mail.google.com/";

/// Read, label and import without permanent deletion
pub const SCOPE_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Page size requested from `users.messages.list`
pub const LIST_PAGE_SIZE: u32 = 500;

/// Narrow view of the Gmail API used by export, import and cleanup
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// Fetch one page of message IDs matching `query`
    async fn list_message_page(&self, query: &str, page_token: Option<String>)
        -> Result<MessagePage>;

    /// Fetch a single message
    async fn fetch_message(&self, id: &str, format: MessageFormat) -> Result<RemoteMessage>;

    /// Insert an RFC 822 message into the mailbox without sending it.
    ///
    /// Returns the ID of the new message.
    async fn import_message(&self, raw: &[u8]) -> Result<String>;

    /// Add and remove labels on a message
    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;

    /// Permanently delete a message, bypassing trash
    async fn delete_message(&self, id: &str) -> Result<()>;
}

/// Follow continuation tokens until the search is exhausted
///
/// A triggered `shutdown` stops paging before the next page is requested.
pub async fn list_all_message_ids(
    client: &dyn GmailClient,
    query: &str,
    shutdown: Option<&ShutdownSignal>,
) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = client
            .list_message_page(query, page_token.take())
            .await?;
        pages += 1;
        ids.extend(page.ids);

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }

        if shutdown.is_some_and(|s| s.is_triggered()) {
            return Err(GmailError::OperationCancelled(format!(
                "search stopped after {} pages",
                pages
            )));
        }
    }

    debug!("Search returned {} messages over {} pages", ids.len(), pages);
    Ok(ids)
}

/// Retry settings for transient API failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run `operation`, retrying transient errors with exponential backoff.
///
/// Rate-limit responses wait at least as long as the server asked.
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempts = 0u32;
    let max_attempts = policy.max_retries + 1;

    retry(policy.backoff(), || {
        attempts += 1;
        let attempt = attempts;
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_permanent() || attempt >= max_attempts => {
                    Err(backoff::Error::permanent(e))
                }
                Err(e) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying...",
                        operation_name, attempt, max_attempts, e
                    );
                    let wait = match &e {
                        GmailError::RateLimitExceeded { retry_after } => {
                            Some(Duration::from_secs(*retry_after))
                        }
                        _ => None,
                    };
                    Err(match wait {
                        Some(wait) => backoff::Error::retry_after(e, wait),
                        None => backoff::Error::transient(e),
                    })
                }
            }
        }
    })
    .await
}

type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

/// Production Gmail client
///
/// - Semaphore-bounded in-flight requests
/// - Exponential backoff on 429, 5xx and network errors
pub struct ProductionGmailClient {
    hub: Gmail<HttpsConnector>,
    rate_limiter: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl ProductionGmailClient {
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_concurrent` - Maximum concurrent requests
    pub fn new(hub: Gmail<HttpsConnector>, max_concurrent: usize) -> Self {
        Self {
            hub,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn acquire_permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.rate_limiter
            .acquire()
            .await
            .map_err(|e| GmailError::Unknown(format!("Failed to acquire rate limit permit: {}", e)))
    }
}

/// Convert an API message into our representation
fn into_remote_message(msg: Message) -> Result<RemoteMessage> {
    let id = msg
        .id
        .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;

    Ok(RemoteMessage {
        id,
        thread_id: msg.thread_id,
        label_ids: msg.label_ids.unwrap_or_default(),
        snippet: msg.snippet,
        size_estimate: msg.size_estimate,
        internal_date: msg.internal_date,
        raw: msg.raw.unwrap_or_default(),
    })
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_message_page(
        &self,
        query: &str,
        page_token: Option<String>,
    ) -> Result<MessagePage> {
        let _permit = self.acquire_permit().await?;

        with_retry("list_messages", &self.retry, || async {
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(LIST_PAGE_SIZE);

            if let Some(token) = &page_token {
                call = call.page_token(token);
            }

            let (_, response) = call.add_scope(SCOPE_MODIFY).doit().await?;

            let ids = response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect();

            Ok(MessagePage {
                ids,
                next_page_token: response.next_page_token,
            })
        })
        .await
    }

    async fn fetch_message(&self, id: &str, format: MessageFormat) -> Result<RemoteMessage> {
        let _permit = self.acquire_permit().await?;

        with_retry("get_message", &self.retry, || async {
            let (_, msg) = self
                .hub
                .users()
                .messages_get("me", id)
                .format(format.as_str())
                .add_scope(SCOPE_MODIFY)
                .doit()
                .await?;

            into_remote_message(msg)
        })
        .await
    }

    async fn import_message(&self, raw: &[u8]) -> Result<String> {
        let _permit = self.acquire_permit().await?;
        let content_type: mime::Mime = "message/rfc822"
            .parse()
            .map_err(|e| GmailError::Unknown(format!("Invalid MIME type: {}", e)))?;

        with_retry("import_message", &self.retry, || async {
            let (_, msg) = self
                .hub
                .users()
                .messages_import(Message::default(), "me")
                .internal_date_source("dateHeader")
                .never_mark_spam(true)
                .add_scope(SCOPE_MODIFY)
                .upload(Cursor::new(raw.to_vec()), content_type.clone())
                .await?;

            msg.id
                .ok_or_else(|| GmailError::ApiError("Imported message has no ID".to_string()))
        })
        .await
    }

    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        let _permit = self.acquire_permit().await?;

        with_retry("modify_labels", &self.retry, || async {
            let request = ModifyMessageRequest {
                add_label_ids: (!add.is_empty()).then(|| add.to_vec()),
                remove_label_ids: (!remove.is_empty()).then(|| remove.to_vec()),
            };

            self.hub
                .users()
                .messages_modify(request, "me", id)
                .add_scope(SCOPE_MODIFY)
                .doit()
                .await?;

            Ok(())
        })
        .await
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        let _permit = self.acquire_permit().await?;

        with_retry("delete_message", &self.retry, || async {
            self.hub
                .users()
                .messages_delete("me", id)
                .add_scope(SCOPE_FULL)
                .doit()
                .await?;

            Ok(())
        })
        .await
    }
}
