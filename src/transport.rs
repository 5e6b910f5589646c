//! Remote chat API transport
//!
//! `ChatTransport` is the capability the relay consumes. `HttpTransport`
//! talks to the HipChat v2 REST API through a pool of auth tokens: a token
//! is checked out per call and handed back after a cooldown, which caps the
//! request rate per token. Send operations are retried, history fetches are
//! not (the polling worker already retries forever).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::chat::{HistoryItem, Message, Notification};
use crate::error::TransportError;
use crate::types::{MessageId, RoomId};

/// Per-request HTTP timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Delay before a used token becomes available again
const TOKEN_COOLDOWN: Duration = Duration::from_secs(5);

/// Remote chat service operations used by the relay
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post a plain message to a room
    async fn send_message(&self, room_id: &RoomId, message: &str) -> Result<(), TransportError>;

    /// Post a notification to a room
    async fn send_notification(
        &self,
        room_id: &RoomId,
        notification: &Notification,
    ) -> Result<(), TransportError>;

    /// Fetch up to `max_results` latest messages, starting at `since` when given
    ///
    /// When `since` is set the remote API includes that message itself as the
    /// first item of the result.
    async fn get_messages(
        &self,
        room_id: &RoomId,
        since: Option<&MessageId>,
        max_results: usize,
    ) -> Result<Vec<Message>, TransportError>;
}

/// Retry behaviour for send operations
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            pause: Duration::from_secs(5),
        }
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is reached
pub async fn with_retries<F, Fut>(policy: RetryPolicy, mut op: F) -> Result<(), TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= policy.max_attempts => {
                return Err(TransportError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                debug!("attempt {} failed: {}", attempt, e);
                tokio::time::sleep(policy.pause).await;
            }
        }
    }
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    items: Vec<HistoryItem>,
}

/// HipChat v2 REST transport with a rate-limiting token pool
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
    /// Tokens are returned here after the cooldown
    tokens_tx: mpsc::Sender<String>,
    tokens_rx: Mutex<mpsc::Receiver<String>>,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// Create a transport using one pool slot per auth token
    pub fn new(base_url: Url, tokens: Vec<String>) -> Result<Self, TransportError> {
        if tokens.is_empty() {
            return Err(TransportError::NoTokens);
        }
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let (tokens_tx, tokens_rx) = mpsc::channel(tokens.len());
        for token in tokens {
            tokens_tx
                .try_send(token)
                .map_err(|_| TransportError::PoolClosed)?;
        }

        Ok(Self {
            http,
            base_url,
            tokens_tx,
            tokens_rx: Mutex::new(tokens_rx),
            retry: RetryPolicy::default(),
        })
    }

    /// Wait for a free token
    async fn acquire(&self) -> Result<String, TransportError> {
        self.tokens_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::PoolClosed)
    }

    /// Hand a token back after the cooldown
    fn release(&self, token: String) {
        let tokens_tx = self.tokens_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TOKEN_COOLDOWN).await;
            let _ = tokens_tx.send(token).await;
        });
    }

    fn room_url(&self, room_id: &RoomId, endpoint: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Remote(format!("cannot use {} as API base", self.base_url)))?
            .pop_if_empty()
            .extend(["v2", "room", room_id.as_str()])
            .extend(endpoint);
        Ok(url)
    }

    /// Latest history of `room_id`, starting at `since` when given
    fn history_url(
        &self,
        room_id: &RoomId,
        since: Option<&MessageId>,
        max_results: usize,
    ) -> Result<Url, TransportError> {
        let mut url = self.room_url(room_id, &["history", "latest"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("max-results", &max_results.to_string())
                .append_pair("timezone", "GMT");
            if let Some(since) = since {
                query.append_pair("not-before", since.as_str());
            }
        }
        Ok(url)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        token: &str,
        url: Url,
        body: &T,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send_message(&self, room_id: &RoomId, message: &str) -> Result<(), TransportError> {
        let url = self.room_url(room_id, &["message"])?;
        let token = self.acquire().await?;
        let body = MessageRequest { message };

        let result = with_retries(self.retry, || self.post_json(&token, url.clone(), &body)).await;
        self.release(token);

        if let Err(e) = &result {
            warn!(room_id = %room_id, "send message failed: {}", e);
        }
        result
    }

    async fn send_notification(
        &self,
        room_id: &RoomId,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        let url = self.room_url(room_id, &["notification"])?;
        let token = self.acquire().await?;

        let result =
            with_retries(self.retry, || self.post_json(&token, url.clone(), notification)).await;
        self.release(token);

        if let Err(e) = &result {
            warn!(room_id = %room_id, "send notification failed: {}", e);
        }
        result
    }

    async fn get_messages(
        &self,
        room_id: &RoomId,
        since: Option<&MessageId>,
        max_results: usize,
    ) -> Result<Vec<Message>, TransportError> {
        let url = self.history_url(room_id, since, max_results)?;

        let token = self.acquire().await?;
        let result = async {
            let response = self.http.get(url).bearer_auth(&token).send().await?;
            let history: HistoryResponse = check_status(response).await?.json().await?;
            Ok::<_, TransportError>(history)
        }
        .await;
        self.release(token);

        Ok(result?
            .items
            .into_iter()
            .map(|item| item.into_message(room_id))
            .collect())
    }
}

/// In-memory transport used by the unit tests
#[cfg(test)]
pub mod testing {
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Build a bare message with the given id
    pub fn message(room_id: &RoomId, id: &str) -> Message {
        HistoryItem {
            id: id.to_string(),
            message: format!("body of {}", id),
            kind: "message".to_string(),
            ..HistoryItem::default()
        }
        .into_message(room_id)
    }

    /// How `get_messages` answers
    pub enum History {
        /// Pop one canned answer per call, then return nothing
        Scripted(VecDeque<Result<Vec<Message>, TransportError>>),
        /// Always one new message after the echoed cursor
        Endless,
    }

    /// Records every call and fails for configured rooms
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(RoomId, String)>>,
        pub notifications: Mutex<Vec<(RoomId, Notification)>>,
        pub history_calls: Mutex<Vec<(RoomId, Option<MessageId>, usize)>>,
        failing_rooms: Mutex<HashSet<RoomId>>,
        history: Mutex<History>,
        counter: AtomicUsize,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::with_history(History::Scripted(VecDeque::new()))
        }

        pub fn with_history(history: History) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                notifications: Mutex::new(Vec::new()),
                history_calls: Mutex::new(Vec::new()),
                failing_rooms: Mutex::new(HashSet::new()),
                history: Mutex::new(history),
                counter: AtomicUsize::new(0),
            }
        }

        pub fn fail_room(&self, room_id: &str) {
            self.failing_rooms.lock().unwrap().insert(RoomId::from(room_id));
        }

        pub fn notifications_for(&self, room_id: &str) -> Vec<Notification> {
            self.notifications
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id.as_str() == room_id)
                .map(|(_, n)| n.clone())
                .collect()
        }

        pub fn sent_to(&self, room_id: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id.as_str() == room_id)
                .map(|(_, m)| m.clone())
                .collect()
        }

        fn check_room(&self, room_id: &RoomId) -> Result<(), TransportError> {
            if self.failing_rooms.lock().unwrap().contains(room_id) {
                return Err(TransportError::Remote(format!("room {} unavailable", room_id)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_message(&self, room_id: &RoomId, message: &str) -> Result<(), TransportError> {
            self.check_room(room_id)?;
            self.sent
                .lock()
                .unwrap()
                .push((room_id.clone(), message.to_string()));
            Ok(())
        }

        async fn send_notification(
            &self,
            room_id: &RoomId,
            notification: &Notification,
        ) -> Result<(), TransportError> {
            self.check_room(room_id)?;
            self.notifications
                .lock()
                .unwrap()
                .push((room_id.clone(), notification.clone()));
            Ok(())
        }

        async fn get_messages(
            &self,
            room_id: &RoomId,
            since: Option<&MessageId>,
            max_results: usize,
        ) -> Result<Vec<Message>, TransportError> {
            self.history_calls
                .lock()
                .unwrap()
                .push((room_id.clone(), since.cloned(), max_results));

            match &mut *self.history.lock().unwrap() {
                History::Scripted(answers) => answers.pop_front().unwrap_or_else(|| Ok(Vec::new())),
                History::Endless => {
                    let next = self.counter.fetch_add(1, Ordering::SeqCst);
                    let fresh = message(room_id, &format!("m{}", next));
                    Ok(match since {
                        Some(cursor) => vec![message(room_id, cursor.as_str()), fresh],
                        None => vec![fresh],
                    })
                }
            }
        }
    }
}
