//! Suspend/resume plumbing for interactive nodes.
//!
//! A suspending handler returns a [`PromptRequest`]. The interpreter routes it to the
//! matching [`PromptCallbacks`] method through [`dispatch_prompt`] and parks the run on
//! the returned future. [`PromptBroker`] is a ready-made callbacks implementation for
//! transports that deliver requests and answers out of band (an event stream, a
//! socket): requests are published on a channel, and each one waits on a oneshot
//! receiver keyed by its id until [`PromptBroker::answer`] is called.
//!
//! Dropping the waiting future (for example because the run was cancelled) removes
//! the pending entry, so withdrawn requests never leak.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use stepline_types::{PromptKind, PromptPayload, PromptRequest};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::{error::PromptError, services::PromptCallbacks};

/// Builds a request with a fresh correlation id.
pub fn new_prompt_request(execution_id: &str, node_id: &str, payload: PromptPayload) -> PromptRequest {
    PromptRequest {
        id: Uuid::new_v4().to_string(),
        execution_id: execution_id.to_string(),
        node_id: node_id.to_string(),
        payload,
    }
}

/// Routes a request to the callback matching its kind.
pub async fn dispatch_prompt(callbacks: &dyn PromptCallbacks, request: &PromptRequest) -> Option<String> {
    match request.kind() {
        PromptKind::Value => callbacks.prompt_for_value(request).await,
        PromptKind::Dialog => callbacks.prompt_for_dialog(request).await,
        PromptKind::DriveFile => callbacks.prompt_for_drive_file(request).await,
        PromptKind::Diff => callbacks.prompt_for_diff(request).await,
        PromptKind::Password => callbacks.prompt_for_password(request).await,
    }
}

type PendingMap = HashMap<String, oneshot::Sender<Option<String>>>;

/// Correlates published prompt requests with answers delivered later.
#[derive(Debug, Clone)]
pub struct PromptBroker {
    pending: Arc<Mutex<PendingMap>>,
    outgoing: mpsc::UnboundedSender<PromptRequest>,
}

impl PromptBroker {
    /// Creates a broker and the receiver on which its requests are published.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PromptRequest>) {
        let (outgoing, requests) = mpsc::unbounded_channel();
        let broker = Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            outgoing,
        };
        (broker, requests)
    }

    /// Resolves a pending request. `None` means the human declined.
    pub fn answer(&self, request_id: &str, answer: Option<String>) -> Result<(), PromptError> {
        let sender = self
            .lock()
            .remove(request_id)
            .ok_or_else(|| PromptError::NotPending(request_id.to_string()))?;
        sender
            .send(answer)
            .map_err(|_| PromptError::Withdrawn(request_id.to_string()))
    }

    /// Drops a pending request; its waiter resolves as declined.
    pub fn withdraw(&self, request_id: &str) -> bool {
        self.lock().remove(request_id).is_some()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    async fn wait(&self, request: &PromptRequest) -> Option<String> {
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(request.id.clone(), sender);
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: &request.id,
        };

        if self.outgoing.send(request.clone()).is_err() {
            debug!(request_id = %request.id, "no prompt transport attached; treating as declined");
            return None;
        }
        receiver.await.ok().flatten()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.request_id);
    }
}

#[async_trait]
impl PromptCallbacks for PromptBroker {
    async fn prompt_for_value(&self, request: &PromptRequest) -> Option<String> {
        self.wait(request).await
    }

    async fn prompt_for_dialog(&self, request: &PromptRequest) -> Option<String> {
        self.wait(request).await
    }

    async fn prompt_for_drive_file(&self, request: &PromptRequest) -> Option<String> {
        self.wait(request).await
    }

    async fn prompt_for_diff(&self, request: &PromptRequest) -> Option<String> {
        self.wait(request).await
    }

    async fn prompt_for_password(&self, request: &PromptRequest) -> Option<String> {
        self.wait(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepline_types::ValuePrompt;

    fn value_request() -> PromptRequest {
        new_prompt_request(
            "run-1",
            "ask",
            PromptPayload::Value(ValuePrompt {
                title: "Name?".into(),
                ..ValuePrompt::default()
            }),
        )
    }

    #[tokio::test]
    async fn answer_resolves_the_waiting_request() {
        let (broker, mut requests) = PromptBroker::new();
        let responder = broker.clone();
        tokio::spawn(async move {
            let request = requests.recv().await.expect("request published");
            responder.answer(&request.id, Some("Ada".into())).expect("answer");
        });

        let answer = dispatch_prompt(&broker, &value_request()).await;
        assert_eq!(answer.as_deref(), Some("Ada"));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn dropped_waiter_removes_pending_request() {
        let (broker, mut requests) = PromptBroker::new();
        let request = value_request();

        let waiter = broker.clone();
        let pending_request = request.clone();
        let handle = tokio::spawn(async move { waiter.prompt_for_value(&pending_request).await });

        let published = requests.recv().await.expect("request published");
        assert_eq!(broker.pending_ids(), vec![published.id.clone()]);

        handle.abort();
        let _ = handle.await;

        assert_eq!(broker.pending_count(), 0);
        assert_eq!(
            broker.answer(&published.id, Some("late".into())),
            Err(PromptError::NotPending(published.id))
        );
    }

    #[tokio::test]
    async fn withdrawn_request_resolves_as_declined() {
        let (broker, mut requests) = PromptBroker::new();
        let responder = broker.clone();
        tokio::spawn(async move {
            let request = requests.recv().await.expect("request published");
            assert!(responder.withdraw(&request.id));
        });

        assert_eq!(dispatch_prompt(&broker, &value_request()).await, None);
    }
}
