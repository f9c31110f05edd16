use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use spool_api::{AckToken, PluginError, QueueMessage, QueueSource};

// ═══════════════════════════════════════════════════════════════
//  MemoryQueue
// ═══════════════════════════════════════════════════════════════

/// In-memory at-least-once queue, for tests.
///
/// A received message is invisible for `visibility`; without an ack in that
/// window it goes back to the queue.
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    visibility: Duration,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Pending>,
    inflight: HashMap<String, (Pending, Instant)>,
    next_seq: u64,
    next_receipt: u64,
}

#[derive(Clone)]
struct Pending {
    id: String,
    body: Vec<u8>,
}

impl MemoryQueue {
    pub fn new(visibility: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            visibility,
        }
    }

    /// Enqueue a message and return its id.
    pub async fn send(&self, body: impl Into<Vec<u8>>) -> String {
        let mut state = self.state.lock().await;
        state.next_seq += 1;
        let id = format!("m-{}", state.next_seq);
        state.pending.push_back(Pending {
            id: id.clone(),
            body: body.into(),
        });
        drop(state);
        self.notify.notify_one();
        id
    }

    /// Сообщения, ожидающие получения.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Полученные, но не подтверждённые сообщения.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.inflight.len()
    }

    /// Ещё не подтверждённые сообщения (ожидающие + в обработке).
    pub async fn unacked(&self) -> usize {
        let state = self.state.lock().await;
        state.pending.len() + state.inflight.len()
    }

    async fn take(&self, max_messages: usize) -> Vec<QueueMessage> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let expired: Vec<String> = state
            .inflight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((msg, _)) = state.inflight.remove(&receipt) {
                state.pending.push_back(msg);
            }
        }

        let mut out = Vec::new();
        while out.len() < max_messages {
            let Some(msg) = state.pending.pop_front() else {
                break;
            };
            state.next_receipt += 1;
            let receipt = format!("{}#{}", msg.id, state.next_receipt);
            out.push(QueueMessage {
                id: msg.id.clone(),
                body: msg.body.clone(),
                ack: AckToken(receipt.clone()),
            });
            state.inflight.insert(receipt, (msg, now + self.visibility));
        }
        out
    }
}

impl QueueSource for MemoryQueue {
    fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueMessage>, PluginError>> + Send + '_>> {
        Box::pin(async move {
            let deadline = Instant::now() + wait;
            loop {
                let notified = self.notify.notified();
                let batch = self.take(max_messages).await;
                if !batch.is_empty() || Instant::now() >= deadline {
                    return Ok(batch);
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(self.take(max_messages).await);
                }
            }
        })
    }

    fn ack<'a>(
        &'a self,
        token: &'a AckToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            match state.inflight.remove(token.as_str()) {
                Some(_) => Ok(()),
                None => Err(PluginError::rejected(format!("unknown or expired receipt {}", token.as_str()))),
            }
        })
    }
}
