use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::llm::{ChatProvider, ChatRequest, StreamChunk};
use crate::session::{Exchange, SessionStore};

/// Messages forwarded from the network task to the UI thread
#[derive(Debug)]
pub enum StreamUpdate {
    Chunk(StreamChunk),
    Failed(String),
}

/// Where an exchange stands after applying updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpStatus {
    Streaming,
    Finished,
    Failed(String),
}

impl PumpStatus {
    pub fn is_streaming(&self) -> bool {
        matches!(self, PumpStatus::Streaming)
    }
}

/// Drives one exchange.
///
/// The provider stream is consumed on a spawned task; updates come back over a
/// channel and are applied to the store by whoever owns it, in arrival order.
pub struct StreamPump {
    exchange: Exchange,
    rx: mpsc::UnboundedReceiver<StreamUpdate>,
}

impl StreamPump {
    pub fn spawn(provider: Arc<dyn ChatProvider>, request: ChatRequest, exchange: Exchange) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(provider, request, tx));
        Self { exchange, rx }
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Apply every update that has already arrived without waiting
    pub fn drain(&mut self, store: &mut SessionStore) -> PumpStatus {
        loop {
            match self.rx.try_recv() {
                Ok(update) => {
                    let status = self.apply(store, update);
                    if !status.is_streaming() {
                        return status;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return PumpStatus::Streaming,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("stream ended without a final chunk");
                    return PumpStatus::Finished;
                }
            }
        }
    }

    /// Wait for the next update and apply it
    pub async fn recv(&mut self, store: &mut SessionStore) -> PumpStatus {
        match self.rx.recv().await {
            Some(update) => self.apply(store, update),
            None => PumpStatus::Finished,
        }
    }

    fn apply(&self, store: &mut SessionStore, update: StreamUpdate) -> PumpStatus {
        match update {
            StreamUpdate::Chunk(chunk) => {
                store.apply_chunk(&self.exchange, &chunk);
                if chunk.done {
                    PumpStatus::Finished
                } else {
                    PumpStatus::Streaming
                }
            }
            StreamUpdate::Failed(reason) => {
                store.fail_exchange(&self.exchange);
                PumpStatus::Failed(reason)
            }
        }
    }
}

async fn forward(
    provider: Arc<dyn ChatProvider>,
    request: ChatRequest,
    tx: mpsc::UnboundedSender<StreamUpdate>,
) {
    let mut stream = match provider.stream_chat(request).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "failed to start stream");
            let _ = tx.send(StreamUpdate::Failed(e.to_string()));
            return;
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                let done = chunk.done;
                // Receiver gone means the UI quit; stop reading.
                if tx.send(StreamUpdate::Chunk(chunk)).is_err() || done {
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, "stream aborted");
                let _ = tx.send(StreamUpdate::Failed(e.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::llm::ChunkStream;
    use crate::prompts::STREAM_ERROR_TEXT;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// What the fake provider does at each step
    #[derive(Debug, Clone)]
    pub(crate) enum Step {
        Text(&'static str),
        Fail,
    }

    /// Provider that replays a fixed script of cumulative texts
    pub(crate) struct ScriptedProvider {
        pub steps: Vec<Step>,
        pub refuse: bool,
    }

    impl ScriptedProvider {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                refuse: false,
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn stream_chat(&self, _request: ChatRequest) -> Result<ChunkStream, StreamError> {
            if self.refuse {
                return Err(StreamError::MissingApiKey {
                    env_var: "TEST_KEY".into(),
                });
            }
            let mut items = Vec::new();
            let mut last = String::new();
            for step in &self.steps {
                match step {
                    Step::Text(text) => {
                        last = text.to_string();
                        items.push(Ok(StreamChunk {
                            text: last.clone(),
                            ..StreamChunk::default()
                        }));
                    }
                    Step::Fail => {
                        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
                        items.push(Err(StreamError::Decode(err)));
                        return Ok(Box::pin(futures::stream::iter(items)));
                    }
                }
            }
            items.push(Ok(StreamChunk {
                text: last,
                done: true,
                citations: Vec::new(),
            }));
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    async fn run(provider: ScriptedProvider, text: &str) -> (SessionStore, Exchange, PumpStatus) {
        let mut store = SessionStore::load(Box::new(MemoryStorage::new()));
        let exchange = store.begin_exchange(text).unwrap();
        let request = ChatRequest::new(exchange.history.clone(), text);
        let mut pump = StreamPump::spawn(Arc::new(provider), request, exchange.clone());

        let mut status = PumpStatus::Streaming;
        while status.is_streaming() {
            status = pump.recv(&mut store).await;
        }
        (store, exchange, status)
    }

    #[tokio::test]
    async fn hello_without_grounding_has_no_citations() {
        let provider = ScriptedProvider::new(vec![Step::Text("Hi"), Step::Text("Hi! How can I help?")]);
        let (store, exchange, status) = run(provider, "Hello").await;

        assert_eq!(status, PumpStatus::Finished);
        let conversation = store.get(&exchange.conversation_id).unwrap();
        let reply = conversation.messages.last().unwrap();
        assert_eq!(reply.content, "Hi! How can I help?");
        assert!(reply.grounding_links.is_none());
        assert!(!reply.is_error);
    }

    #[tokio::test]
    async fn mid_stream_failure_marks_the_reply() {
        let provider = ScriptedProvider::new(vec![Step::Text("Partial ans"), Step::Fail]);
        let (store, exchange, status) = run(provider, "Hello").await;

        assert!(matches!(status, PumpStatus::Failed(_)));
        let conversation = store.get(&exchange.conversation_id).unwrap();
        assert_eq!(conversation.messages[0].content, "Hello");
        assert!(!conversation.messages[0].is_error);
        assert!(conversation.messages[1].is_error);
        assert_eq!(conversation.messages[1].content, STREAM_ERROR_TEXT);
    }

    #[tokio::test]
    async fn refused_request_marks_the_reply() {
        let mut provider = ScriptedProvider::new(Vec::new());
        provider.refuse = true;
        let (store, exchange, status) = run(provider, "Hello").await;

        assert!(matches!(status, PumpStatus::Failed(reason) if reason.contains("TEST_KEY")));
        let reply = store.get(&exchange.conversation_id).unwrap().messages[1].clone();
        assert!(reply.is_error);
    }

    #[tokio::test]
    async fn drain_applies_everything_already_received() {
        let mut store = SessionStore::load(Box::new(MemoryStorage::new()));
        let exchange = store.begin_exchange("Count").unwrap();
        let provider = ScriptedProvider::new(vec![Step::Text("1"), Step::Text("1 2"), Step::Text("1 2 3")]);
        let mut pump = StreamPump::spawn(
            Arc::new(provider),
            ChatRequest::new(Vec::new(), "Count"),
            exchange,
        );

        // Let the forwarding task run to completion.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let mut status = pump.drain(&mut store);
        while status.is_streaming() {
            tokio::task::yield_now().await;
            status = pump.drain(&mut store);
        }
        assert_eq!(status, PumpStatus::Finished);
        let reply = &store.active().unwrap().messages[1];
        assert_eq!(reply.content, "1 2 3");
        assert_eq!(pump.exchange().message_id, reply.id);
    }
}
