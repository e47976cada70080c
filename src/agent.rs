use crate::config::RequestConfig;
use crate::history::ConversationHistory;
use crate::llm::{ ByteStream, NdjsonStream, OllamaTransport, RequestBody, RequestShape, TransportError };
use crate::models::chat::ChatMessage;

use futures::{ ready, Stream, StreamExt };
use log::{ debug, info, warn };
use std::pin::Pin;
use std::task::{ Context, Poll };

/// Drives one conversation against an Ollama host.
///
/// The user's turn is recorded before any request is made, so it survives a failed call.
/// An assistant turn is recorded only once its reply has been received in full.
pub struct ChatAgent {
    transport: OllamaTransport,
    config: RequestConfig,
    history: ConversationHistory,
}

impl ChatAgent {
    pub fn new(transport: OllamaTransport, config: RequestConfig) -> Self {
        Self {
            transport,
            config,
            history: ConversationHistory::new(),
        }
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RequestConfig) {
        self.config = config;
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn transport(&self) -> &OllamaTransport {
        &self.transport
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.history.set_system_prompt(prompt);
    }

    /// Drops the whole conversation, system message included.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn restore(&mut self, messages: Vec<ChatMessage>) {
        self.history.restore(messages);
    }

    pub async fn is_available(&self) -> bool {
        self.transport.check_availability().await
    }

    /// Sends `input` and returns the reply as a lazy stream of text fragments.
    ///
    /// Connection and status errors surface here; errors while reading the body surface
    /// from the stream itself.
    pub async fn stream_reply(
        &mut self,
        input: &str,
        shape: RequestShape
    ) -> Result<ReplyStream<'_>, TransportError> {
        self.history.push(ChatMessage::user(input));
        let body = self.build_body(input, shape, true);

        info!("Streaming {} reply from {} ({})", shape, self.transport.base_url(), self.config.model);
        let bytes = self.transport.send_streaming(&body).await?;

        Ok(ReplyStream::new(&mut self.history, shape, bytes))
    }

    /// Sends `input` and waits for the complete reply.
    pub async fn reply(&mut self, input: &str, shape: RequestShape) -> Result<String, TransportError> {
        self.history.push(ChatMessage::user(input));
        let body = self.build_body(input, shape, false);

        let value = self.transport.send(&body).await?;
        if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
            return Err(TransportError::Remote(message.to_string()));
        }
        let text = shape
            .fragment(&value)
            .ok_or(TransportError::MissingContent { route: shape.route() })?
            .to_string();

        self.history.push(ChatMessage::assistant(text.clone()));
        Ok(text)
    }

    fn build_body(&self, input: &str, shape: RequestShape, stream: bool) -> RequestBody {
        let system = self.config.system_prompt
            .as_deref()
            .or_else(|| self.history.system().map(|m| m.content.as_str()));

        match shape {
            RequestShape::Generate => RequestBody::generate(&self.config, system, input, stream),
            RequestShape::Chat => {
                let context = if self.config.use_history {
                    self.history.recent(self.config.history_limit)
                } else {
                    self.history.recent(1)
                };
                let messages = system
                    .map(ChatMessage::system)
                    .into_iter()
                    .chain(context.iter().cloned())
                    .collect();
                RequestBody::chat(&self.config, messages, stream)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    Streaming,
    Finished,
    Failed,
}

/// Text fragments of one streamed reply, in arrival order.
///
/// When the underlying stream ends cleanly the concatenated text is appended to the
/// conversation as one assistant message and the stream yields `None`. A read error or an
/// in-band server error is yielded once and nothing is committed. Dropping the stream
/// early, or calling [`cancel`](Self::cancel), closes the connection without committing.
pub struct ReplyStream<'a> {
    history: &'a mut ConversationHistory,
    shape: RequestShape,
    objects: NdjsonStream<ByteStream>,
    text: String,
    state: ReplyState,
}

impl<'a> ReplyStream<'a> {
    fn new(history: &'a mut ConversationHistory, shape: RequestShape, bytes: ByteStream) -> Self {
        Self {
            history,
            shape,
            objects: NdjsonStream::new(bytes),
            text: String::new(),
            state: ReplyState::Streaming,
        }
    }

    pub fn shape(&self) -> RequestShape {
        self.shape
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_finished(&self) -> bool {
        self.state == ReplyState::Finished
    }

    /// Stops the reply, closing the connection. Returns the partial text, which is not
    /// added to the conversation.
    pub fn cancel(self) -> String {
        if self.state == ReplyState::Streaming {
            info!("Reply cancelled after {} byte(s)", self.text.len());
        }
        self.text
    }

    /// Drives the stream to the end and returns the full reply.
    pub async fn collect_text(mut self) -> Result<String, TransportError> {
        while let Some(fragment) = self.next().await {
            fragment?;
        }
        Ok(self.text)
    }

    fn commit(&mut self) {
        self.state = ReplyState::Finished;
        debug!("Reply finished, committing {} byte(s)", self.text.len());
        self.history.push(ChatMessage::assistant(self.text.clone()));
    }

    fn fail(&mut self, err: TransportError) -> Poll<Option<Result<String, TransportError>>> {
        self.state = ReplyState::Failed;
        warn!("Reply failed after {} byte(s): {}", self.text.len(), err);
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for ReplyStream<'_> {
    type Item = Result<String, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != ReplyState::Streaming {
            return Poll::Ready(None);
        }

        loop {
            match ready!(this.objects.poll_next_unpin(cx)) {
                Some(Ok(object)) => {
                    if let Some(message) = object.get("error").and_then(|e| e.as_str()) {
                        return this.fail(TransportError::Remote(message.to_string()));
                    }
                    match this.shape.fragment(&object) {
                        Some(fragment) if !fragment.is_empty() => {
                            this.text.push_str(fragment);
                            return Poll::Ready(Some(Ok(fragment.to_string())));
                        }
                        _ => {
                            continue;
                        }
                    }
                }
                Some(Err(err)) => {
                    return this.fail(err);
                }
                None => {
                    this.commit();
                    return Poll::Ready(None);
                }
            }
        }
    }
}
