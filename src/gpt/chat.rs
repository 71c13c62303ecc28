use super::client::{ChatRequest, GptClient, Message, Result};

/// Chronological transcript of one session. Messages are only ever appended.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatHistory {
    inner: Vec<Message>,
}
impl ChatHistory {
    pub fn new() -> Self {
        Self { inner: Vec::new() }
    }
    pub fn with_system(prompt: impl Into<String>) -> Self {
        let mut history = Self::new();
        history.push(Message::system(prompt));
        history
    }
    pub fn push(&mut self, message: Message) -> &[Message] {
        self.inner.push(message);
        &self.inner
    }
    pub fn push_request(&mut self, message: impl Into<String>) -> &[Message] {
        self.push(Message::user(message))
    }
    pub fn all(&self) -> &[Message] {
        &self.inner
    }
    pub fn len(&self) -> usize {
        self.inner.len()
    }
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// A remote text-completion capability: ordered messages in, one message out.
pub trait ChatModel {
    fn complete(&self, messages: &[Message]) -> Result<Message>;
}

impl<M: ChatModel> ChatModel for &M {
    fn complete(&self, messages: &[Message]) -> Result<Message> {
        (**self).complete(messages)
    }
}

impl ChatModel for GptClient {
    fn complete(&self, messages: &[Message]) -> Result<Message> {
        self.request(&ChatRequest::new(self.model().clone(), messages.to_vec()))
    }
}

/// Produces one assistant message per turn. Holds nothing but the model handle.
pub struct ChatBot<M: ChatModel> {
    model: M,
}
impl<M: ChatModel> ChatBot<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
    pub fn respond(&self, history: &ChatHistory) -> Result<Message> {
        let reply = self.model.complete(history.all())?;
        Ok(Message::assistant(reply.content()))
    }
    /// Appends the user input, then the reply. On failure only the user input has been appended.
    pub fn turn<'a>(&self, history: &'a mut ChatHistory, input: &str) -> Result<&'a Message> {
        history.push_request(input);
        let reply = self.respond(history)?;
        let all = history.push(reply);
        Ok(&all[all.len() - 1])
    }
}


#[cfg(test)]
pub mod fakes {
    use std::cell::RefCell;

    use super::*;
    use crate::gpt::client::{GptClientError, GptClientErrorKind};

    /// Replies with the content of the last message it was given.
    pub struct EchoModel;
    impl ChatModel for EchoModel {
        fn complete(&self, messages: &[Message]) -> Result<Message> {
            Ok(Message::assistant(
                messages.last().map(|m| m.content()).unwrap_or_default(),
            ))
        }
    }

    pub struct FailingModel {
        kind: GptClientErrorKind,
    }
    impl FailingModel {
        pub fn auth() -> Self {
            Self {
                kind: GptClientErrorKind::AuthError,
            }
        }
        pub fn network() -> Self {
            Self {
                kind: GptClientErrorKind::NetworkError,
            }
        }
    }
    impl ChatModel for FailingModel {
        fn complete(&self, _messages: &[Message]) -> Result<Message> {
            Err(GptClientError::new(
                "stub failure".to_string(),
                self.kind.clone(),
            ))
        }
    }

    pub struct RecordingModel {
        received: RefCell<Vec<Vec<Message>>>,
    }
    impl RecordingModel {
        pub fn new() -> Self {
            Self {
                received: RefCell::new(Vec::new()),
            }
        }
        pub fn received(&self) -> Vec<Vec<Message>> {
            self.received.borrow().clone()
        }
    }
    impl ChatModel for RecordingModel {
        fn complete(&self, messages: &[Message]) -> Result<Message> {
            self.received.borrow_mut().push(messages.to_vec());
            Ok(Message::assistant(format!("reply {}", self.received.borrow().len())))
        }
    }
}
