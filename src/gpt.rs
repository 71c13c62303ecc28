pub mod chat;
pub mod client;

pub use chat::{ChatBot, ChatHistory, ChatModel};
pub use client::{
    GptClient, GptClientError, GptClientErrorKind, GptClientOption, Message, OpenAIKey,
    OpenAIModel, Result, Role,
};
