//! Chat model access used for prompt rewriting.

use std::pin::Pin;

use color_eyre::Result;
use log::debug;
use tokio_stream::{Stream, StreamExt};

use crate::LLMBox;

pub trait LLM {
    fn send_request_stream(&mut self, req: Request) -> LLMStream<'_>;
    fn clone_box(&self) -> LLMBox;
}

pub type LLMStream<'a> = Pin<Box<dyn Stream<Item = Result<ResponseFragment>> + Send + 'a>>;

#[derive(Debug)]
pub enum ResponseFragment {
    TextDelta(String),
    MessageComplete(OutputMessage),
}

#[derive(Debug)]
pub struct Request {
    pub system: Option<String>,
    pub messages: Vec<InputMessage>,
    pub max_tokens: usize,
}

impl Request {
    /// A single user turn, optionally preceded by a system prompt.
    pub fn single(system: Option<String>, user_message: String, max_tokens: usize) -> Self {
        Self {
            system,
            messages: vec![InputMessage::user(user_message)],
            max_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputMessage {
    pub role: Role,
    pub content: String,
}

impl InputMessage {
    pub fn user(content: String) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputMessage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Drives a response stream to its end and returns the complete message.
pub async fn complete(llm: &mut (dyn LLM + Send + Sync), req: Request) -> Result<OutputMessage> {
    let mut stream = llm.send_request_stream(req);
    let mut output = None;
    while let Some(fragment) = stream.try_next().await? {
        if let ResponseFragment::MessageComplete(msg) = fragment {
            output = Some(msg);
        }
    }

    let msg = output.ok_or(LlmError::Incomplete)?;
    debug!(
        "LLM used {} input and {} output tokens",
        msg.input_tokens, msg.output_tokens
    );
    Ok(msg)
}

mod error;
pub use error::LlmError;

pub mod open_ai_chat;
pub use open_ai_chat::OpenAIChat;
