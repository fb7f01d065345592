use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM stream ended without a complete message")]
    Incomplete,

    #[error("LLM returned an empty response")]
    EmptyResponse,
}
