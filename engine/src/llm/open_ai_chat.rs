use async_stream::try_stream;
use color_eyre::eyre::Context;
use eventsource_stream::Eventsource;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::LLMBox;

use super::{LLM, LLMStream, LlmError, OutputMessage, Request, ResponseFragment};

/// Gemini's OpenAI-compatible chat endpoint.
pub const GEMINI_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
pub const GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct OpenAIChat {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIChat {
    pub fn new(api_key: String, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub fn gemini(api_key: String) -> Self {
        Self::new(api_key, GEMINI_BASE_URL, GEMINI_MODEL)
    }
}

impl LLM for OpenAIChat {
    fn send_request_stream(&mut self, req: Request) -> LLMStream<'_> {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let url = self.base_url.clone();
        let model = self.model.clone();

        Box::pin(try_stream! {
            let body = OpenAIChatRequest::new(model, req);

            let res = client
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await.context("initial response")?;

            if !res.status().is_success() {
                let status = res.status().as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(LlmError::Api { status, body })?;
            } else {
                let stream = res.bytes_stream().eventsource();
                tokio::pin!(stream);

                let mut full_text = String::new();
                let mut input_tokens = 0usize;
                let mut output_tokens = 0usize;

                while let Some(event) = stream.next().await {
                    let event = event.context("reading event stream")?;

                    match parse_event_data(&event.data)? {
                        EventData::Done => {
                            yield ResponseFragment::MessageComplete(OutputMessage {
                                input_tokens,
                                output_tokens,
                                text: full_text.clone(),
                            });
                            return;
                        }
                        EventData::Chunk(chunk) => {
                            if let Some(content) = chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
                                output_tokens += 1; // token estimate; provider may differ
                                full_text.push_str(&content);
                                yield ResponseFragment::TextDelta(content);
                            }

                            if let Some(usage) = chunk.usage {
                                input_tokens = usage.prompt_tokens;
                                output_tokens = usage.completion_tokens;
                            }
                        }
                    }
                }

                debug!("Stream ended without [DONE]");
                yield ResponseFragment::MessageComplete(OutputMessage {
                    input_tokens,
                    output_tokens,
                    text: full_text,
                });
            }
        })
    }

    fn clone_box(&self) -> LLMBox {
        Box::new(Clone::clone(self))
    }
}

#[derive(Debug)]
enum EventData {
    Done,
    Chunk(OpenAIStreamChunk),
}

fn parse_event_data(data: &str) -> color_eyre::Result<EventData> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(EventData::Done);
    }

    Ok(EventData::Chunk(
        serde_json::from_str(data).context("parsing stream chunk")?,
    ))
}

//
// ===== OpenAI wire types =====
//

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: usize,
    stream: bool,
}

impl OpenAIChatRequest {
    fn new(model: String, req: Request) -> Self {
        let mut messages = Vec::new();

        if let Some(system) = req.system {
            messages.push(OpenAIMessage {
                role: "system",
                content: system,
            });
        }

        for msg in req.messages {
            messages.push(OpenAIMessage {
                role: msg.role.as_str(),
                content: msg.content,
            });
        }

        Self {
            model,
            messages,
            max_tokens: req.max_tokens,
            stream: true,
        }
    }
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize, Debug)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize, Debug)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod test {
    use expect_test::expect;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use crate::llm::complete;

    use super::*;

    fn request() -> Request {
        Request::single(Some("Be brief".into()), "a cat".into(), 200)
    }

    #[test]
    fn request_serialization() {
        let body = OpenAIChatRequest::new("model".into(), request());
        let expect = expect![[r#"{"model":"model","messages":[{"role":"system","content":"Be brief"},{"role":"user","content":"a cat"}],"max_tokens":200,"stream":true}"#]];
        expect.assert_eq(&serde_json::to_string(&body).unwrap());
    }

    #[test]
    fn event_data() {
        assert!(matches!(parse_event_data("[DONE]").unwrap(), EventData::Done));
        let EventData::Chunk(chunk) =
            parse_event_data(r#"{"choices":[{"delta":{"content":"hi"}}]}"#).unwrap()
        else {
            panic!("expected a chunk");
        };
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hi"));
        assert!(parse_event_data("{not json").is_err());
    }

    #[tokio::test]
    async fn collects_streamed_message() -> color_eyre::Result<()> {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"a fluffy \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"cat\"}}],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":3}}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let mut llm = OpenAIChat::new(
            "key".into(),
            format!("{}/chat/completions", server.uri()),
            "gemini-1.5-flash",
        );
        let msg = complete(&mut llm, request()).await?;

        assert_eq!(msg.text, "a fluffy cat");
        assert_eq!(msg.input_tokens, 12);
        assert_eq!(msg.output_tokens, 3);
        Ok(())
    }

    #[tokio::test]
    async fn stream_without_done_still_completes() -> color_eyre::Result<()> {
        let server = MockServer::start().await;
        let body = concat!(
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"a red \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"fox\"}}]}\n\n",
        );

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let mut llm = OpenAIChat::new("key".into(), server.uri(), "m");
        let msg = complete(&mut llm, request()).await?;
        assert_eq!(msg.text, "a red fox");
        assert_eq!(msg.output_tokens, 2);
        Ok(())
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let mut llm = OpenAIChat::new("key".into(), server.uri(), "m");
        let err = complete(&mut llm, request()).await.unwrap_err();
        assert_eq!(err.to_string(), "LLM API error 429: slow down");
    }
}
