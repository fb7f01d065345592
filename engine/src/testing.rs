//! In-memory stand-ins for the providers.

use std::{
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use color_eyre::{Result, eyre::eyre};
use serde_json::Value;

use crate::{
    ImgModBox, LLMBox,
    image_model::{Image, ImageModel, Model},
    llm::{LLM, LLMStream, OutputMessage, Request, ResponseFragment},
};

#[derive(Clone)]
pub struct FakeLlm {
    reply: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl FakeLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.into()),
            calls: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LLM for FakeLlm {
    fn send_request_stream(&mut self, _req: Request) -> LLMStream<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let items = match &self.reply {
            Some(text) => vec![
                Ok(ResponseFragment::TextDelta(text.clone())),
                Ok(ResponseFragment::MessageComplete(OutputMessage {
                    input_tokens: 1,
                    output_tokens: 1,
                    text: text.clone(),
                })),
            ],
            None => vec![Err(eyre!("LLM API error 500: boom"))],
        };
        Box::pin(tokio_stream::iter(items))
    }

    fn clone_box(&self) -> LLMBox {
        Box::new(self.clone())
    }
}

#[derive(Clone, Default)]
pub struct FakeImageModel {
    fail: bool,
    last_request: Arc<Mutex<Option<(Model, Value)>>>,
}

impl FakeImageModel {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn last_request(&self) -> Option<(Model, Value)> {
        self.last_request.lock().unwrap().clone()
    }
}

pub const FAKE_IMAGE_URL: &str = "https://replicate.delivery/fake/out.png";

impl ImageModel for FakeImageModel {
    fn get_image<'a>(
        &'a self,
        model: Model,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Image>> + Send + 'a>> {
        Box::pin(async move {
            *self.last_request.lock().unwrap() = Some((model, input));
            if self.fail {
                return Err(eyre!("Download failed: 500"));
            }
            Ok(Image {
                data: vec![1, 2, 3],
                url: FAKE_IMAGE_URL.into(),
            })
        })
    }

    fn clone_box(&self) -> ImgModBox {
        Box::new(self.clone())
    }
}
