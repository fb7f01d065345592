use std::{future::Future, pin::Pin, time::Duration};

use color_eyre::{Result, eyre::WrapErr};
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

use crate::{ImgModBox, image_model::Model};

use super::{Image, ImageModel};

mod error;
pub use error::ReplicateError;

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct ReplicateImageModel {
    client: Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl ReplicateImageModel {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Versioned identifiers go through `/v1/predictions`, bare `owner/name`
    /// identifiers through the model's own predictions endpoint.
    fn create_request(&self, model: Model, input: Value) -> (String, Value) {
        match model.id().split_once(':') {
            Some((_, version)) => (
                format!("{}/v1/predictions", self.base_url),
                json!({
                    "version": version,
                    "input": input,
                }),
            ),
            None => (
                format!("{}/v1/models/{}/predictions", self.base_url, model.id()),
                json!({ "input": input }),
            ),
        }
    }

    /// Runs a prediction to completion and returns the URL of the first output.
    /// Fails once the configured timeout has passed, including time spent
    /// waiting on a stalled request.
    pub async fn run(&self, model: Model, input: Value) -> Result<String> {
        self.within_timeout(self.predict(model, input)).await
    }

    async fn within_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(ReplicateError::TimedOut {
                secs: self.timeout.as_secs(),
            }
            .into()),
        }
    }

    async fn predict(&self, model: Model, input: Value) -> Result<String> {
        let (url, body) = self.create_request(model, input);
        debug!("Creating prediction at {url}: {body}");

        let create_resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("creating prediction")?;

        let status = create_resp.status();
        let body = create_resp.text().await?;
        if !status.is_success() {
            Err(ReplicateError::Create {
                status: status.as_u16(),
                body: body.clone(),
            })?;
        }

        let prediction: PredictionResponse = serde_json::from_str(&body)?;
        let prediction_url = prediction
            .urls
            .and_then(|u| u.get)
            .ok_or(ReplicateError::MissingGetUrl { response: body })?;

        loop {
            let resp = self
                .client
                .get(&prediction_url)
                .bearer_auth(&self.api_key)
                .send()
                .await?
                .error_for_status()?
                .json::<PredictionResponse>()
                .await?;

            match resp.status.as_str() {
                "succeeded" => {
                    return Ok(resp
                        .output
                        .and_then(PredictionOutput::into_first_url)
                        .ok_or(ReplicateError::NoOutput)?);
                }
                "failed" | "canceled" => {
                    Err(ReplicateError::PredictionFailed {
                        message: resp
                            .error
                            .map(|e| match e {
                                Value::String(message) => message,
                                other => other.to_string(),
                            })
                            .unwrap_or_else(|| "no error message".into()),
                        status: resp.status,
                    })?;
                }
                other => {
                    debug!("Prediction status: {other}");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            Err(ReplicateError::Download {
                status: status.as_u16(),
            })?;
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    status: String,
    #[serde(default)]
    output: Option<PredictionOutput>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

/// Models either return a list of files or a single one.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
enum PredictionOutput {
    Many(Vec<String>),
    One(String),
}

impl PredictionOutput {
    fn into_first_url(self) -> Option<String> {
        match self {
            PredictionOutput::Many(urls) => urls.into_iter().next(),
            PredictionOutput::One(url) => Some(url),
        }
    }
}

impl ImageModel for ReplicateImageModel {
    fn get_image<'a>(
        &'a self,
        model: Model,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Image>> + Send + 'a>> {
        Box::pin(self.within_timeout(async move {
            let url = self.predict(model, input).await?;
            let data = self.download(&url).await?;
            Ok(Image { data, url })
        }))
    }

    fn clone_box(&self) -> ImgModBox {
        Box::new(Clone::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;

    fn model_for(server: &MockServer) -> ReplicateImageModel {
        ReplicateImageModel::new("r8_test".into())
            .with_base_url(server.uri())
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout(Duration::from_secs(5))
    }

    async fn mount_image(server: &MockServer) -> String {
        Mock::given(method("GET"))
            .and(path("/files/out.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![137u8, 80, 78, 71]))
            .mount(server)
            .await;
        format!("{}/files/out.png", server.uri())
    }

    #[test]
    fn output_accepts_list_or_string() {
        let many: PredictionOutput = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(many.into_first_url().as_deref(), Some("a"));

        let one: PredictionOutput = serde_json::from_str(r#""a""#).unwrap();
        assert_eq!(one.into_first_url().as_deref(), Some("a"));

        let empty: PredictionOutput = serde_json::from_str("[]").unwrap();
        assert_eq!(empty.into_first_url(), None);
    }

    #[tokio::test]
    async fn versioned_model_polls_until_succeeded() -> Result<()> {
        let server = MockServer::start().await;
        let image_url = mount_image(&server).await;
        let get_url = format!("{}/v1/predictions/abc", server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .and(header("authorization", "Bearer r8_test"))
            .and(body_partial_json(json!({
                "version": "4acb778eb059772225ec213948f0660867b2e03f277448f18cf1800b96a65a1a",
                "input": { "prompt": "a cat" },
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "abc",
                "status": "starting",
                "urls": { "get": get_url },
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/predictions/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "processing",
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/predictions/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "succeeded",
                "output": [image_url],
            })))
            .mount(&server)
            .await;

        let model = model_for(&server);
        let image = model
            .get_image(Model::StickerMaker, json!({ "prompt": "a cat" }))
            .await?;

        assert_eq!(image.url, image_url);
        assert_eq!(image.data, vec![137u8, 80, 78, 71]);
        Ok(())
    }

    #[tokio::test]
    async fn unversioned_model_uses_model_endpoint() -> Result<()> {
        let server = MockServer::start().await;
        let image_url = mount_image(&server).await;
        let get_url = format!("{}/v1/predictions/xyz", server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/models/black-forest-labs/flux-schnell/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "starting",
                "urls": { "get": get_url },
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/predictions/xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "succeeded",
                "output": image_url,
            })))
            .mount(&server)
            .await;

        let url = model_for(&server)
            .run(Model::Flux, json!({ "prompt": "a cat" }))
            .await?;
        assert_eq!(url, image_url);
        Ok(())
    }

    #[tokio::test]
    async fn failed_prediction_is_an_error() {
        let server = MockServer::start().await;
        let get_url = format!("{}/v1/predictions/bad", server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "starting",
                "urls": { "get": get_url },
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/predictions/bad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "failed",
                "error": "NSFW content detected",
            })))
            .mount(&server)
            .await;

        let err = model_for(&server)
            .run(Model::SdxlLightning, json!({ "prompt": "a cat" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("NSFW content detected"), "{err}");
    }

    #[tokio::test]
    async fn rejected_creation_reports_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid input"))
            .mount(&server)
            .await;

        let err = model_for(&server)
            .run(Model::StickerMaker, json!({}))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("422") && msg.contains("invalid input"), "{msg}");
    }

    #[tokio::test]
    async fn slow_prediction_times_out() {
        let server = MockServer::start().await;
        let get_url = format!("{}/v1/predictions/slow", server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "starting",
                "urls": { "get": get_url },
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/predictions/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "processing",
            })))
            .mount(&server)
            .await;

        let err = model_for(&server)
            .with_timeout(Duration::from_millis(30))
            .run(Model::StickerMaker, json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish"), "{err}");
    }

    #[tokio::test]
    async fn stalled_poll_hits_overall_timeout() {
        let server = MockServer::start().await;
        let get_url = format!("{}/v1/predictions/hang", server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "starting",
                "urls": { "get": get_url },
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/predictions/hang"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": "processing" }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let err = model_for(&server)
            .with_timeout(Duration::from_millis(100))
            .run(Model::StickerMaker, json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn stalled_download_hits_overall_timeout() {
        let server = MockServer::start().await;
        let get_url = format!("{}/v1/predictions/abc", server.uri());
        let image_url = format!("{}/files/slow.png", server.uri());

        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "starting",
                "urls": { "get": get_url },
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/predictions/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "succeeded",
                "output": [image_url],
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/files/slow.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8])
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let model = model_for(&server).with_timeout(Duration::from_millis(200));
        let err = model
            .get_image(Model::StickerMaker, json!({}))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("did not finish"), "{err}");
    }

    #[tokio::test]
    async fn download_failure_reports_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = model_for(&server)
            .download(&format!("{}/files/gone.png", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Download failed: 404");
    }

    #[tokio::test]
    async fn download_requires_ok_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files/empty.png"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let err = model_for(&server)
            .download(&format!("{}/files/empty.png", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Download failed: 204");
    }
}
