use std::time::Instant;

use chrono::{DateTime, Local};
use color_eyre::{Result, eyre::WrapErr};
use log::{info, warn};
use serde::Serialize;

use crate::{
    ImgModBox, LLMBox,
    config::Config,
    enhance::PromptEnhancer,
    image_model::{Image, Model, ModelInfo, ReplicateImageModel},
    llm::OpenAIChat,
    prompt_templates::PromptTemplate,
    style::Style,
};

/// Everything known about one generated sticker besides its bytes. `style`
/// and `model` echo what the caller asked for, even when an unknown name fell
/// back to the default.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationMetadata {
    pub prompt: String,
    pub enhanced_prompt: String,
    pub style: String,
    pub model: String,
    /// Seconds from request to downloaded image.
    pub generation_time: f64,
    pub image_url: String,
    pub needs_background: bool,
    pub timestamp: DateTime<Local>,
}

pub struct StickerService {
    imgmod: ImgModBox,
    enhancer: PromptEnhancer,
    current_model: Model,
}

impl Clone for StickerService {
    fn clone(&self) -> Self {
        Self {
            imgmod: self.imgmod.clone_box(),
            enhancer: self.enhancer.clone(),
            current_model: self.current_model,
        }
    }
}

impl StickerService {
    pub fn new(imgmod: ImgModBox, llm: Option<LLMBox>) -> Self {
        Self {
            imgmod,
            enhancer: PromptEnhancer::new(llm),
            current_model: Model::default(),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let token = cfg.replicate_token()?;
        let imgmod = ReplicateImageModel::new(token)
            .with_poll_interval(cfg.poll_interval())
            .with_timeout(cfg.generation_timeout());

        let llm = cfg.llm.as_ref().map(|llm| -> LLMBox {
            Box::new(OpenAIChat::new(
                llm.api_key.clone(),
                llm.base_url.clone(),
                llm.model.clone(),
            ))
        });

        let mut service = Self::new(Box::new(imgmod), llm);
        service.current_model = cfg.default_model;
        Ok(service)
    }

    /// Enhances `prompt`, runs it through `model` (or the current model) and
    /// downloads the result. Unknown style and model names fall back to the
    /// defaults.
    pub async fn generate_sticker(
        &self,
        prompt: &str,
        style: &str,
        model: Option<&str>,
    ) -> Result<(Vec<u8>, GenerationMetadata)> {
        self.generate_sticker_with_template(prompt, style, model, None)
            .await
    }

    /// Like [`Self::generate_sticker`], but the LLM rewrite follows `template`.
    pub async fn generate_sticker_with_template(
        &self,
        prompt: &str,
        style: &str,
        model: Option<&str>,
        template: Option<&PromptTemplate>,
    ) -> Result<(Vec<u8>, GenerationMetadata)> {
        let start = Instant::now();
        let style_name = style;
        let model_name = model.unwrap_or(self.current_model.key());
        let style = Style::from_name(style_name);
        let model = Model::from_key(model_name);

        let (enhanced_prompt, needs_background) =
            self.enhancer.enhance(prompt, style, template).await;

        let input = model.build_input(&enhanced_prompt, style);
        info!(
            "Generating with {model}: {}...",
            enhanced_prompt.chars().take(100).collect::<String>()
        );
        info!("Style: {style_name}, Background needed: {needs_background}");

        let Image { data, url } = self
            .imgmod
            .get_image(model, input)
            .await
            .wrap_err("Generation error")?;

        let generation_time = start.elapsed().as_secs_f64();
        info!("Successfully generated sticker in {generation_time:.2}s");

        Ok((
            data,
            GenerationMetadata {
                prompt: prompt.into(),
                enhanced_prompt,
                style: style_name.into(),
                model: model_name.into(),
                generation_time,
                image_url: url,
                needs_background,
                timestamp: Local::now(),
            },
        ))
    }

    /// Switches the default model. Unknown keys leave the current one in place.
    pub fn set_model(&mut self, key: &str) -> bool {
        match key.parse::<Model>() {
            Ok(model) => {
                self.current_model = model;
                info!("Switched to model: {model}");
                true
            }
            Err(_) => {
                warn!("Unknown model: {key}, keeping {}", self.current_model);
                false
            }
        }
    }

    pub fn available_models(&self) -> Vec<ModelInfo> {
        Model::catalog()
    }

    pub fn current_model(&self) -> Model {
        self.current_model
    }

    pub fn has_llm(&self) -> bool {
        self.enhancer.has_llm()
    }
}
