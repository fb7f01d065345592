use std::pin::Pin;

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{ImgModBox, style::Style};

pub mod replicate;
pub use replicate::ReplicateImageModel;

#[derive(
    Debug,
    Clone,
    Copy,
    Display,
    EnumString,
    IntoStaticStr,
    clap::ValueEnum,
    Serialize,
    Deserialize,
    Hash,
    PartialEq,
    Eq,
    EnumIter,
    Default,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Model {
    #[default]
    StickerMaker,
    SdxlLightning,
    Flux,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelInfo {
    pub key: &'static str,
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Fixed hyperparameters of a model, before the prompt is added.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelParams {
    StickerMaker {
        width: u32,
        height: u32,
        num_outputs: u32,
        output_format: &'static str,
        remove_background: bool,
        steps: u32,
        guidance: f64,
    },
    SdxlLightning {
        width: u32,
        height: u32,
        num_outputs: u32,
        output_format: &'static str,
    },
    Flux {
        aspect_ratio: &'static str,
        output_format: &'static str,
        go_fast: bool,
        num_inference_steps: u32,
    },
}

impl Model {
    /// Lenient lookup, anything unknown becomes [`Model::StickerMaker`].
    pub fn from_key(key: &str) -> Self {
        key.parse().unwrap_or_default()
    }

    pub fn key(&self) -> &'static str {
        self.into()
    }

    /// Replicate identifier, either `owner/name:version` or `owner/name`.
    pub fn id(&self) -> &'static str {
        match self {
            Model::StickerMaker => {
                "fofr/sticker-maker:4acb778eb059772225ec213948f0660867b2e03f277448f18cf1800b96a65a1a"
            }
            Model::SdxlLightning => {
                "bytedance/sdxl-lightning-4step:5f24084160c9089501c1b3545d9be3c27883ae2239b6f412990e82d4a6210f8f"
            }
            Model::Flux => "black-forest-labs/flux-schnell",
        }
    }

    pub fn info(&self) -> ModelInfo {
        let (name, description) = match self {
            Model::StickerMaker => (
                "Sticker Maker (Recommended)",
                "Specialized model for stickers",
            ),
            Model::SdxlLightning => ("SDXL Lightning (Fast)", "Very fast generation"),
            Model::Flux => ("Flux (Maximum accuracy)", "Best prompt adherence"),
        };

        ModelInfo {
            key: self.key(),
            id: self.id(),
            name,
            description,
        }
    }

    pub fn catalog() -> Vec<ModelInfo> {
        Model::iter().map(|m| m.info()).collect()
    }

    pub fn params(&self) -> ModelParams {
        match self {
            Model::StickerMaker => ModelParams::StickerMaker {
                width: 512,
                height: 512,
                num_outputs: 1,
                output_format: "png",
                remove_background: true,
                steps: 20,
                guidance: 7.5,
            },
            Model::SdxlLightning => ModelParams::SdxlLightning {
                width: 1024,
                height: 1024,
                num_outputs: 1,
                output_format: "png",
            },
            Model::Flux => ModelParams::Flux {
                aspect_ratio: "1:1",
                output_format: "png",
                go_fast: true,
                num_inference_steps: 4,
            },
        }
    }

    /// The `input` object of a prediction request.
    pub fn build_input(&self, prompt: &str, style: Style) -> Value {
        match self.params() {
            ModelParams::StickerMaker {
                width,
                height,
                num_outputs,
                output_format,
                remove_background,
                steps,
                guidance,
            } => json!({
                "prompt": prompt,
                "negative_prompt": style.negative(),
                "width": width,
                "height": height,
                "num_outputs": num_outputs,
                "output_format": output_format,
                "remove_background": remove_background,
                "num_inference_steps": steps,
                "guidance_scale": guidance,
            }),
            ModelParams::SdxlLightning {
                width,
                height,
                num_outputs,
                output_format,
            } => json!({
                "prompt": prompt,
                "width": width,
                "height": height,
                "num_outputs": num_outputs,
                "output_format": output_format,
            }),
            ModelParams::Flux {
                aspect_ratio,
                output_format,
                go_fast,
                num_inference_steps,
            } => json!({
                "prompt": prompt,
                "aspect_ratio": aspect_ratio,
                "output_format": output_format,
                "go_fast": go_fast,
                "num_inference_steps": num_inference_steps,
            }),
        }
    }
}

pub struct Image {
    pub data: Vec<u8>,
    /// Where the provider served the image from.
    pub url: String,
}

pub trait ImageModel {
    fn get_image<'a>(
        &'a self,
        model: Model,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Image>> + Send + 'a>>;

    fn clone_box(&self) -> ImgModBox;
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    #[test]
    fn unknown_key_falls_back_to_sticker_maker() {
        assert_eq!(Model::from_key("flux"), Model::Flux);
        assert_eq!(Model::from_key("sdxl-lightning"), Model::SdxlLightning);
        assert_eq!(Model::from_key("dall-e"), Model::StickerMaker);
    }

    #[test]
    fn catalog_lists_every_model_in_order() {
        let keys: Vec<_> = Model::catalog().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, ["sticker-maker", "sdxl-lightning", "flux"]);
        assert_eq!(Model::Flux.info().name, "Flux (Maximum accuracy)");
    }

    #[test]
    fn sticker_maker_input() {
        let input = Model::StickerMaker.build_input("a cat", Style::Pixel);
        let expect = expect![[r#"{"guidance_scale":7.5,"height":512,"negative_prompt":"smooth, realistic, high resolution","num_inference_steps":20,"num_outputs":1,"output_format":"png","prompt":"a cat","remove_background":true,"width":512}"#]];
        expect.assert_eq(&serde_json::to_string(&input).unwrap());
    }

    #[test]
    fn sdxl_input_has_no_negative_prompt() {
        let input = Model::SdxlLightning.build_input("a cat", Style::Pixel);
        let expect = expect![[r#"{"height":1024,"num_outputs":1,"output_format":"png","prompt":"a cat","width":1024}"#]];
        expect.assert_eq(&serde_json::to_string(&input).unwrap());
    }

    #[test]
    fn flux_input() {
        let input = Model::Flux.build_input("a cat", Style::Anime);
        let expect = expect![[r#"{"aspect_ratio":"1:1","go_fast":true,"num_inference_steps":4,"output_format":"png","prompt":"a cat"}"#]];
        expect.assert_eq(&serde_json::to_string(&input).unwrap());
    }
}
