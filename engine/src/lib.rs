use crate::{image_model::ImageModel, llm::LLM};

pub mod config;
pub mod enhance;
pub mod image_model;
pub mod llm;
pub mod prompt_templates;
pub mod service;
pub mod sticker;
pub mod style;

#[cfg(test)]
mod testing;

pub use image_model::Model;
pub use service::{GenerationMetadata, StickerService};
pub use style::Style;

pub type LLMBox = Box<dyn LLM + Send + Sync>;
pub type ImgModBox = Box<dyn ImageModel + Send + Sync>;

/// Longest side of a finished sticker, in pixels.
pub const STICKER_MAX_SIZE: u32 = 512;
/// Upper bound for the encoded sticker file.
pub const STICKER_FILE_SIZE_LIMIT: usize = 512 * 1024;
