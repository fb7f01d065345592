use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

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
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Cartoon,
    Anime,
    Realistic,
    Pixel,
    Minimalist,
    Cute,
}

impl Style {
    /// Exact, case-sensitive lookup. Anything unknown becomes
    /// [`Style::Cartoon`].
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn positive(&self) -> &'static str {
        match self {
            Style::Cartoon => "cartoon style, flat colors, simple design, cute, kawaii",
            Style::Anime => "anime style, manga, japanese animation, expressive",
            Style::Realistic => "photorealistic, detailed, high quality",
            Style::Pixel => "pixel art, 8-bit, retro game style, pixelated",
            Style::Minimalist => "minimalist, simple shapes, flat design, clean",
            Style::Cute => "kawaii, chibi, adorable, big eyes, cute style",
        }
    }

    pub fn negative(&self) -> &'static str {
        match self {
            Style::Cartoon => "realistic, complex, detailed, photographic",
            Style::Anime => "western cartoon, realistic, 3d render",
            Style::Realistic => "cartoon, anime, illustration, drawing",
            Style::Pixel => "smooth, realistic, high resolution",
            Style::Minimalist => "complex, detailed, realistic, busy",
            Style::Cute => "scary, realistic, dark, serious",
        }
    }

    /// Only these styles are worth an LLM round trip, the others do fine with
    /// the fixed fragments.
    pub fn uses_llm_enhancement(&self) -> bool {
        matches!(self, Style::Realistic | Style::Anime)
    }
}
