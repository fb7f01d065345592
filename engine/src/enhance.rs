use color_eyre::Result;
use log::{info, warn};

use crate::{
    LLMBox,
    llm::{self, LlmError, Request},
    prompt_templates::PromptTemplate,
    style::Style,
};

const LOCATION_INDICATORS: &[&str] = &[
    "в ", "на ", "под ", "около ", "у ", "возле ", "in ", "on ", "at ", "near ", "by ", "under ",
];

const LOCATIONS: &[&str] = &[
    "космос", "лес", "море", "город", "дом", "офис", "парк", "горы", "пустыня", "пляж", "улица",
    "комната", "кухня", "space", "forest", "ocean", "city", "house", "office", "park",
];

const MAX_ENHANCEMENT_TOKENS: usize = 300;

/// Whether the prompt places its subject somewhere, which means the sticker
/// should keep its surroundings instead of an isolated subject.
pub fn needs_background(prompt: &str) -> bool {
    let prompt_lower = prompt.to_lowercase();

    let needed = LOCATION_INDICATORS
        .iter()
        .any(|indicator| prompt_lower.contains(indicator))
        && LOCATIONS
            .iter()
            .any(|location| prompt_lower.contains(location));

    if needed {
        info!("Background needed for prompt: {prompt}");
    }
    needed
}

pub fn basic(prompt: &str, style: Style, needs_background: bool) -> String {
    let style_addition = style.positive();

    let mut enhanced = if needs_background {
        format!("{prompt}, {style_addition}, detailed environment, sticker design")
    } else {
        format!(
            "{prompt}, {style_addition}, white background, isolated character, centered, sticker"
        )
    };

    enhanced.push_str(", high quality, clear details");
    enhanced
}

/// Removes whitespace and any wrapping quotes the model added.
fn clean_llm_output(text: &str) -> &str {
    text.trim().trim_matches('"').trim_matches('\'')
}

pub struct PromptEnhancer {
    llm: Option<LLMBox>,
}

impl Clone for PromptEnhancer {
    fn clone(&self) -> Self {
        Self {
            llm: self.llm.as_ref().map(|llm| llm.clone_box()),
        }
    }
}

impl PromptEnhancer {
    pub fn new(llm: Option<LLMBox>) -> Self {
        if llm.is_none() {
            warn!("No LLM configured, using basic prompt enhancement");
        }
        Self { llm }
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Returns the prompt to send to the image model and whether it needs a
    /// background. Never fails: when the LLM is unavailable or errors, the
    /// basic enhancement is used.
    pub async fn enhance(
        &self,
        prompt: &str,
        style: Style,
        template: Option<&PromptTemplate>,
    ) -> (String, bool) {
        let needs_background = needs_background(prompt);
        let base_enhancement = basic(prompt, style, needs_background);

        if let Some(llm) = &self.llm
            && style.uses_llm_enhancement()
        {
            match enhance_with_llm(llm, prompt, style, needs_background, template).await {
                Ok(enhanced) => {
                    info!("LLM enhanced: {prompt} -> {enhanced}");
                    return (enhanced, needs_background);
                }
                Err(e) => warn!("LLM enhancement failed, using basic: {e}"),
            }
        }

        (base_enhancement, needs_background)
    }
}

fn build_request(
    prompt: &str,
    style: Style,
    needs_background: bool,
    template: Option<&PromptTemplate>,
) -> Request {
    let background_instruction = if needs_background {
        "with detailed environment and background"
    } else {
        "on white background, isolated object, no environment"
    };

    let mut instruction = indoc::formatdoc! {r#"
        Enhance this prompt for a Telegram sticker in {style} style.
        Original: "{prompt}"

        Requirements:
        - Make it more descriptive and specific
        - Keep the main subject unchanged
        - {background_instruction}
        - Optimize for sticker format (centered, clear, expressive)
        - Add style-specific details
    "#};

    if let Some(template) = template {
        instruction.push_str("\nFollow this format:\n");
        instruction.push_str(&template.example_format);
        instruction.push('\n');
    }
    instruction.push_str("\nReturn only the enhanced prompt, nothing else.");

    Request::single(
        template.map(|t| t.system_prompt.clone()),
        instruction,
        MAX_ENHANCEMENT_TOKENS,
    )
}

async fn enhance_with_llm(
    llm: &LLMBox,
    prompt: &str,
    style: Style,
    needs_background: bool,
    template: Option<&PromptTemplate>,
) -> Result<String> {
    let req = build_request(prompt, style, needs_background, template);
    let mut llm = llm.clone_box();
    let output = llm::complete(llm.as_mut(), req).await?;

    let enhanced = clean_llm_output(&output.text);
    if enhanced.is_empty() {
        Err(LlmError::EmptyResponse)?;
    }
    Ok(enhanced.to_string())
}
