//! # Prompt templates
//!
//! A small JSON-backed collection of system prompts used when an LLM rewrites
//! sticker prompts. Every template carries its own A/B bookkeeping (uses,
//! rating sum, success rate, active flag) which is written back to the file
//! whenever it changes.
//!
//! Template selection uses Thompson sampling: every active template draws a
//! score from `Beta(successes + 1, failures + 1)` and the highest score wins,
//! so new templates get explored while good ones are picked most of the time.
//! A rating of 4 or 5 counts as a success. Templates keep the order they
//! were authored or added in, both in memory and in the file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Local};
use color_eyre::{Result, eyre::WrapErr};
use indexmap::IndexMap;
use indoc::indoc;
use log::{error, info};
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPLATES_PATH: &str = "prompt_templates.json";
pub const SUCCESS_RATING: u32 = 4;
pub const MIN_USES_FOR_CHAMPION: u32 = 20;
const BEST_PRACTICE_EXAMPLES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub example_format: String,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub total_uses: u32,
    #[serde(default)]
    pub total_rating: u32,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl PromptTemplate {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        example_format: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            system_prompt: system_prompt.into(),
            example_format: example_format.into(),
            success_rate: 0.0,
            total_uses: 0,
            total_rating: 0,
            active: true,
        }
    }

    pub fn average_rating(&self) -> f64 {
        if self.total_uses > 0 {
            self.total_rating as f64 / self.total_uses as f64
        } else {
            0.0
        }
    }

    fn successes(&self) -> u32 {
        (self.success_rate * self.total_uses as f64) as u32
    }

    fn champion_score(&self) -> f64 {
        self.success_rate * 0.7 + (self.average_rating() / 5.0) * 0.3
    }

    fn sample_score<R: Rng>(&self, rng: &mut R) -> f64 {
        let successes = self.successes();
        let failures = self.total_uses.saturating_sub(successes);
        // both shapes are at least 1, so the distribution is always valid
        Beta::new((successes + 1) as f64, (failures + 1) as f64)
            .map_or(0.5, |beta| beta.sample(rng))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub timestamp: DateTime<Local>,
    pub template_id: String,
    pub rating: u32,
    pub request: String,
    pub is_success: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TemplateStats {
    pub name: String,
    pub uses: u32,
    pub success_rate: f64,
    pub avg_rating: f64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecentStats {
    pub total_tests: usize,
    pub avg_rating: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Statistics {
    pub templates: IndexMap<String, TemplateStats>,
    pub current_champion: Option<String>,
    pub total_tests: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_7_days: Option<RecentStats>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Example {
    pub request: String,
    pub rating: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BestPractice {
    pub template: String,
    pub success_rate: f64,
    pub avg_rating: f64,
    pub examples: Vec<Example>,
}

#[derive(Debug)]
pub struct TemplateStore {
    path: PathBuf,
    templates: IndexMap<String, PromptTemplate>,
    test_results: Vec<TestResult>,
    current_champion: Option<String>,
}

impl TemplateStore {
    /// Loads the templates at `path`. A missing or unreadable file is
    /// replaced by the default templates.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let existing = if path.exists() {
            read_templates(&path)
                .inspect_err(|e| {
                    error!("Failed to load prompt templates from {path:?}: {e:?}")
                })
                .ok()
        } else {
            None
        };

        let templates = match existing {
            Some(templates) => templates,
            None => {
                info!("Creating prompt templates file at {path:?}");
                let templates = default_templates();
                write_templates(&path, &templates)?;
                templates
            }
        };

        Ok(Self {
            path,
            templates,
            test_results: vec![],
            current_champion: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.get(id)
    }

    pub fn templates(&self) -> impl Iterator<Item = &PromptTemplate> {
        self.templates.values()
    }

    pub fn save(&self) -> Result<()> {
        write_templates(&self.path, &self.templates)
    }

    /// Picks the template to use for the next request of `user_id`.
    pub fn select_for_test<R: Rng>(
        &self,
        user_id: i64,
        rng: &mut R,
    ) -> Option<&PromptTemplate> {
        let selected = self
            .templates
            .values()
            .filter(|t| t.active)
            .map(|t| (t.sample_score(rng), t))
            .max_by(|(a, _), (b, _)| a.total_cmp(b));

        match selected {
            Some((score, template)) => {
                info!(
                    "Selected template {} for user {user_id} (score: {score:.3})",
                    template.name
                );
                Some(template)
            }
            None => self.templates.values().next(),
        }
    }

    pub fn record_result(&mut self, template_id: &str, rating: u32, request: &str) -> Result<()> {
        self.record_result_at(template_id, rating, request, Local::now())
    }

    pub fn record_result_at(
        &mut self,
        template_id: &str,
        rating: u32,
        request: &str,
        timestamp: DateTime<Local>,
    ) -> Result<()> {
        let Some(template) = self.templates.get_mut(template_id) else {
            return Ok(());
        };

        template.total_uses += 1;
        template.total_rating += rating;

        let is_success = rating >= SUCCESS_RATING;
        let previous = template.success_rate * (template.total_uses - 1) as f64;
        template.success_rate =
            (previous + if is_success { 1.0 } else { 0.0 }) / template.total_uses as f64;

        info!(
            "Recorded result: template={template_id}, rating={rating}, success_rate={:.1}%",
            template.success_rate * 100.0
        );

        self.test_results.push(TestResult {
            timestamp,
            template_id: template_id.into(),
            rating,
            request: request.into(),
            is_success,
        });

        self.update_champion();
        self.save()
    }

    fn update_champion(&mut self) {
        let best = self
            .templates
            .values()
            .filter(|t| t.active && t.total_uses >= MIN_USES_FOR_CHAMPION)
            .max_by(|a, b| a.champion_score().total_cmp(&b.champion_score()));

        if let Some(best) = best
            && self.current_champion.as_deref() != Some(best.id.as_str())
        {
            info!(
                "New champion: {} (success: {:.1}%, avg rating: {:.2})",
                best.name,
                best.success_rate * 100.0,
                best.average_rating()
            );
            self.current_champion = Some(best.id.clone());
        }
    }

    pub fn champion(&self) -> Option<&PromptTemplate> {
        self.current_champion
            .as_ref()
            .and_then(|id| self.templates.get(id))
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics_at(Local::now())
    }

    pub fn statistics_at(&self, now: DateTime<Local>) -> Statistics {
        let templates = self
            .templates
            .iter()
            .map(|(id, t)| {
                (
                    id.clone(),
                    TemplateStats {
                        name: t.name.clone(),
                        uses: t.total_uses,
                        success_rate: t.success_rate,
                        avg_rating: t.average_rating(),
                        active: t.active,
                    },
                )
            })
            .collect();

        let window_start = now - Duration::days(7);
        let recent: Vec<&TestResult> = self
            .test_results
            .iter()
            .filter(|r| r.timestamp > window_start)
            .collect();

        let recent_7_days = (!recent.is_empty()).then(|| {
            let n = recent.len() as f64;
            RecentStats {
                total_tests: recent.len(),
                avg_rating: recent.iter().map(|r| r.rating as f64).sum::<f64>() / n,
                success_rate: recent.iter().filter(|r| r.is_success).count() as f64 / n,
            }
        });

        Statistics {
            templates,
            current_champion: self.current_champion.clone(),
            total_tests: self.test_results.len(),
            recent_7_days,
        }
    }

    pub fn add_template(&mut self, template: PromptTemplate) -> Result<()> {
        info!("Added template: {}", template.name);
        self.templates.insert(template.id.clone(), template);
        self.save()
    }

    /// Deactivates templates that had their chance and keep failing. Returns
    /// the names of the deactivated templates.
    pub fn deactivate_poor_performers(
        &mut self,
        min_uses: u32,
        success_threshold: f64,
    ) -> Result<Vec<String>> {
        let mut deactivated = vec![];
        for template in self.templates.values_mut() {
            if template.active
                && template.total_uses >= min_uses
                && template.success_rate < success_threshold
            {
                template.active = false;
                info!(
                    "Deactivated template {} (success rate: {:.1}%)",
                    template.name,
                    template.success_rate * 100.0
                );
                deactivated.push(template.name.clone());
            }
        }

        if !deactivated.is_empty() {
            self.save()?;
        }
        Ok(deactivated)
    }

    pub fn export_best_practices(&self) -> Vec<BestPractice> {
        let mut examples_by_template: IndexMap<&str, Vec<Example>> = IndexMap::new();
        for result in self.test_results.iter().filter(|r| r.is_success) {
            examples_by_template
                .entry(result.template_id.as_str())
                .or_default()
                .push(Example {
                    request: result.request.clone(),
                    rating: result.rating,
                });
        }

        let mut best_practices: Vec<BestPractice> = examples_by_template
            .into_iter()
            .filter_map(|(id, mut examples)| {
                let template = self.templates.get(id)?;
                examples.sort_by(|a, b| b.rating.cmp(&a.rating));
                examples.truncate(BEST_PRACTICE_EXAMPLES);
                Some(BestPractice {
                    template: template.name.clone(),
                    success_rate: template.success_rate,
                    avg_rating: template.average_rating(),
                    examples,
                })
            })
            .collect();

        best_practices.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));
        best_practices
    }
}

fn read_templates(path: &Path) -> Result<IndexMap<String, PromptTemplate>> {
    let src = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&src)?)
}

fn write_templates(path: &Path, templates: &IndexMap<String, PromptTemplate>) -> Result<()> {
    let json = serde_json::to_string_pretty(templates)?;
    fs::write(path, json).with_context(|| format!("writing templates to {path:?}"))
}

pub fn default_templates() -> IndexMap<String, PromptTemplate> {
    [
        PromptTemplate::new(
            "precise_v1",
            "Precise Description v1",
            indoc! {"
                You are an expert AI prompt engineer specializing in sticker generation.
                Your task is to create EXACT and DETAILED prompts that precisely match user requests.

                CRITICAL RULES:
                1. The user's main subject MUST be the central focus
                2. Add only complementary details that enhance the main subject
                3. Keep descriptions clear and visually specific
                4. Maintain sticker-appropriate simplicity"},
            indoc! {"
                Main subject: [exact user request]
                Style: [chosen style] sticker art
                Details: [3-5 specific visual details]
                Background: simple, clean
                Quality: high resolution, professional"},
        ),
        PromptTemplate::new(
            "structured_v1",
            "Structured Components v1",
            indoc! {"
                You are a sticker prompt specialist. Break down requests into clear components.

                OUTPUT STRUCTURE:
                - Subject: [main element]
                - Action/Pose: [if applicable]
                - Expression/Mood: [emotional state]
                - Style Elements: [artistic details]
                - Color Scheme: [dominant colors]
                - Background: [simple description]"},
            "[Subject] + [action] + [mood] + [style] + sticker design, [background]",
        ),
        PromptTemplate::new(
            "visual_first_v1",
            "Visual-First Approach v1",
            indoc! {"
                Focus on creating highly visual, specific prompts for sticker generation.

                APPROACH:
                1. Start with the most visually distinctive features
                2. Use concrete visual adjectives (not abstract concepts)
                3. Specify exact colors, shapes, and proportions
                4. Describe the subject as if explaining to someone who will draw it"},
            "A [size] [color] [subject] with [distinctive feature], [pose/action], [style] sticker illustration",
        ),
        PromptTemplate::new(
            "minimalist_v1",
            "Minimalist Clear v1",
            indoc! {"
                Create simple, clear prompts focusing on essential elements only.

                RULES:
                - Maximum 15 words per prompt
                - Only include crucial visual elements
                - One main subject, one action, one style
                - Avoid unnecessary adjectives"},
            "[subject] [key characteristic], [style] sticker, simple background",
        ),
        PromptTemplate::new(
            "emotion_focused_v1",
            "Emotion-Centric v1",
            indoc! {"
                Emphasize emotional expression and mood in sticker generation.

                PRIORITY ORDER:
                1. Subject identification
                2. Emotional state/expression
                3. Body language that reinforces emotion
                4. Style that complements the mood
                5. Colors that enhance the feeling"},
            "[emotion] [subject] showing [expression], [pose], [mood-appropriate style] sticker",
        ),
    ]
    .into_iter()
    .map(|t| (t.id.clone(), t))
    .collect()
}
