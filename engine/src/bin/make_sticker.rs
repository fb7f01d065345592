use std::path::PathBuf;

use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use log::info;
use sticker_engine::{
    StickerService,
    config::{LlmConfig, load_config_or_default},
    prompt_templates::TemplateStore,
    sticker::{BackgroundStyle, StickerEffects, prepare_sticker_with},
};

#[derive(clap::Parser)]
struct Cli {
    /// What the sticker should show
    prompt: String,
    #[arg(short, long, default_value = "cartoon")]
    style: String,
    /// Model key, the configured default when omitted
    #[arg(short, long)]
    model: Option<String>,
    #[arg(short, long, value_enum, default_value_t)]
    background: BackgroundStyle,
    #[arg(long)]
    no_shadow: bool,
    /// Outline width in pixels, 10 when given without a value
    #[arg(long, num_args = 0..=1, default_missing_value = "10")]
    outline: Option<u32>,
    #[arg(short, long, default_value = "sticker.png")]
    out: PathBuf,
    /// Rewrite the prompt following this template id
    #[arg(short, long, conflicts_with = "ab_test")]
    template: Option<String>,
    /// Let the template store pick a template
    #[arg(long)]
    ab_test: bool,
    #[arg(long)]
    replicate_token: Option<String>,
    #[arg(long)]
    llm_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();
    color_eyre::install()?;
    let args = Cli::parse();

    let mut cfg = load_config_or_default()?;
    if let Some(token) = args.replicate_token {
        cfg.replicate_token = Some(token);
    }
    if let Some(key) = args.llm_key {
        match &mut cfg.llm {
            Some(llm) => llm.api_key = key,
            None => cfg.llm = Some(LlmConfig::gemini(key)),
        }
    }
    let service = StickerService::from_config(&cfg)?;

    let store = if args.template.is_some() || args.ab_test {
        Some(TemplateStore::load(&cfg.templates_path)?)
    } else {
        None
    };
    let template = match (&store, &args.template) {
        (Some(store), Some(id)) => {
            Some(store.get(id).ok_or(eyre!("Unknown prompt template: {id}"))?)
        }
        (Some(store), None) => store.select_for_test(0, &mut rand::thread_rng()),
        _ => None,
    };

    let (bytes, meta) = service
        .generate_sticker_with_template(
            &args.prompt,
            &args.style,
            args.model.as_deref(),
            template,
        )
        .await?;

    let effects = StickerEffects {
        shadow: !args.no_shadow,
        outline: args.outline,
        ..StickerEffects::new(args.background)
    };
    let png = prepare_sticker_with(&bytes, effects)?;
    std::fs::write(&args.out, &png)?;
    info!("Saved sticker to {:?}, {} bytes", args.out, png.len());

    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}
