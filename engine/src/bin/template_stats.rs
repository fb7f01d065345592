use clap::Parser;
use color_eyre::Result;
use serde_json::json;
use sticker_engine::{config::load_config_or_default, prompt_templates::TemplateStore};

#[derive(clap::Parser)]
struct Cli {
    /// Also deactivate templates that keep failing
    #[arg(long)]
    prune: bool,
}

pub fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();
    color_eyre::install()?;
    let args = Cli::parse();

    let cfg = load_config_or_default()?;
    let mut store = TemplateStore::load(&cfg.templates_path)?;

    let deactivated = if args.prune {
        store.deactivate_poor_performers(50, 0.3)?
    } else {
        vec![]
    };

    let report = json!({
        "statistics": store.statistics(),
        "best_practices": store.export_best_practices(),
        "deactivated": deactivated,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
