use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use brandmorph_contracts::runs::summary::write_summary;
use brandmorph_contracts::runs::variant::CaptionSource;
use brandmorph_contracts::templates::TemplateRegistry;
use brandmorph_engine::{AssetInput, EngineConfig, GenerationRun, RunInputs, RunOptions};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(
    name = "brandmorph",
    version,
    about = "Turn a logo and a product photo into 12 captioned ad creatives"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Templates,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    logo: PathBuf,
    #[arg(long)]
    product: PathBuf,
    #[arg(long, default_value = "")]
    brand: String,
    #[arg(long = "product-name", default_value = "")]
    product_name: String,
    /// Destination zip archive.
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    summary: Option<PathBuf>,
    #[arg(long = "run-id")]
    run_id: Option<String>,
    /// Enable caption generation regardless of USE_LLM.
    #[arg(long = "use-llm")]
    use_llm: bool,
    /// Enable backdrop generation regardless of USE_IMAGE_API.
    #[arg(long = "use-image-api")]
    use_image_api: bool,
    /// TrueType font for caption lettering; overrides BRANDMORPH_FONT.
    #[arg(long)]
    font: Option<PathBuf>,
}

const EXIT_RUN_FAILED: i32 = 2;

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brandmorph_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("brandmorph error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let templates = TemplateRegistry::standard();
    templates
        .validate()
        .map_err(anyhow::Error::msg)
        .context("built-in template registry is invalid")?;
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Templates => {
            print!("{}", templates_table(templates));
            Ok(0)
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let config = engine_config(EngineConfig::from_env(), &args);
    tracing::debug!(
        logo = %args.logo.display(),
        product = %args.product.display(),
        captions_enabled = config.capabilities.captions_enabled,
        images_enabled = config.capabilities.images_enabled,
        "starting run"
    );
    let inputs = RunInputs {
        logo: read_asset(&args.logo)?,
        product: read_asset(&args.product)?,
        brand: args.brand.clone(),
        product_name: args.product_name.clone(),
    };
    let options = RunOptions {
        archive_path: args.out.clone(),
        events_path: args.events.clone(),
        run_id: args.run_id.clone(),
    };

    let run = GenerationRun::new(inputs, options, config);
    tracing::info!(run_id = run.run_id(), "run started");
    match run.execute() {
        Ok(report) => {
            for degradation in &report.degradations {
                eprintln!("warning: {degradation}");
            }
            if let Some(path) = args.summary.as_deref() {
                let mut extra = Map::new();
                extra.insert(
                    "cutout_method".to_string(),
                    Value::String(report.cutout_method.as_str().to_string()),
                );
                extra.insert("caption_strategy".to_string(), json!(report.caption_strategy));
                extra.insert("backdrop_strategy".to_string(), json!(report.backdrop_strategy));
                extra.insert("sha256".to_string(), json!(report.archive.sha256));
                write_summary(path, &report.summary(), Some(&extra))
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
            println!(
                "Wrote {} ({} variants, {} generated / {} fallback captions)",
                report.archive.path.display(),
                report.variants.len(),
                report.caption_count(CaptionSource::Generated),
                report.caption_count(CaptionSource::Fallback),
            );
            Ok(0)
        }
        Err(failure) => {
            if let Some(path) = args.summary.as_deref() {
                let mut extra = Map::new();
                extra.insert("error".to_string(), json!(failure.error.to_string()));
                write_summary(path, &failure.summary(), Some(&extra))
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
            eprintln!("brandmorph: {failure}");
            Ok(EXIT_RUN_FAILED)
        }
    }
}

/// Flags only switch capabilities on; they never override an enabled env
/// flag to off.
fn engine_config(mut config: EngineConfig, args: &GenerateArgs) -> EngineConfig {
    if args.use_llm {
        config.capabilities.captions_enabled = true;
    }
    if args.use_image_api {
        config.capabilities.images_enabled = true;
    }
    if let Some(font) = &args.font {
        config.caption_font = Some(font.clone());
    }
    config
}

fn read_asset(path: &Path) -> Result<AssetInput> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string();
    Ok(AssetInput::new(bytes, guess_image_mime(path), filename))
}

fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn templates_table(registry: &TemplateRegistry) -> String {
    let mut out = format!("{:<4}{:<22}{:<20}{}\n", "id", "name", "background", "product slot");
    for template in registry.iter() {
        let slot = template.product_slot;
        out.push_str(&format!(
            "{:<4}{:<22}{:<20}{}x{}+{}+{}\n",
            template.id,
            template.name,
            template.background.label(),
            slot.width,
            slot.height,
            slot.x,
            slot.y
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use brandmorph_contracts::templates::TemplateRegistry;
    use brandmorph_engine::EngineConfig;
    use clap::Parser;

    use super::{engine_config, guess_image_mime, templates_table, Cli, Command};

    #[test]
    fn mime_follows_extension() {
        assert_eq!(guess_image_mime(Path::new("logo.PNG")), "image/png");
        assert_eq!(guess_image_mime(Path::new("a/b/product.jpeg")), "image/jpeg");
        assert_eq!(guess_image_mime(Path::new("product.jpg")), "image/jpeg");
        assert_eq!(
            guess_image_mime(Path::new("logo.gif")),
            "application/octet-stream"
        );
        assert_eq!(guess_image_mime(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn generate_args_parse_and_switch_capabilities_on() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "brandmorph",
            "generate",
            "--logo",
            "logo.png",
            "--product",
            "product.jpg",
            "--brand",
            "Acme",
            "--product-name",
            "Rocket",
            "--out",
            "out/creatives.zip",
            "--use-llm",
        ])?;
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate");
        };
        assert_eq!(args.brand, "Acme");
        assert_eq!(args.product_name, "Rocket");
        assert!(args.events.is_none());

        let config = engine_config(EngineConfig::default(), &args);
        assert!(config.capabilities.captions_enabled);
        assert!(!config.capabilities.images_enabled);
        Ok(())
    }

    #[test]
    fn font_flag_overrides_configured_font() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "brandmorph",
            "generate",
            "--logo",
            "logo.png",
            "--product",
            "product.jpg",
            "--out",
            "creatives.zip",
            "--font",
            "fonts/Brand.ttf",
        ])?;
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate");
        };
        let configured = EngineConfig {
            caption_font: Some("env.ttf".into()),
            ..EngineConfig::default()
        };
        let config = engine_config(configured, &args);
        assert_eq!(config.caption_font.as_deref(), Some(Path::new("fonts/Brand.ttf")));
        Ok(())
    }

    #[test]
    fn generate_requires_output_path() {
        assert!(Cli::try_parse_from([
            "brandmorph",
            "generate",
            "--logo",
            "logo.png",
            "--product",
            "product.jpg",
        ])
        .is_err());
    }

    #[test]
    fn templates_table_lists_every_template() {
        let table = templates_table(TemplateRegistry::standard());
        assert_eq!(table.lines().count(), 13);
        assert!(table.contains("hero-center"));
        assert!(table.contains("backdrop-banner"));
    }
}
