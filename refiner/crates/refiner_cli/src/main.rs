use clap::Parser;
use refiner_core::config::RefinerConfig;
use refiner_core::pipeline::{RefineOutcome, Refiner};
use refiner_core::protocol::{Blueprint, Intent};
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "refiner_cli")]
struct Args {
    /// Blueprint JSON. Read from stdin when absent.
    #[arg(long, value_name = "PATH")]
    blueprint: Option<PathBuf>,

    #[arg(long)]
    prompt: Option<String>,

    /// Read the request text from a file.
    #[arg(long, value_name = "PATH", conflicts_with = "prompt")]
    prompt_file: Option<PathBuf>,

    #[arg(long, default_value = "")]
    mood: String,

    #[arg(long, default_value_t = 0.5)]
    intensity: f32,

    #[arg(long, default_value_t = 0.5)]
    space: f32,

    #[arg(long, default_value = "")]
    character: String,

    /// RefinerConfig JSON. Defaults plus REFINER_* environment overrides when absent.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the validation report and nudge audit trail to stderr.
    #[arg(long, default_value_t = false)]
    report: bool,

    /// Emit the flat `slotN_paramM` map instead of the structured record.
    #[arg(long, default_value_t = false)]
    parameter_map: bool,

    #[arg(long, default_value_t = false)]
    pretty: bool,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
            RefinerConfig::from_json_str(&raw)?
        }
        None => RefinerConfig::from_env(),
    };
    debug!(?config, "refiner configured");
    let refiner = Refiner::new(config)?;

    let raw = match args.blueprint.as_deref() {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read blueprint {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let blueprint: Blueprint = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("blueprint is not valid JSON: {e}"))?;

    let request_text = match (&args.prompt, &args.prompt_file) {
        (Some(p), _) => p.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read prompt file {}: {e}", path.display()))?,
        (None, None) => String::new(),
    };
    let intent = Intent {
        mood: args.mood.clone(),
        intensity: args.intensity,
        space: args.space,
        character: args.character.clone(),
        request_text,
    };

    let outcome = refiner.refine(&blueprint, &intent);
    if args.report {
        print_report(&outcome);
    }

    let out = if args.parameter_map {
        to_json(&outcome.record.to_parameter_map(), args.pretty)?
    } else {
        to_json(&outcome.record, args.pretty)?
    };
    println!("{out}");
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}

fn print_report(outcome: &RefineOutcome) {
    let report = &outcome.report;
    eprintln!("valid: {}", report.valid);
    for (label, lines) in [
        ("errors", &report.errors),
        ("warnings", &report.warnings),
        ("modifications", &report.modifications),
    ] {
        if lines.is_empty() {
            continue;
        }
        eprintln!("{label}:");
        for line in lines {
            eprintln!("  {line}");
        }
    }
    if !outcome.adjustments.is_empty() {
        eprintln!("adjustments:");
        for a in &outcome.adjustments {
            let param = a
                .param_index
                .map_or_else(|| "mix".to_string(), |p| format!("param {p}"));
            eprintln!(
                "  slot {} {param}: {:+.3} ({:?}: {})",
                a.slot_index, a.delta, a.layer, a.reason
            );
        }
    }
}
