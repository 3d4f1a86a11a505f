//! Campaign Attribution — multi-touch attribution over exported touchpoint logs.
//!
//! Reads touchpoints as a JSON array, ingests them through the validating
//! store, and prints an attribution report or a model comparison.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use attribution_core::config::AppConfig;
use attribution_core::{AttributionModel, RawTouchpoint, TimeRange, Touchpoint};
use attribution_engine::synth::{generate, SynthSpec};
use attribution_engine::{export, AnalysisRequest, AttributionEngine, TouchpointStore};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-attribution")]
#[command(about = "Multi-touch attribution engine for marketing touchpoint logs")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables still override it)
    #[arg(long, env = "CAMPAIGN_ATTRIBUTION_CONFIG")]
    config: Option<PathBuf>,

    /// Shapley truncation cap (overrides config)
    #[arg(long, env = "CAMPAIGN_ATTRIBUTION__ATTRIBUTION__MAX_TOUCHPOINTS")]
    max_touchpoints: Option<usize>,

    /// Time-decay half-life in days (overrides config)
    #[arg(long, env = "CAMPAIGN_ATTRIBUTION__ATTRIBUTION__HALF_LIFE_DAYS")]
    half_life_days: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a seeded synthetic touchpoint set
    Generate {
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 1_000)]
        users: usize,
        #[arg(long, default_value_t = 3)]
        campaigns: usize,
        #[arg(long, default_value_t = 30)]
        days: i64,
        /// Window start (RFC 3339); defaults to 30 days ago
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// Output file; stdout when omitted
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Attribute conversions under one model
    Analyze {
        #[command(flatten)]
        scope: Scope,
        /// Attribution model (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Run every model and print the comparison
    Compare {
        #[command(flatten)]
        scope: Scope,
    },
}

#[derive(Args, Debug)]
struct Scope {
    /// JSON array of touchpoints
    #[arg(long, short)]
    input: PathBuf,
    /// Campaign to include (repeatable); all campaigns when omitted
    #[arg(long = "campaign")]
    campaigns: Vec<String>,
    /// Window start (RFC 3339); earliest touchpoint when omitted
    #[arg(long)]
    start: Option<DateTime<Utc>>,
    /// Window end (RFC 3339); latest touchpoint when omitted
    #[arg(long)]
    end: Option<DateTime<Utc>>,
    /// Campaign spend as `campaign=amount` (repeatable)
    #[arg(long = "spend", value_parser = parse_spend)]
    spend: Vec<(String, f64)>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Csv,
}

fn parse_spend(s: &str) -> Result<(String, f64), String> {
    let (campaign, amount) = s
        .split_once('=')
        .ok_or_else(|| format!("expected campaign=amount, got {s}"))?;
    let amount: f64 = amount
        .parse()
        .map_err(|e| format!("invalid spend amount {amount}: {e}"))?;
    Ok((campaign.to_string(), amount))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    if let Some(max) = cli.max_touchpoints {
        config.attribution.max_touchpoints = max;
    }
    if let Some(days) = cli.half_life_days {
        config.attribution.half_life_days = days;
    }

    info!(
        default_model = %config.attribution.default_model,
        max_touchpoints = config.attribution.max_touchpoints,
        half_life_days = config.attribution.half_life_days,
        "Configuration loaded"
    );

    match cli.command {
        Command::Generate {
            seed,
            users,
            campaigns,
            days,
            start,
            output,
        } => {
            let start = start.unwrap_or_else(|| Utc::now() - chrono::Duration::days(days));
            let spec = SynthSpec {
                campaigns,
                days,
                ..SynthSpec::new(seed, users, start)
            };
            let data = generate(&spec);
            info!(touchpoints = data.len(), seed, "Synthetic touchpoints generated");
            write_output(output.as_deref(), &serde_json::to_string_pretty(&data)?)?;
        }
        Command::Analyze {
            scope,
            model,
            format,
        } => {
            let engine = AttributionEngine::new(config.attribution.clone())?;
            let model = match model {
                Some(name) => name.parse::<AttributionModel>()?,
                None => engine.config().default_model,
            };
            let (touchpoints, request) = prepare(&scope, model, &config)?;
            let report = engine.analyze(&touchpoints, &request)?;
            let rendered = match format {
                Format::Json => export::to_json(&report)?,
                Format::Csv => export::to_csv(&report),
            };
            write_output(None, &rendered)?;
        }
        Command::Compare { scope } => {
            let engine = AttributionEngine::new(config.attribution.clone())?;
            let (touchpoints, request) = prepare(&scope, engine.config().default_model, &config)?;
            let comparison = engine
                .compare_models(
                    Arc::from(touchpoints),
                    request.campaign_ids,
                    request.time_range,
                    request.spend,
                )
                .await?;
            for (model, reason) in &comparison.failures {
                warn!(model = %model, reason = %reason, "Model omitted from comparison");
            }
            let summary = serde_json::json!({
                "revenue_by_model": comparison.revenue_by_model(),
                "creative_spread": comparison.creative_spread(),
                "failures": comparison.failures,
                "reports": comparison.reports,
            });
            write_output(None, &serde_json::to_string_pretty(&summary)?)?;
        }
    }

    Ok(())
}

/// An explicit config file must load; without one, a bad environment falls
/// back to defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(Some(path))
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(AppConfig::load(None).unwrap_or_else(|e| {
            eprintln!("Failed to load config from environment ({e}), using defaults");
            AppConfig::default()
        })),
    }
}

/// Loads and validates input, then resolves campaigns and window defaults.
fn prepare(
    scope: &Scope,
    model: AttributionModel,
    config: &AppConfig,
) -> anyhow::Result<(Vec<Touchpoint>, AnalysisRequest)> {
    let file = File::open(&scope.input)
        .with_context(|| format!("opening {}", scope.input.display()))?;
    let records: Vec<RawTouchpoint> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", scope.input.display()))?;

    let store = TouchpointStore::new(config.attribution.missing_value_policy);
    let summary = store.ingest_batch(records);
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected.len(),
        "Touchpoints ingested"
    );
    if store.is_empty() {
        bail!("no valid touchpoints in {}", scope.input.display());
    }

    let touchpoints = store.snapshot();
    let campaign_ids: BTreeSet<String> = if scope.campaigns.is_empty() {
        store.campaign_ids()
    } else {
        scope.campaigns.iter().cloned().collect()
    };

    let earliest = touchpoints.iter().map(|t| t.timestamp).min();
    let latest = touchpoints.iter().map(|t| t.timestamp).max();
    let (Some(start), Some(end)) = (scope.start.or(earliest), scope.end.or(latest)) else {
        bail!("cannot determine analysis window");
    };

    let spend: BTreeMap<String, f64> = scope.spend.iter().cloned().collect();
    let request = AnalysisRequest {
        campaign_ids,
        model,
        time_range: TimeRange::new(start, end)?,
        spend,
    };
    Ok((touchpoints, request))
}

fn write_output(path: Option<&Path>, body: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            let mut out = BufWriter::new(
                File::create(path).with_context(|| format!("creating {}", path.display()))?,
            );
            out.write_all(body.as_bytes())?;
            out.write_all(b"\n")?;
            out.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            out.write_all(body.as_bytes())?;
            out.write_all(b"\n")?;
        }
    }
    Ok(())
}
