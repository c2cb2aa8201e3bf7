use anyhow::{Context, Result};
use clap::Parser;
use dlstats::config::Config;
use dlstats::federation::Federation;
use dlstats::query::QueryProfile;

#[derive(Parser)]
#[command(name = "dlstats-report")]
#[command(about = "Build one federated download report and print it as JSON", long_about = None)]
struct Cli {
    /// Relative window, e.g. 7d or 12h (defaults to DLSTATS_DEFAULT_DURATION)
    #[arg(long)]
    duration: Option<String>,
    /// Project name (defaults to DLSTATS_DEFAULT_PROJECT)
    #[arg(long)]
    project: Option<String>,
    /// Query profile: full or lean (defaults to DLSTATS_QUERY_PROFILE)
    #[arg(long)]
    profile: Option<QueryProfile>,
    /// Pretty-print the JSON
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let federation = Federation::from_config(&config)?;

    let mut defaults = config.federation.defaults.clone();
    if let Some(profile) = cli.profile {
        defaults.profile = profile;
    }

    let outcome = federation
        .report_for(cli.duration.as_deref(), cli.project.as_deref(), &defaults)
        .await?;

    let json = if cli.pretty {
        serde_json::to_string_pretty(&outcome.report)
    } else {
        serde_json::to_string(&outcome.report)
    }
    .context("failed to serialize report")?;
    println!("{}", json);

    for failure in &outcome.failures {
        eprintln!("⚠ Provider '{}' skipped: {}", failure.provider, failure.error);
    }

    Ok(())
}
