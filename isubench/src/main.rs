use anyhow::Context;
use clap::Parser;
use isubench::orchestrator::{self, Orchestrator};
use isubench::{flows, BenchContext, Report, Userdata};
use isubench_core::{BenchConfig, ScoreTable, TargetHost, DEFAULT_POOL_CAPACITY};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(version, about = "Load-generating correctness checker")]
struct Cli {
    /// Target host, e.g. `localhost:8080` or `http://app.example`
    #[arg(short, long)]
    target: String,

    /// Directory holding names.txt, kaomoji.txt and img/
    #[arg(short, long)]
    userdata: PathBuf,

    /// Print every failure in recording order instead of deduplicated
    #[arg(short, long)]
    debug: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Length of the load phase
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Ready sessions kept by the pool
    #[arg(long, default_value_t = DEFAULT_POOL_CAPACITY)]
    pool_capacity: usize,

    /// JSON file overriding the score table
    #[arg(long)]
    scores: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> anyhow::Result<BenchConfig> {
        let mut config = BenchConfig::new(TargetHost::parse(&self.target)?);
        config.duration = self.duration;
        config.pool_capacity = self.pool_capacity;

        if let Some(path) = &self.scores {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Unable to read score table {}", path.display()))?;
            config.scores = serde_json::from_str::<ScoreTable>(&raw)
                .with_context(|| format!("Invalid score table {}", path.display()))?;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "isubench=debug,isubench_core=debug"
    } else {
        "isubench=info"
    };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli).await {
        Ok(report) => {
            if let Err(err) = print_report(&report, cli.json) {
                error!("{err:#}");
                return ExitCode::FAILURE;
            }
            ExitCode::from(report.exit_code() as u8)
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<Report> {
    let config = cli.config()?;
    let fail_threshold = config.fail_threshold;
    let ctx = BenchContext::new(config).shared();
    info!("Benchmarking {}", ctx.config());

    let dir = cli.userdata.clone();
    let (_, userdata) = tokio::join!(
        orchestrator::initialize(&ctx),
        tokio::task::spawn_blocking(move || Userdata::load(&dir)),
    );
    let userdata = Arc::new(userdata.context("Userdata loader panicked")??);

    let orchestrator = flows::all(userdata)
        .into_iter()
        .fold(Orchestrator::new(ctx.clone()), Orchestrator::flow);

    if !orchestrator.preflight().await? {
        warn!("Pre-flight check failed, skipping the load phase");
        let mut report = Report::from_score(ctx.score(), fail_threshold, cli.debug);
        report.pass = false;
        return Ok(report);
    }

    orchestrator.run().await?;
    Ok(Report::from_score(ctx.score(), fail_threshold, cli.debug))
}

fn print_report(report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("{report}");
    }
    Ok(())
}
