use anyhow::{bail, Result};
use clap::Parser;
use client::api::ApiClient;
use client::config::ClientConfig;
use client::driver::{Driver, RacePlan};
use client::input::AutoTypist;
use engine::modifiers::{ModifierId, RankTier};
use engine::projector::GhostProfile;
use engine::race::RaceMode;
use engine::text::Difficulty;
use engine::{RaceEngine, RaceError};
use tracing::info;

fn parse_rank(s: &str) -> Result<RankTier, String> {
    Ok(RankTier::parse_lenient(s))
}

#[derive(Parser, Debug)]
#[command(name = "client", about = "Terminal typing race client")]
struct Cli {
    /// solo, ghost, quick-race, ranked, custom, github or chaos
    #[arg(short, long, default_value = "solo")]
    mode: RaceMode,

    #[arg(short, long, default_value = "medium")]
    difficulty: Difficulty,

    /// Race length in seconds; 0 races until the text runs out
    #[arg(long)]
    duration: Option<u64>,

    #[arg(long)]
    countdown: Option<u64>,

    /// Comma separated, e.g. `fog,no-backspace`
    #[arg(long, value_delimiter = ',')]
    modifier: Vec<ModifierId>,

    #[arg(long, value_parser = parse_rank)]
    rank: Option<RankTier>,

    #[arg(long, default_value = "Ghost")]
    ghost_name: String,

    #[arg(long)]
    ghost_wpm: Option<f64>,

    /// Text to race in custom mode
    #[arg(long)]
    text: Option<String>,

    /// Let a simulated typist play at this speed
    #[arg(long)]
    autotype: Option<f64>,

    #[arg(long, default_value_t = 0.0)]
    error_rate: f64,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    user: Option<String>,

    /// Never contact the API or race server
    #[arg(long)]
    offline: bool,

    /// Print recent results and exit
    #[arg(long)]
    history: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(secs) = cli.countdown {
        config.engine.countdown_ms = secs * 1000;
    }
    if let Some(secs) = cli.duration {
        config.engine.duration_secs = Some(secs);
    }
    if let Some(user) = cli.user {
        config.user_id = user;
    }
    config.offline |= cli.offline;

    let api = (!config.offline).then(|| ApiClient::new(config.api_url.clone()));

    if cli.history {
        let Some(api) = api else {
            bail!("history needs the API (remove --offline)");
        };
        for race in api.history().await? {
            println!(
                "{} | {} wpm | {}% | {} errors | {}s",
                race.created_at.as_deref().unwrap_or("-"),
                race.wpm,
                race.accuracy,
                race.errors,
                race.time_taken
            );
        }
        return Ok(());
    }

    if cli.mode == RaceMode::Custom && cli.text.is_none() {
        bail!("custom mode needs --text");
    }

    let ghost = (cli.mode == RaceMode::Ghost).then(|| GhostProfile {
        username: cli.ghost_name.clone(),
        wpm: cli.ghost_wpm.unwrap_or(config.engine.ghost_default_wpm),
        accuracy: None,
    });
    let plan = RacePlan {
        mode: cli.mode,
        difficulty: cli.difficulty,
        modifiers: cli.modifier,
        rank: cli.rank,
        ghost,
        custom_text: cli.text,
    };

    info!("racing as {} ({})", config.user_id, plan.mode.as_str());
    let typist = cli
        .autotype
        .map(|wpm| AutoTypist::new(wpm, cli.error_rate, cli.seed));
    let engine = RaceEngine::new(config.engine.clone(), config.user_id.clone());
    let ws_url = (!config.offline).then_some(config.ws_url.as_str());

    let driver = Driver::new(engine, api, typist, cli.seed);
    match driver.run(plan, ws_url).await {
        Ok(Some(summary)) => println!("{}", serde_json::to_string_pretty(&summary)?),
        Ok(None) => info!("no race completed"),
        Err(e) if e.downcast_ref::<RaceError>().is_some_and(RaceError::is_retryable) => {
            bail!("{e}; run again to retry");
        }
        Err(e) => return Err(e),
    }
    Ok(())
}
