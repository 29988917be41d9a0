#![deny(warnings)]

//! Headless demo: simulated clients sharing one in-memory store.

use anyhow::{Context, Result};
use clicker_core::{format_amount, UPGRADES};
use clicker_store::{InMemoryStore, StaticIdentity};
use clicker_sync::{Session, SessionConfig, SessionError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

const STEP: Duration = Duration::from_millis(100);
const LINES: [&str; 4] = ["hello", "gg", "anyone got a spare modem?", "brb"];

struct Args {
    config: Option<String>,
    players: usize,
    seconds: u64,
    seed: u64,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        players: 3,
        seconds: 10,
        seed: 42,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next(),
            "--players" => {
                if let Some(n) = it.next().and_then(|s| s.parse().ok()) {
                    args.players = n;
                }
            }
            "--seconds" => {
                if let Some(n) = it.next().and_then(|s| s.parse().ok()) {
                    args.seconds = n;
                }
            }
            "--seed" => {
                if let Some(n) = it.next().and_then(|s| s.parse().ok()) {
                    args.seed = n;
                }
            }
            _ => {}
        }
    }
    args
}

fn load_config(path: Option<&str>) -> Result<SessionConfig> {
    let mut cfg = match path {
        Some(p) => SessionConfig::load(p).with_context(|| format!("loading {p}"))?,
        None => SessionConfig::default(),
    };
    if let Ok(app_id) = std::env::var("CLICKER_APP_ID") {
        cfg.app_id = app_id;
    }
    Ok(cfg)
}

/// Buy the cheapest upgrade the bot can afford right now, if any.
async fn buy_cheapest(session: &Session<InMemoryStore>) -> Result<()> {
    let cheapest = UPGRADES
        .iter()
        .filter(|def| session.can_afford(def.id))
        .filter_map(|def| session.cost_of_next(def.id).map(|cost| (cost, def.id)))
        .min_by(|a, b| a.0.total_cmp(&b.0));
    if let Some((_, id)) = cheapest {
        match session.purchase(id).await {
            Ok(p) => debug!(
                player = %session.player_id(),
                upgrade = id,
                owned = p.owned,
                "bot bought"
            ),
            Err(SessionError::Econ(e)) => debug!(upgrade = id, error = %e, "bot purchase rejected"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    let cfg = load_config(args.config.as_deref())?;
    info!(
        build = env!("GIT_SHA"),
        players = args.players,
        seconds = args.seconds,
        app = %cfg.app_id,
        "starting demo"
    );

    let store = Arc::new(InMemoryStore::new());
    let mut bots = Vec::with_capacity(args.players);
    for i in 0..args.players {
        let identity = StaticIdentity::new(&format!("bot-{i}"));
        let mut session = Session::start(Arc::clone(&store), &identity, cfg.clone()).await?;
        session.join(&format!("bot{i}")).await?;
        bots.push(session);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let steps = args.seconds * 1_000 / STEP.as_millis() as u64;
    let mut ticker = tokio::time::interval(STEP);
    for _ in 0..steps {
        ticker.tick().await;
        for (i, bot) in bots.iter().enumerate() {
            // later bots click faster so the ranking is not a tie
            for _ in 0..rng.gen_range(0..=i + 1) {
                bot.click()?;
            }
            buy_cheapest(bot).await?;
            if rng.gen_bool(0.01) {
                bot.send_chat(LINES[rng.gen_range(0..LINES.len())]).await?;
            }
        }
    }
    // let the last flush land
    tokio::time::sleep(cfg.flush_interval() + STEP).await;

    let Some(viewer) = bots.first() else {
        println!("No players.");
        return Ok(());
    };
    let board = viewer.leaderboard();
    println!(
        "Leaderboard | players: {} | total: {}",
        board.len(),
        format_amount(board.total_score)
    );
    for e in board.top(10) {
        println!(
            "{:>3}. {:<12} {:>10} ({}/s, {} trophies)",
            e.rank,
            e.display_name,
            format_amount(e.score),
            format_amount(e.production_rate),
            e.achievements
        );
    }
    let chat = viewer.chat();
    println!("Chat | last {} messages", chat.len());
    for m in &chat.messages {
        println!("<{}> {}", m.author_name, m.text);
    }

    for bot in bots {
        bot.shutdown().await;
    }
    Ok(())
}
