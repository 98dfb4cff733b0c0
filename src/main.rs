// src/main.rs
use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};
use naver_content_engine::{
    config::load_config,
    utils::{parse_level, setup_logging},
    ContentItem, SearchError, SearchFacade,
};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "naver-content", version, about = "Search Naver news, blogs and trends")]
struct Cli {
    /// Print indented JSON
    #[arg(long, global = true)]
    pretty: bool,

    /// Skip the start-up connection test
    #[arg(long, global = true)]
    skip_probe: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Latest news matching a keyword
    News {
        keyword: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Blog posts matching a keyword
    Blogs {
        keyword: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Related keyword results
    Related {
        keyword: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Currently trending items
    Trending,
    /// Random sample across news and blogs
    Mixed {
        keyword: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
    },
    /// Connection and credential check
    Probe,
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<(), SearchError> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), SearchError> {
    let config = load_config()?;
    let facade = SearchFacade::from_config(config)?;
    let facade = match cli.command {
        Command::Probe => facade,
        _ if cli.skip_probe => facade,
        _ => facade.verified().await?,
    };

    let items: Vec<ContentItem> = match cli.command {
        Command::News { keyword, limit } => facade.search_news(&keyword, limit).await?,
        Command::Blogs { keyword, limit } => facade.search_blogs(&keyword, limit).await?,
        Command::Related { keyword, limit } => {
            facade.search_related_keywords(&keyword, limit).await?
        }
        Command::Trending => facade.search_trending().await?,
        Command::Mixed { keyword, limit } => facade.search_mixed(&keyword, limit).await?,
        Command::Probe => {
            facade.probe().await?;
            info!("✅ Connection test passed");
            return print_json(&serde_json::json!({"status": "ok"}), cli.pretty);
        }
    };

    info!("📊 {} item(s), {} hot", items.len(), items.iter().filter(|i| i.is_hot()).count());
    print_json(&items, cli.pretty)
}

/// Runs before config loading so config errors get logged too.
fn init_logging() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    setup_logging(parse_level(&level)).context("failed to initialize logging")?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("{:#}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("❌ {}", err);
            eprintln!("error [{}]: {}", err.kind(), err);
            if err.is_configuration() {
                eprintln!("check NAVER_CLIENT_ID / NAVER_CLIENT_SECRET and the other settings in .env");
            }
            ExitCode::FAILURE
        }
    }
}
