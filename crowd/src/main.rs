//! Console front end for NPC dialogue.
//!
//! Loads an NPC roster, then reads commands and chat lines from stdin:
//!
//! ```bash
//! cargo run -p crowd -- crowd/data/npcs.json --memory memories.json
//! ```

mod console;
mod roster;

use crowd_core::{ChatCompletionClient, DialogueConfig, DialogueOrchestrator, EnvCredentialProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Fallback file holding an `API_KEY=` line.
const CREDENTIAL_FILE: &str = "api_config.txt";

#[derive(Debug, Default)]
struct Args {
    roster: Option<PathBuf>,
    memory: Option<PathBuf>,
    help: bool,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => parsed.help = true,
            "--memory" => {
                let path = iter.next().ok_or("--memory requires a path")?;
                parsed.memory = Some(PathBuf::from(path));
            }
            other if other.starts_with("--") => return Err(format!("unknown option {other}")),
            other => parsed.roster = Some(PathBuf::from(other)),
        }
    }
    Ok(parsed)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_help() {
    println!("crowd - talk to NPCs from the console");
    println!();
    println!("Usage: crowd <roster.json> [--memory <memories.json>]");
    println!();
    println!("Environment:");
    println!("  OPENAI_API_KEY        API key (or API_KEY=... in {CREDENTIAL_FILE})");
    println!("  CROWD_MODEL           Model for dialogue turns (default gpt-4o-mini)");
    println!("  CROWD_SUMMARY_MODEL   Model for end-of-chat summaries");
    println!("  CROWD_MAX_EXCHANGES   Replies per NPC-to-NPC conversation (default 6)");
    println!("  CROWD_TURN_DELAY_MS   Pause between NPC-to-NPC turns (default 2000)");
    println!("  OPENAI_API_BASE       Alternative API base URL");
    println!("  RUST_LOG              Log filter (default info)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            print_help();
            std::process::exit(2);
        }
    };
    if args.help {
        print_help();
        return Ok(());
    }
    let Some(roster_path) = args.roster else {
        print_help();
        std::process::exit(2);
    };

    let registry = roster::load(&roster_path).await?;
    tracing::info!(npcs = registry.len(), path = %roster_path.display(), "roster loaded");

    let credentials = EnvCredentialProvider::new().with_config_file(CREDENTIAL_FILE);
    if !crowd_core::CredentialProvider::is_valid_format(&credentials) {
        eprintln!("Warning: no valid OPENAI_API_KEY found; NPCs will answer with an error.");
    }

    let config = DialogueConfig::from_env();
    let client = ChatCompletionClient::from_config(&config, Arc::new(credentials));
    let (dialogue, events) = DialogueOrchestrator::new(registry, Arc::new(client), config);
    let dialogue = Arc::new(dialogue);

    if let Some(path) = args.memory.as_ref().filter(|p| p.exists()) {
        match dialogue.memory().load(path).await {
            Ok(count) => println!("[MEMORY] Restored memories of {count} NPCs"),
            Err(e) => eprintln!("Warning: could not load memories: {e}"),
        }
    }

    console::run(Arc::clone(&dialogue), events).await?;

    if let Some(path) = args.memory {
        dialogue.memory().save(&path).await?;
        println!("[MEMORY] Saved to {}", path.display());
    }
    Ok(())
}
