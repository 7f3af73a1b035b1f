use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use datachat_agents::{Manager, RunOptions};
use datachat_core::types::Turn;
use datachat_core::Config;
use datachat_db::DatabaseClient;
use datachat_providers::LocalProvider;

#[derive(Parser)]
#[command(name = "datachat")]
#[command(about = "Chat with your database: SQL answers and Mermaid charts from a local model", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive query loop (default)
    Repl,
    /// Ask a single question and exit
    Ask {
        /// The question to ask
        #[arg(short, long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Repl => repl(&config).await,
        Commands::Ask { message } => ask(&config, &message).await,
    }
}

fn build_manager(config: &Config) -> anyhow::Result<Manager> {
    println!("🔧 Using local model: {} at {}", config.llm.model, config.llm.base_url);

    println!("📊 Connecting to database...");
    let db = Arc::new(DatabaseClient::open(Path::new(&config.database.path))?);
    println!("✅ Database connected");

    let schema = match db.describe_database() {
        Ok(s) => {
            println!("✅ Schema loaded");
            Some(s)
        }
        Err(e) => {
            eprintln!("⚠️  Could not load schema: {}", e);
            None
        }
    };

    let provider = Arc::new(LocalProvider::from_config(&config.llm));

    Ok(Manager::new(
        provider,
        db,
        schema.as_deref(),
        RunOptions::from(&config.agents),
    ))
}

async fn repl(config: &Config) -> anyhow::Result<()> {
    println!("🤖 datachat");
    println!("===========");
    let manager = build_manager(config)?;
    let mut history: Vec<Turn> = Vec::new();

    println!();
    println!("Type your queries below. Type 'quit' or 'exit' to stop.");
    println!("Examples:");
    println!("  - Show me all tables in the database");
    println!("  - How many orders are there per month?");
    println!("  - Create a bar chart of sales by month");
    println!();

    let stdin = std::io::stdin();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            println!("Goodbye! 👋");
            break;
        }

        let report = manager.process_query(input);
        let agents: Vec<&str> = report.agents_used.iter().map(|a| a.name()).collect();
        println!();
        println!("📋 Intent: {} (confidence: {:.2})", report.intent, report.confidence);
        println!("🔄 Workflow: {}", report.workflow);
        println!("🤖 Agents: {}", agents.join(" -> "));
        println!();
        println!("⏳ Processing...");

        // Ctrl-C aborts the in-flight request, not the session.
        let result = tokio::select! {
            r = manager.handle(input, &mut history) => r,
            _ = tokio::signal::ctrl_c() => {
                println!("\n⏹  Cancelled.\n");
                continue;
            }
        };

        match result {
            Ok(answer) if !answer.is_empty() => println!("\n🤖 Agent: {}\n", answer),
            Ok(_) => println!("\n💡 No response generated.\n"),
            Err(e) => eprintln!("\n❌ Error: {}\n", e),
        }
    }

    Ok(())
}

async fn ask(config: &Config, message: &str) -> anyhow::Result<()> {
    let manager = build_manager(config)?;
    let mut history: Vec<Turn> = Vec::new();

    let report = manager.process_query(message);
    println!("📋 Intent: {} (confidence: {:.2})", report.intent, report.confidence);
    println!("🔄 Workflow: {}", report.workflow);

    let answer = manager.handle(message, &mut history).await?;
    if answer.is_empty() {
        println!("💡 No response generated.");
    } else {
        println!("{}", answer);
    }
    Ok(())
}
