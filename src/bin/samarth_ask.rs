use anyhow::{Context, Result};
use clap::Parser;
use samarth_qa::config::PipelineConfig;
use samarth_qa::llm::build_model;
use samarth_qa::pipeline::Pipeline;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Ask one question about the crop statistics and print the JSON answer
#[derive(Parser, Debug)]
#[command(name = "samarth_ask", version, about)]
struct Args {
    /// Natural-language question
    question: String,

    /// JSON config file; defaults apply when omitted
    #[arg(short, long, env = "SAMARTH_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Pretty-print the response
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(db) = args.db {
        config.store.database_path = db;
    }

    let model = build_model(&config.llm)?;
    let pipeline = Pipeline::bootstrap(&config, model).await?;

    let bundle = pipeline.run_pipeline(&args.question).await;
    let response = bundle.to_response();
    let json = if args.pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    }
    .context("Failed to serialize response")?;
    println!("{json}");

    Ok(())
}
