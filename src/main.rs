use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use replydesk_rs::config::{Config, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_SELECTOR_MODEL};
use replydesk_rs::llm::{AnthropicClient, AnthropicConfig};
use replydesk_rs::logging::init_logging;
use replydesk_rs::pipeline::ResponsePipeline;
use replydesk_rs::server::{run, AppState};
use replydesk_rs::storage::Store;

#[derive(Parser, Debug)]
#[command(name = "replydesk-rs", version, about = "Knowledge-backed support response drafting service")]
struct Cli {
    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 8787)]
    port: u16,

    /// SQLite database path (.db extension required)
    #[arg(long, default_value = "replydesk.db")]
    db_path: PathBuf,

    /// Append logs to this file in addition to stderr
    #[arg(long)]
    log: Option<String>,

    /// Generation model override
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Selector model override (cheaper variant, index-only calls)
    #[arg(long, default_value = DEFAULT_SELECTOR_MODEL)]
    selector_model: String,

    /// Generation API base URL override
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(cli.log.clone())?;

    // The only environment read in the program; everything below gets an
    // explicitly constructed Config
    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();

    let mut config = Config::new(api_key);
    config.model = cli.model;
    config.selector_model = cli.selector_model;
    config.base_url = cli.base_url;

    let store = Arc::new(Store::open(&cli.db_path)?);
    let client = Arc::new(AnthropicClient::new(AnthropicConfig {
        api_key: config.api_key.clone(),
        base_url: config.base_url.clone(),
    }));

    let pipeline = Arc::new(ResponsePipeline::new(store, client, config));
    run(AppState { pipeline }, cli.port).await?;

    Ok(())
}
