mod config;
mod error;
mod gemini;
mod input;
mod llm_client;
mod logging;
mod models;
mod request_id;
mod router;
mod state;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use input::{FileHandle, Submission};
use logging::Console;
use request_id::RequestId;
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const DEFAULT_IP: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;

#[derive(Parser, Debug)]
#[command(name = "invoice-extractor")]
#[command(about = "Ask questions about invoice images using a multimodal LLM")]
struct Args {
    /// Path to an optional YAML config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// trace, debug, info, warn, error
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Also write logs to this file (capped at 10 MiB)
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// socks and http proxy, example: socks5://192.168.0.2:10080
    #[arg(long, global = true)]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the upload page and the extraction API (default)
    Serve {
        #[arg(short, long, default_value = DEFAULT_IP)]
        ip: String,

        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Ask one question about a local invoice image and print the answer
    Ask {
        /// JPG, JPEG or PNG file
        #[arg(long)]
        image: PathBuf,

        #[arg(short, long)]
        question: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Serve {
        ip: DEFAULT_IP.to_string(),
        port: DEFAULT_PORT,
    });

    let console = match command {
        Command::Ask { .. } => Console::Stderr,
        Command::Serve { .. } => Console::Stdout,
    };
    logging::init_logging(logging::parse_level(&args.log_level), args.log_file.as_deref(), console);

    // Missing credentials stop the process here, before anything is served.
    let config = Arc::new(Config::load(args.config.as_deref())?);
    info!("Configuration loaded: model {}, timeout {:?}", config.model, config.request_timeout);

    let client_builder = reqwest::Client::builder();
    let client_builder = if let Some(proxy) = &args.proxy {
        let proxy = reqwest::Proxy::all(proxy).with_context(|| format!("Invalid proxy '{}'", proxy))?;
        client_builder.proxy(proxy)
    } else {
        client_builder
    };
    let http_client = Arc::new(client_builder.build().context("Failed to build HTTP client")?);

    let app_state = AppState::new(config, http_client);

    match command {
        Command::Serve { ip, port } => {
            let app = router::build_router(app_state);
            let bind_address = format!("{}:{}", ip, port);
            let listener = tokio::net::TcpListener::bind(&bind_address).await?;
            info!("Server started on http://{}", bind_address);
            axum::serve(listener, app).await?;
        }
        Command::Ask { image, question } => {
            let file = FileHandle::open(&image)
                .await
                .with_context(|| format!("Failed to read '{}'", image.display()))?;
            let submission = Submission { image: Some(file), question };
            let answer = router::run_extraction(&app_state, submission, &RequestId::generate()).await?;
            println!("{}", answer.answer);
        }
    }
    Ok(())
}
