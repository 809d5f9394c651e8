//! Storefront CLI - authenticated access to the storefront API
//!
//! Logs in, keeps the session token on disk and sends raw API requests,
//! renewing the session transparently when it expires.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_client::api::{ApiResponse, RequestDescriptor};
use storefront_client::{Client, Config, Credentials, FileTokenStore, TokenStore};

#[derive(Parser)]
#[command(name = "storefront-cli")]
#[command(about = "Authenticated client for the storefront API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the API base URL from the config file
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session token
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },

    /// Log out and clear the stored session
    Logout,

    /// Show configuration and session status
    Status,

    /// GET a path, e.g. `/products`
    Get { path: String },

    /// POST a JSON body to a path
    Post {
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },

    /// PUT a JSON body to a path
    Put {
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },

    /// DELETE a path
    Delete { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let store = Arc::new(FileTokenStore::open_default()?);
    let client = Client::from_config(&config, store.clone()).context("Failed to build client")?;

    match cli.command {
        Commands::Login { email, password } => {
            client
                .login(&Credentials { email, password })
                .await
                .context("Login failed")?;
            println!("Logged in.");
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            client.logout().await;
            println!("Logged out.");
        }
        Commands::Status => status(&config, &store),
        Commands::Get { path } => {
            run(&client, RequestDescriptor::get(path)).await?;
        }
        Commands::Post { path, data } => {
            run(&client, with_body(RequestDescriptor::post(path), data)?).await?;
        }
        Commands::Put { path, data } => {
            run(&client, with_body(RequestDescriptor::put(path), data)?).await?;
        }
        Commands::Delete { path } => {
            run(&client, RequestDescriptor::delete(path)).await?;
        }
    }

    Ok(())
}

fn with_body(request: RequestDescriptor, data: Option<String>) -> Result<RequestDescriptor> {
    match data {
        Some(raw) => {
            let body: serde_json::Value =
                serde_json::from_str(&raw).context("--data is not valid JSON")?;
            Ok(request.json(&body)?)
        }
        None => Ok(request),
    }
}

async fn run(client: &Client, request: RequestDescriptor) -> Result<()> {
    let label = format!("{} {}", request.method, request.path);
    match client.send(request).await {
        Ok(resp) => {
            print_response(&resp);
            Ok(())
        }
        Err(e) if e.is_session_expired() => {
            anyhow::bail!("{label}: session expired. Run 'storefront-cli login'.")
        }
        Err(e) => Err(e).with_context(|| format!("{label} failed")),
    }
}

fn print_response(resp: &ApiResponse) {
    match resp.json::<serde_json::Value>() {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", resp.text()),
        },
        Err(_) => println!("{}", resp.text()),
    }
}

fn status(config: &Config, store: &FileTokenStore) {
    println!("API:         {}", config.base_url);
    println!("Header:      {}", config.token_header);
    println!("Session:     {}", store.path().display());

    match store.stored() {
        Some(stored) => println!("Token:       present (stored {})", stored.stored_at),
        None => {
            println!("Token:       none");
            println!("\nRun 'storefront-cli login' to authenticate.");
        }
    }
}
