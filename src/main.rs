use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth_gateway::search::EmployeeSearch;
use auth_gateway::tokens::{HttpTokenSource, LogoutFn, NoRefresh, TokenSource};
use auth_gateway::{Config, Gateway, Method, RequestSpec, Token, TokenStore};

#[derive(Debug, Parser)]
#[command(name = "auth-gateway", version, about = "Call intranet REST services with a bearer token")]
struct Cli {
    /// Bearer token to start with
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one request and print the JSON response
    Request {
        method: Method,
        /// Absolute URL or path relative to the API base URL; `[email]` is
        /// replaced by the caller's email
        url: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// Extra header as `name:value` (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
    },
    /// Search the employee directory
    Search { query: String },
    /// Print the claims of the identity token
    Whoami,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = Cli::parse();

    let config = Config::load()?;
    info!(
        environment = ?config.api.environment,
        base_url = %config.api.base_url,
        "auth-gateway starting"
    );

    let gateway = Arc::new(Gateway::new(config.clone(), TokenStore::new())?);

    let source: Arc<dyn TokenSource> = match &config.api.refresh_url {
        Some(url) => {
            let client = reqwest::Client::builder()
                .timeout(config.timeouts.refresh_timeout())
                .build()?;
            Arc::new(HttpTokenSource::new(client, url.clone()))
        }
        None => {
            info!("REFRESH_URL not set, expired tokens cannot be refreshed");
            Arc::new(NoRefresh)
        }
    };
    let logout: LogoutFn = Arc::new(|| warn!("Session expired, sign in again"));
    gateway
        .sign_in(Token::new(cli.token.clone()), source, logout)
        .await;

    let output = match cli.command {
        Command::Request {
            method,
            url,
            body,
            headers,
        } => {
            let mut spec = RequestSpec::new(method, url);
            if let Some(body) = body {
                spec = spec.json(serde_json::from_str(&body)?);
            }
            for header in headers {
                let (name, value) = header
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("header '{header}' is not name:value"))?;
                spec = spec.header(name.trim(), value.trim());
            }
            gateway.request(spec).await?
        }
        Command::Search { query } => {
            let search = EmployeeSearch::new(Arc::clone(&gateway));
            serde_json::to_value(search.search(&query).await?)?
        }
        Command::Whoami => match gateway.identity().await {
            Some(claims) => serde_json::to_value(claims)?,
            None => anyhow::bail!("token is not a decodable identity token"),
        },
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
