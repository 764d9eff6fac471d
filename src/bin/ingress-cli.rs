use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use url::Url;

#[derive(Parser)]
#[command(name = "ingress-cli")]
#[command(about = "Management CLI for the ingress controller", long_about = None)]
struct Cli {
    /// Base URL of the admin API
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: Url,

    /// Admin API key
    #[arg(short, long, env = "INGRESS_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot version, uptime and totals
    Status,
    /// Installed routes in match order
    Routes,
    /// Endpoints per service with health and in-flight counts
    Endpoints,
}

impl Commands {
    fn path(&self) -> &'static str {
        match self {
            Commands::Status => "admin/status",
            Commands::Routes => "admin/routes",
            Commands::Endpoints => "admin/endpoints",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let endpoint = cli.url.join(cli.command.path())?;
    let res = client.get(endpoint).headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(format!("admin API returned {status}: {body}").into());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
