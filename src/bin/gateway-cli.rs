use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use engine_gateway::resilience::BreakerSnapshot;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Operator CLI for the engine gateway admin API", long_about = None)]
struct Cli {
    #[arg(short, long, env = "GATEWAY_ADMIN_URL", default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List circuit breaker state per dependency
    Breakers,
    /// Force a breaker closed
    Reset {
        /// Dependency name (market_data, news, buffers, stats)
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{base}/admin/status"))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Breakers => {
            let res = client
                .get(format!("{base}/admin/breakers"))
                .headers(headers)
                .send()
                .await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            let breakers: Vec<BreakerSnapshot> = res.json().await?;
            println!(
                "{:<12} {:<10} {:>8} {:>10} {:>10} {:>10}",
                "NAME", "STATE", "FAILS", "CALLS", "FAILURES", "REJECTED"
            );
            for b in breakers {
                println!(
                    "{:<12} {:<10} {:>8} {:>10} {:>10} {:>10}",
                    b.name,
                    b.state.to_string(),
                    b.failure_count,
                    b.total_calls,
                    b.total_failures,
                    b.total_rejections
                );
            }
        }
        Commands::Reset { name } => {
            let res = client
                .post(format!("{base}/admin/breakers/{name}/reset"))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
