use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "aggregator-cli")]
#[command(about = "Inspection CLI for the API aggregator", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8443")]
    url: String,

    /// Accept self-signed listener certificates
    #[arg(long)]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query readiness (readyz)
    Ready {
        /// List every check with its failure reason
        #[arg(short, long)]
        verbose: bool,

        /// Query a single named check
        #[arg(short, long)]
        check: Option<String>,
    },
    /// Query liveness (livez)
    Live {
        #[arg(short, long)]
        verbose: bool,
    },
    /// List registered backends in discovery order
    Backends,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(cli.insecure)
        .build()?;
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Ready { verbose, check } => {
            let path = match check {
                Some(name) => format!("{}/readyz/{}", base, name),
                None => format!("{}/readyz", base),
            };
            let ok = print_check(client.get(path).query(&verbose_query(verbose))).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Live { verbose } => {
            let ok = print_check(client.get(format!("{}/livez", base)).query(&verbose_query(verbose))).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Backends => {
            let res = client.get(format!("{}/aggregator/backends", base)).send().await?;
            print_json(res).await?;
        }
    }

    Ok(())
}

fn verbose_query(verbose: bool) -> Vec<(&'static str, &'static str)> {
    if verbose {
        vec![("verbose", "true")]
    } else {
        Vec::new()
    }
}

async fn print_check(request: reqwest::RequestBuilder) -> Result<bool, Box<dyn std::error::Error>> {
    let res = request.send().await?;
    let ok = res.status().is_success();
    let body = res.text().await?;
    if ok {
        println!("{}", body.trim_end());
    } else {
        eprintln!("{}", body.trim_end());
    }
    Ok(ok)
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: aggregator returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
