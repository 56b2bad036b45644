use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "pgmcp-cli")]
#[command(about = "Management CLI for postgres-multi-mcp", long_about = None)]
struct Cli {
    #[arg(short, long, env = "PGMCP_URL", default_value = "http://127.0.0.1:8765")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Server liveness and registry generation
    Health,
    /// List configured databases and their state
    Databases,
    /// Re-read the configuration file and apply it
    Reload,
    /// List registered tools
    Tools,
    /// Call a tool with JSON arguments
    Call {
        tool: String,
        /// Arguments as a JSON object, e.g. '{"database_name":"a","sql":"SELECT 1"}'
        #[arg(short, long)]
        args: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Health => client.get(format!("{base}/health")).send().await?,
        Commands::Databases => client.get(format!("{base}/databases")).send().await?,
        Commands::Reload => client.post(format!("{base}/reload")).send().await?,
        Commands::Tools => client.get(format!("{base}/tools")).send().await?,
        Commands::Call { tool, args } => {
            let body: Value = match args {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Value::Null,
            };
            client
                .post(format!("{base}/tools/{tool}"))
                .json(&body)
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    if json.get("error").is_some() {
        std::process::exit(2);
    }
    Ok(())
}
