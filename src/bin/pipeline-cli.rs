use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "pipeline-cli")]
#[command(about = "CLI for the clipscribe pipeline service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Bearer token, required when the service enforces auth.
    #[arg(short, long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a video link or share text for transcription
    Submit {
        /// Direct video or share URL
        #[arg(long)]
        video_url: Option<String>,

        /// Free text containing a share link
        #[arg(long)]
        text: Option<String>,

        /// Script style: default, humorous or professional
        #[arg(long)]
        style: Option<String>,

        /// Transcript language: zh or en
        #[arg(long)]
        language: Option<String>,
    },
    /// Show pipeline status, admission and dependency health
    Status,
    /// Liveness check
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(token) = &cli.token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );
    }

    match cli.command {
        Commands::Submit {
            video_url,
            text,
            style,
            language,
        } => {
            let mut body = Map::new();
            if let Some(video_url) = video_url {
                body.insert("videoUrl".into(), Value::String(video_url));
            }
            if let Some(text) = text {
                body.insert("mixedText".into(), Value::String(text));
            }
            if let Some(style) = style {
                body.insert("style".into(), Value::String(style));
            }
            if let Some(language) = language {
                body.insert("language".into(), Value::String(language));
            }

            let res = client
                .post(format!("{}/api/video/transcribe", cli.url))
                .headers(headers)
                .json(&Value::Object(body))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Status => {
            let res = client
                .get(format!("{}/api/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Health => {
            let res = client
                .get(format!("{}/healthz", cli.url))
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
        eprintln!("Error: API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
