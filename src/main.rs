use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber;

use shiori_build::{BuildDriver, BuildError, BuildObserver, BuildRequest};
use shiori_core::{ItineraryDocument, PlanningPhase};
use shiori_llm::{ClaudeClient, GeminiClient, LLMProvider, ResponseCache};

#[cfg(feature = "web")]
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::post,
    Json, Router,
};
#[cfg(feature = "web")]
use futures::stream::Stream;
#[cfg(feature = "web")]
use serde::Serialize;
#[cfg(feature = "web")]
use std::convert::Infallible;
#[cfg(feature = "web")]
use tokio::net::TcpListener;
#[cfg(feature = "web")]
use tower_http::cors::CorsLayer;

#[cfg(feature = "web")]
use shiori_build::{run_batch, BatchDetailRequest};

/// Shared application state for the web server
#[cfg(feature = "web")]
#[derive(Clone)]
struct AppState {
    /// Optional shared LLM client reused across requests
    llm: Option<Arc<dyn LLMProvider>>,
}

#[cfg(feature = "web")]
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(feature = "web")]
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    gemini_configured: bool,
    anthropic_configured: bool,
}

#[derive(Parser)]
#[command(name = "shiori-engine")]
#[command(about = "Incremental build engine for travel itineraries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server exposing the batch-detailing SSE API
    Serve {
        /// Port to run the web server on
        #[arg(short, long, default_value = "3001")]
        port: u16,
    },

    /// Build an itinerary end to end from a trip brief
    Plan {
        /// What kind of trip to plan
        #[arg(value_name = "BRIEF")]
        brief: String,

        /// Trip length in days
        #[arg(short, long, default_value = "3")]
        days: u32,

        /// Concurrent day-detail calls
        #[arg(short, long, default_value = "3")]
        parallel: usize,

        /// Detail days one at a time instead of in parallel
        #[arg(long)]
        sequential: bool,

        /// Output file for the finished itinerary JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => {
            start_web_server(port).await?;
        }
        Commands::Plan {
            brief,
            days,
            parallel,
            sequential,
            output,
        } => {
            handle_plan(brief, days, parallel, sequential, output).await?;
        }
    }

    Ok(())
}

/// Build the provider from the environment: Gemini when
/// GEMINI_API_KEY is set, Claude as the fallback.
fn provider_from_env() -> Result<Arc<dyn LLMProvider>> {
    if std::env::var("GEMINI_API_KEY").is_ok() {
        let client = GeminiClient::from_env()?.with_cache(ResponseCache::in_working_dir());
        return Ok(Arc::new(client));
    }
    if std::env::var("ANTHROPIC_API_KEY").is_ok() {
        return Ok(Arc::new(ClaudeClient::from_env()?));
    }
    anyhow::bail!("No provider configured. Set GEMINI_API_KEY or ANTHROPIC_API_KEY.")
}

/// Observer that narrates the build on the terminal.
struct CliObserver;

impl BuildObserver for CliObserver {
    fn on_state_change(&self, _phase: PlanningPhase, current_step: &str, progress: f64) {
        println!(
            "  {} {} {}",
            "▸".cyan(),
            current_step.bright_yellow(),
            format!("({:.0}%)", progress.min(100.0)).bright_black()
        );
    }

    fn on_message(&self, message: &str) {
        println!("  {}", message.bright_black());
    }

    fn on_error(&self, error: &BuildError) {
        println!("{}", format!("❌ Build failed: {}", error).red());
    }
}

async fn handle_plan(
    brief: String,
    days: u32,
    parallel: usize,
    sequential: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    println!("{}", "🗺  SHIORI ITINERARY BUILD".bright_blue().bold());
    println!("{}", "═".repeat(50).bright_black());
    println!("📝 Brief: {}", brief.bright_yellow());
    println!(
        "📅 {} days, {}",
        days,
        if sequential {
            "sequential".to_string()
        } else {
            format!("up to {} days in parallel", parallel)
        }
    );
    println!();

    let llm = provider_from_env()?;
    let driver = BuildDriver::new(llm);
    let request = BuildRequest {
        brief,
        days,
        parallel_count: parallel,
    };
    let observer = CliObserver;

    let itinerary = if sequential {
        driver.build_sequential(&request, &observer).await?
    } else {
        driver.build_parallel(&request, &observer).await?
    };

    println!();
    println!("{}", "✅ Itinerary complete!".green().bold());
    print_itinerary(&itinerary);

    if let Some(output_path) = output {
        std::fs::write(&output_path, serde_json::to_string_pretty(&itinerary)?)?;
        println!();
        println!("💾 Saved to: {}", output_path.display());
    }

    Ok(())
}

fn print_itinerary(itinerary: &ItineraryDocument) {
    println!();
    println!(
        "{} — {}",
        itinerary.title.bright_yellow().bold(),
        itinerary.destination.cyan()
    );
    for day in &itinerary.schedule {
        let theme = day.theme.as_deref().unwrap_or("");
        println!("  Day {} {}", day.day, theme.bright_black());
        for spot in &day.spots {
            let time = spot.scheduled_time.as_deref().unwrap_or("--:--");
            println!("    {} {}", time.bright_black(), spot.name.green());
        }
    }
}

#[cfg(feature = "web")]
async fn start_web_server(port: u16) -> Result<()> {
    println!("{}", "🌐 Starting SHIORI Web Server".bright_blue().bold());
    println!("{}", "═".repeat(50).bright_black());
    println!("📍 Port: {}", port);
    println!("🚀 API: http://localhost:{}/api", port);
    println!();

    let llm = match provider_from_env() {
        Ok(llm) => {
            println!("{}", "✅ LLM client initialized successfully".green());
            Some(llm)
        }
        Err(e) => {
            println!("{}", format!("⚠️  {}", e).yellow());
            None
        }
    };

    let state = AppState { llm };

    let app = Router::new()
        .route("/api/chat/batch-detail-days", post(batch_detail_handler))
        .route("/api/health", post(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    println!("✅ Server running at {}", addr.bright_green());

    axum::serve(listener, app).await?;

    Ok(())
}

/// SSE endpoint that multiplexes a whole batch-detailing run onto one
/// stream. Each chunk goes out as a `data:` line of JSON; the stream
/// ends with a literal `data: [DONE]` sentinel.
#[cfg(feature = "web")]
async fn batch_detail_handler(
    State(state): State<AppState>,
    Json(request): Json<BatchDetailRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ErrorResponse>)> {
    let Some(llm) = state.llm.clone() else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "No LLM provider configured. Set GEMINI_API_KEY or ANTHROPIC_API_KEY."
                    .to_string(),
            }),
        ));
    };

    let mut chunk_rx = run_batch(llm, request);

    // Create channel for communication
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(100);

    tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            let json = match serde_json::to_string(&chunk) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!("Failed to serialize chunk: {}", e);
                    continue;
                }
            };
            if tx.send(Ok(Event::default().data(json))).await.is_err() {
                return;
            }
        }
        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    // Create stream from receiver
    let event_stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    });

    Ok(Sse::new(event_stream))
}

#[cfg(feature = "web")]
async fn health_handler(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        gemini_configured: std::env::var("GEMINI_API_KEY").is_ok(),
        anthropic_configured: std::env::var("ANTHROPIC_API_KEY").is_ok(),
    })
}

#[cfg(not(feature = "web"))]
async fn start_web_server(_port: u16) -> Result<()> {
    println!("❌ Web server feature not enabled. Compile with --features web");
    Ok(())
}
