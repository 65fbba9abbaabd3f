use anyhow::Context;
use clap::Parser;
use evcs_api::create_app;
use evcs_core::ScenarioConfig;
use evcs_engine::Engine;
use std::path::PathBuf;

/// Command line arguments for the evcs-sim server
#[derive(Parser, Debug)]
#[command(name = "evcs-sim")]
#[command(about = "EV charging admission protocol simulator")]
struct Args {
    /// Path to the scenario JSON file
    #[arg(short, long)]
    config: PathBuf,

    /// Port to bind the server to
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Run the scenario to completion and print a JSON summary instead of serving
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so a headless summary can be piped
    tracing_subscriber::fmt()
        .pretty()
        .with_writer(std::io::stderr)
        .init();

    let content = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("Failed to read scenario file '{}'", args.config.display()))?;

    let scenario: ScenarioConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse scenario file '{}'", args.config.display()))?;

    tracing::info!(
        "Loaded scenario from {}: {} vehicles, {} slots, {}s",
        args.config.display(),
        scenario.vehicles.len(),
        scenario.station.max_slots,
        scenario.duration_s
    );

    let mut engine = Engine::new(scenario).context("Failed to set up the simulation")?;

    if args.headless {
        let summary = engine.run()?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let app = create_app(engine);

    let bind_addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
