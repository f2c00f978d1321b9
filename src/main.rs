// TDOA Locator - Main Entry Point
// Licensed under AGPL v3

use clap::Parser;
use tdoa_locate::config::Config;
use tdoa_locate::output::{CsvOutput, JsonOutput, LogOutput, OutputHandler};
use tdoa_locate::pipeline::Pipeline;
use tdoa_locate::scenario::Scenario;
use tdoa_locate::simulate::{demo_layout, simulate_captures, SimulationConfig};
use tokio::signal;
use tower_http::services::ServeDir;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    info!("Starting TDOA locator");
    std::fs::create_dir_all(&config.work_dir)?;

    let mut scenario = match &config.scenario {
        Some(path) => Scenario::load(path)?,
        None => simulated_scenario(&config)?,
    };
    config.apply_to(&mut scenario.pipeline);

    let pipeline = Pipeline::new(scenario.pipeline.clone());
    let outcome = pipeline.run(
        scenario.captures,
        &scenario.stations,
        scenario.reference.as_ref(),
    )?;

    let mut outputs: Vec<Box<dyn OutputHandler>> = vec![
        Box::new(LogOutput),
        Box::new(JsonOutput::in_work_dir(&config.work_dir)),
    ];
    if let Some(path) = &config.write_csv {
        info!("Writing CSV results to {}", path.display());
        match CsvOutput::new(path) {
            Ok(csv_out) => outputs.push(Box::new(csv_out)),
            Err(e) => error!("Failed to open CSV output file {}: {}", path.display(), e),
        }
    }
    for output in outputs.iter_mut() {
        output.handle_result(&outcome);
    }

    // Optional: HTTP server to expose the work directory (tdoa_results.json, scenario files)
    if let Some(port) = config.http_port {
        let listener =
            tokio::net::TcpListener::bind((std::net::Ipv4Addr::UNSPECIFIED, port)).await?;
        info!("HTTP server on port {} serving {}", port, config.work_dir.display());
        let app = axum::Router::new().fallback_service(ServeDir::new(&config.work_dir));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP server error: {}", e);
            }
        });

        // Wait for shutdown signal (Ctrl+C)
        match signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
                return Err(err.into());
            }
        }
    }

    Ok(())
}

/// Simulated captures of the demo layout, saved into the work directory for reruns
fn simulated_scenario(config: &Config) -> Result<Scenario, Box<dyn std::error::Error>> {
    let (stations, reference) = demo_layout();
    let captures = simulate_captures(&stations, &reference, &SimulationConfig::default());
    info!(
        "Simulated {} captures of {}",
        captures.len(),
        reference.name.as_deref().unwrap_or("transmitter")
    );

    let scenario = Scenario {
        stations,
        reference: Some(reference),
        captures,
        ..Scenario::default()
    };

    let dir = config.work_dir.join("simulated");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("scenario.json");
    scenario.save(&path)?;
    info!("Simulated scenario written to {}", path.display());

    Ok(scenario)
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_span_events(if verbose {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    if verbose {
        subscriber
            .with_max_level(tracing::Level::DEBUG)
            .init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber
            .with_max_level(tracing::Level::INFO)
            .init();
    }
}
