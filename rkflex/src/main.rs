mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use libflexvol::{FlexController, FlexOperation, FlexResponse, PluginConfig};
use tracing::info;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let response = run(cli)
        .await
        .unwrap_or_else(|e| FlexResponse::failure(format!("{e:#}")));

    match serde_json::to_string(&response) {
        Ok(line) => println!("{line}"),
        Err(e) => println!(r#"{{"status":"Failure","message":"cannot encode response: {e}"}}"#),
    }
}

async fn run(cli: Cli) -> Result<FlexResponse> {
    let operation = cli.command.into_operation()?;
    // The platform probes init before any configuration exists.
    if matches!(operation, FlexOperation::Init) {
        return Ok(FlexResponse::success());
    }

    let config =
        PluginConfig::load(cli.config.as_deref()).context("failed to load plugin configuration")?;
    logging::init(&config)?;

    info!(%operation, "running operation");
    let controller = FlexController::new(&config).context("failed to build controller")?;
    Ok(controller.dispatch(operation).await)
}
