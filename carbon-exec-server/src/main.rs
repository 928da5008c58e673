use carbon_exec::CodeExecutionService;
use carbon_exec_server::{
    config::{cors_layer, Args},
    create_app, run_server,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let cors = cors_layer(&args.allowed_origins)?;

    let service = CodeExecutionService::new(
        args.execution_config(),
        args.tracker_settings(),
        args.gpu_tracking(),
    )?;
    info!(
        "Execution timeout {:?}, tracker backend {}, country {}, gpu tracking {}",
        args.execution_timeout,
        args.tracker_backend,
        args.country_iso_code,
        service.gpu_tracking().is_enabled()
    );

    let app = create_app(service, cors);
    run_server(app, args.addr()).await?;

    Ok(())
}
