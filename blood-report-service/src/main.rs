use blood_report_service::{ServiceConfig, create_app};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing from `LOG_FORMAT` (`json` or `pretty`) and `RUST_LOG`
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "blood_report_service=debug,graph_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        analysis_model = %config.analysis.model,
        chat_model = %config.chat.model,
        max_agent_steps = config.max_agent_steps,
        "Configuration loaded"
    );

    let app = create_app(&config)?;
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Blood Report Analysis Service starting on {}", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Upload endpoint: POST http://{}/reports", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
