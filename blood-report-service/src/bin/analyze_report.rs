use anyhow::{Context, Result};
use blood_report_service::{
    OpenRouterModel, ReportOrchestrator, ServiceConfig, pdf_text::extract_report_text_blocking,
};
use graph_flow::InMemorySessionStorage;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <pdf_path>", args[0]);
        std::process::exit(1);
    }
    let pdf_path = &args[1];

    let config = ServiceConfig::from_env().context("Failed to load configuration")?;

    println!("Reading PDF: {}", pdf_path);
    let bytes = tokio::fs::read(pdf_path)
        .await
        .with_context(|| format!("Failed to read {pdf_path}"))?;

    let report = extract_report_text_blocking(bytes)
        .await
        .context("Failed to extract text from PDF")?;
    println!(
        "Extracted {} characters from {} page(s)",
        report.text.len(),
        report.page_count
    );

    let model = Arc::new(OpenRouterModel::from_config(&config)?);
    let orchestrator = ReportOrchestrator::new(
        model,
        config.analysis.clone(),
        config.max_agent_steps,
        Arc::new(InMemorySessionStorage::new()),
    );

    let session_id = orchestrator.create_session(report.text).await?;
    let outcome = orchestrator.run_analysis(&session_id).await?;

    println!("\n=== ANALYSIS ({} steps) ===", outcome.steps);
    println!("{}", outcome.agent_response);

    println!("\n=== SECTIONS ===");
    println!("{}", serde_json::to_string_pretty(&outcome.sections)?);

    if !outcome.complete {
        eprintln!("Analysis did not complete; the narrative above is partial");
    }

    Ok(())
}
