//! Docsift CLI
//!
//! Runs one extraction over a file on disk and prints the result as JSON.
//!
//! ```bash
//! OPENAI_API_KEY=sk-... docsift invoice.jpg --query "Extract the invoice number and total"
//! docsift contract.pdf -q "List the parties" --document-type legal-contract
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use docsift::config::{self, PipelineConfig};
use docsift::pipeline::{
    CancelToken, Document, ExtractionPipeline, ExtractionRequest, ExtractionRequirement,
    ProgressEvent,
};

#[derive(Parser)]
#[command(name = "docsift")]
#[command(version = config::APP_VERSION)]
#[command(about = "Extract structured data from a document image or PDF", long_about = None)]
struct Cli {
    /// Document to process (PDF, JPEG, PNG, GIF, BMP or TIFF)
    file: PathBuf,

    /// What to extract, in plain language
    #[arg(long, short)]
    query: String,

    /// Skip classification and use this document type id
    #[arg(long = "document-type")]
    document_type: Option<String>,

    /// Warn when the final confidence falls below this value (0-1)
    #[arg(long = "confidence-threshold")]
    confidence_threshold: Option<f64>,

    /// Print the result on a single line
    #[arg(long)]
    compact: bool,
}

fn build_request(cli: &Cli, document: Document) -> ExtractionRequest {
    let request = ExtractionRequest::new(document, cli.query.clone());
    if cli.document_type.is_none() && cli.confidence_threshold.is_none() {
        return request;
    }
    let mut requirement =
        ExtractionRequirement::for_type(cli.document_type.clone().unwrap_or_default());
    requirement.confidence_threshold = cli.confidence_threshold;
    request.with_requirement(requirement)
}

fn progress_line(event: &ProgressEvent) -> String {
    format!("[{:>3}%] {}", event.percent, event.step.as_str())
}

#[tokio::main]
async fn main() -> Result<()> {
    docsift::init_tracing();
    let cli = Cli::parse();

    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    if !config.has_vision_credentials() {
        tracing::warn!("No vision credentials set; the run will fail at the vision stage");
    }

    let bytes = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("failed to read {}", cli.file.display()))?;
    let media_type = mime_guess::from_path(&cli.file)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_default();
    let name = cli
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let request = build_request(&cli, Document::new(bytes, media_type, name));

    let pipeline = ExtractionPipeline::new(&config).context("failed to build pipeline")?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            on_interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!("{}", progress_line(&event));
            if event.step.is_terminal() {
                break;
            }
        }
    });

    let result = pipeline.run(request, Some(tx), &cancel).await;
    // The run always ends on a terminal step, and the sender drops with it.
    let _ = printer.await;

    let rendered = if cli.compact {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{rendered}");

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
