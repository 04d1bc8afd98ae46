use crate::infra::{InMemoryPropertyStore, LoggingCreditObserver};
use appraisal_import::config::AppConfig;
use appraisal_import::error::AppError;
use appraisal_import::workflows::import::{
    load_library, CandidateActionKind, CommitReport, ControllerSettings, DocumentType,
    ImportController, ImportPipeline, ImportSession, ImportSource, InputMode, ProcessOutcome,
    RecordedExtractionGateway, SaveOutcome, UploadedFile,
};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// Recorded extraction response (JSON) replayed instead of calling the provider
    #[arg(long)]
    pub(crate) extraction: PathBuf,
    /// Existing property library as CSV (id,address,city,municipality,sale_price)
    #[arg(long)]
    pub(crate) library: Option<PathBuf>,
    /// Document to submit. PDFs are uploaded, text files are pasted.
    #[arg(long)]
    pub(crate) document: Option<PathBuf>,
    /// Document type: sale, listing, rental, assessment, appraisal or other
    #[arg(long, default_value = "sale", value_parser = parse_document_type)]
    pub(crate) document_type: DocumentType,
    /// Resolution for one candidate, e.g. `1=merge`. Repeat for several candidates.
    #[arg(long = "resolve", value_parser = parse_resolution)]
    pub(crate) resolutions: Vec<(usize, CandidateActionKind)>,
    /// Review the candidates without committing them
    #[arg(long)]
    pub(crate) dry_run: bool,
}

pub(crate) fn parse_document_type(raw: &str) -> Result<DocumentType, String> {
    DocumentType::from_code(raw).ok_or_else(|| format!("unknown document type '{raw}'"))
}

pub(crate) fn parse_resolution(raw: &str) -> Result<(usize, CandidateActionKind), String> {
    let (index, action) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected INDEX=ACTION, got '{raw}'"))?;
    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|err| format!("invalid candidate index in '{raw}' ({err})"))?;
    let action = CandidateActionKind::from_label(action)
        .ok_or_else(|| format!("action must be create, merge or skip in '{raw}'"))?;
    Ok((index, action))
}

enum DocumentInput {
    File(UploadedFile),
    Text(String),
}

fn load_document(path: &Path) -> Result<DocumentInput, AppError> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT {
        return Ok(DocumentInput::Text(std::fs::read_to_string(path)?));
    }

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    Ok(DocumentInput::File(UploadedFile {
        name,
        content_type: mime.essence_str().to_string(),
        bytes: std::fs::read(path)?,
    }))
}

pub(crate) async fn run_import(args: ImportArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;

    let gateway = Arc::new(RecordedExtractionGateway::from_path(&args.extraction)?);
    let library = match &args.library {
        Some(path) => load_library(path)?,
        None => Vec::new(),
    };
    let store = Arc::new(InMemoryPropertyStore::with_library(library));
    let settings = ControllerSettings {
        redirect_delay: Duration::ZERO,
        ..config.import.controller_settings()
    };
    let pipeline = Arc::new(
        ImportPipeline::new(
            gateway,
            store.clone(),
            Arc::new(config.import.credential_policy()),
            settings,
        )
        .with_credit_observer(Arc::new(LoggingCreditObserver::default())),
    );

    let controller = ImportController::mount(pipeline, None);
    controller.select_source(ImportSource::Document)?;
    controller.set_document_type(Some(args.document_type))?;
    match args.document.as_deref().map(load_document).transpose()? {
        Some(DocumentInput::File(file)) => {
            controller.set_input_mode(InputMode::Pdf)?;
            controller.select_file(Some(file))?;
        }
        Some(DocumentInput::Text(text)) => {
            controller.set_input_mode(InputMode::Text)?;
            controller.set_pasted_text(text)?;
        }
        None => {
            controller.set_input_mode(InputMode::Text)?;
            controller.set_pasted_text(format!("replayed from {}", args.extraction.display()))?;
        }
    }

    println!("Property import ({})", args.document_type.code());
    match controller.handle_process().await? {
        ProcessOutcome::Reviewing { candidates } => {
            println!("- {candidates} candidate(s) extracted");
        }
        _ => {
            let message = controller
                .error()
                .map(|err| err.message())
                .unwrap_or_else(|| "The import did not start.".to_string());
            println!("  {message}");
            return Ok(());
        }
    }

    for (index, action) in args.resolutions {
        controller.set_candidate_action(index, action)?;
    }
    if let Some(session) = controller.session() {
        render_review(&session);
    }

    if args.dry_run {
        println!("\nDry run: nothing committed");
        return Ok(());
    }

    match controller.handle_commit().await? {
        SaveOutcome::Saved { report } => render_report(&report),
        SaveOutcome::Failed { report } => {
            if let Some(report) = report {
                render_report(&report);
            }
            if let Some(err) = controller.error() {
                println!("  {}", err.message());
            }
        }
        SaveOutcome::Ignored => println!("\nA commit is already running"),
    }

    println!("\nProperty library");
    for property in store.properties() {
        let price = property
            .sale_price
            .map(|price| format!("${price}"))
            .unwrap_or_else(|| "-".to_string());
        println!("  - {} | {} | {}", property.id, property.address, price);
    }

    Ok(())
}

fn render_review(session: &ImportSession) {
    println!(
        "\nReview (session {}, {} to commit)",
        session.id,
        session.pending_commits()
    );
    for (index, candidate) in session.reviewable().into_iter().enumerate() {
        let address = candidate.fields.address().unwrap_or("(no address)");
        let duplicate = candidate
            .duplicate()
            .map(|existing| format!("duplicate of {}", existing.id))
            .unwrap_or_else(|| "new".to_string());
        println!(
            "  [{}] {} | {:.0}% confidence | {} | action {}",
            index,
            address,
            candidate.average_confidence * 100.0,
            duplicate,
            candidate.action().kind().label()
        );
    }
}

fn render_report(report: &CommitReport) {
    println!("\nCommit: {}", report.summary());
    for commit in &report.outcomes {
        println!(
            "  [{}] {}",
            commit.index,
            serde_json::to_string(&commit.outcome).unwrap_or_default()
        );
    }
}
