use marksheet_core::{DocumentRecord, Token};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const JSON_FILE: &str = "marks_card_structured.json";
pub const TOKENS_CSV_FILE: &str = "extracted_text.csv";
pub const SUBJECTS_CSV_FILE: &str = "subjects.csv";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where [`save_all`] put each artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub json: PathBuf,
    pub tokens_csv: PathBuf,
    pub subjects_csv: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            json: dir.join(JSON_FILE),
            tokens_csv: dir.join(TOKENS_CSV_FILE),
            subjects_csv: dir.join(SUBJECTS_CSV_FILE),
        }
    }
}

// ── JSON ──────────────────────────────────────────────────────────────────────

pub fn to_json_string(record: &DocumentRecord) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(record)?)
}

pub fn from_json_str(json: &str) -> Result<DocumentRecord, ExportError> {
    Ok(serde_json::from_str(json)?)
}

pub fn write_json(record: &DocumentRecord, path: &Path) -> Result<(), ExportError> {
    std::fs::write(path, to_json_string(record)?)?;
    Ok(())
}

pub fn read_json(path: &Path) -> Result<DocumentRecord, ExportError> {
    from_json_str(&std::fs::read_to_string(path)?)
}

// ── CSV ───────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct TokenRow<'a> {
    index: usize,
    text: &'a str,
    confidence: f32,
}

/// One row per retained token; `index` is the pre-filter sequence index.
pub fn write_token_csv(tokens: &[Token], path: &Path) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for t in tokens {
        writer.serialize(TokenRow { index: t.sequence_index, text: &t.text, confidence: t.confidence })?;
    }
    // An empty list still gets its header.
    if tokens.is_empty() {
        writer.write_record(["index", "text", "confidence"])?;
    }
    writer.flush()?;
    Ok(())
}

/// Subject rows with unset fields as empty cells. The header is written even
/// when there are no rows.
pub fn write_subjects_csv(record: &DocumentRecord, path: &Path) -> Result<(), ExportError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record([
        "course_code",
        "course_title",
        "continuous_assessment",
        "theory_marks",
        "total_marks",
    ])?;
    for row in record.subjects() {
        writer.write_record([
            row.course_code.as_deref().unwrap_or_default(),
            row.course_title.as_deref().unwrap_or_default(),
            row.continuous_assessment.as_deref().unwrap_or_default(),
            row.theory_marks.as_deref().unwrap_or_default(),
            row.total_marks.as_deref().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

// ── All artifacts ─────────────────────────────────────────────────────────────

/// Write all three artifacts into `dir`, creating it if needed.
///
/// Every write is attempted even if an earlier one failed; the first error is
/// returned afterwards.
pub fn save_all(record: &DocumentRecord, dir: &Path) -> Result<ArtifactPaths, ExportError> {
    std::fs::create_dir_all(dir)?;
    let paths = ArtifactPaths::in_dir(dir);

    let results = [
        (JSON_FILE, write_json(record, &paths.json)),
        (TOKENS_CSV_FILE, write_token_csv(record.raw_tokens(), &paths.tokens_csv)),
        (SUBJECTS_CSV_FILE, write_subjects_csv(record, &paths.subjects_csv)),
    ];

    let mut first_error = None;
    for (name, result) in results {
        match result {
            Ok(()) => debug!(artifact = name, "Artifact written"),
            Err(e) => {
                warn!(artifact = name, error = %e, "Failed to write artifact");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(paths),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
