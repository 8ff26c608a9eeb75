use marksheet_core::{filter_by_confidence, DocumentRecord, PipelineConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::export::{self, ArtifactPaths, ExportError};
use crate::extract::{ExtractError, Extractor};
use crate::preprocess::{Normalizer, PreprocessError};
use crate::recognizer::{tokens_from_detections, TokenSource, TokenSourceError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image could not be decoded: {0}")]
    ImageDecode(#[from] PreprocessError),
    #[error("Token source failed: {0}")]
    TokenSource(#[from] TokenSourceError),
    #[error(transparent)]
    EmptyExtraction(#[from] ExtractError),
    #[error("Failed to save artifacts: {0}")]
    Export(#[from] ExportError),
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

/// The result of processing one marks card.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub record: DocumentRecord,
    /// Where the normalized image was saved, when a save directory is configured.
    pub normalized_path: Option<PathBuf>,
    /// Detections returned by the token source before filtering.
    pub detected: usize,
}

/// Orchestrates: normalize → recognize → filter → extract.
///
/// Holds no engine state; the token source is passed into every call so that
/// one pipeline can serve several workers, each with its own handle.
#[derive(Debug, Clone, Default)]
pub struct MarksCardPipeline {
    config: PipelineConfig,
    normalizer: Normalizer,
    extractor: Extractor,
}

impl MarksCardPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let normalizer = Normalizer::new(config.preprocess.clone());
        let extractor = Extractor::new(config.extraction.clone());
        Self { config, normalizer, extractor }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one image file. Nothing is written apart from the optional
    /// normalized-image audit copy.
    pub fn process_file<S: TokenSource + ?Sized>(
        &self,
        path: &Path,
        source: &mut S,
    ) -> Result<ProcessOutcome, PipelineError> {
        let normalized = self.normalizer.normalize_file(path)?;
        debug!(
            path = %path.display(),
            width = normalized.image.width(),
            height = normalized.image.height(),
            "Image normalized"
        );

        let detections = source.recognize(&normalized)?;
        let detected = detections.len();
        let tokens = filter_by_confidence(
            tokens_from_detections(detections),
            self.config.confidence_threshold,
        );
        debug!(detected, retained = tokens.len(), "Tokens filtered");

        let record = self.extractor.extract(tokens)?;
        info!(
            path = %path.display(),
            tokens = record.raw_tokens().len(),
            subjects = record.subjects().len(),
            "Marks card processed"
        );

        Ok(ProcessOutcome { record, normalized_path: normalized.saved_path, detected })
    }

    /// [`process_file`](Self::process_file), then write all artifacts into `output_dir`.
    pub fn process_to_dir<S: TokenSource + ?Sized>(
        &self,
        path: &Path,
        source: &mut S,
        output_dir: &Path,
    ) -> Result<(ProcessOutcome, ArtifactPaths), PipelineError> {
        let outcome = self.process_file(path, source)?;
        let artifacts = export::save_all(&outcome.record, output_dir)?;
        info!(output_dir = %output_dir.display(), "Artifacts saved");
        Ok((outcome, artifacts))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
