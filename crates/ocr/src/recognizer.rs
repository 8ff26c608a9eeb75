use marksheet_core::Token;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::preprocess::NormalizedImage;

#[derive(Debug, Error)]
pub enum TokenSourceError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Token file {path}: {message}")]
    TokenFile { path: PathBuf, message: String },
    #[error("Token source needs the source image path")]
    MissingSourcePath,
}

/// One region as reported by an OCR engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub text: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self { text: text.into(), confidence }
    }
}

/// Abstraction over an OCR engine.
///
/// Returns detections in the engine's own order, which need not match reading
/// order. `&mut self` keeps a handle to one caller at a time: engines are not
/// assumed safe to share, so concurrent work needs one handle per worker.
pub trait TokenSource: Send {
    fn recognize(&mut self, image: &NormalizedImage) -> Result<Vec<Detection>, TokenSourceError>;
}

impl<S: TokenSource + ?Sized> TokenSource for Box<S> {
    fn recognize(&mut self, image: &NormalizedImage) -> Result<Vec<Detection>, TokenSourceError> {
        (**self).recognize(image)
    }
}

/// Number detections in engine order. Indexes are fixed here and survive filtering.
pub fn tokens_from_detections(detections: Vec<Detection>) -> Vec<Token> {
    detections
        .into_iter()
        .enumerate()
        .map(|(i, d)| Token::new(i, d.text, d.confidence))
        .collect()
}

// ── Mock source (always available, used for tests) ────────────────────────────

/// Returns preset detections, for running the pipeline without an OCR engine.
#[derive(Debug, Clone, Default)]
pub struct MockTokenSource {
    pub detections: Vec<Detection>,
}

impl MockTokenSource {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// Every text gets the same confidence.
    pub fn from_texts(texts: &[&str], confidence: f32) -> Self {
        Self::new(texts.iter().map(|t| Detection::new(*t, confidence)).collect())
    }
}

impl TokenSource for MockTokenSource {
    fn recognize(&mut self, _image: &NormalizedImage) -> Result<Vec<Detection>, TokenSourceError> {
        Ok(self.detections.clone())
    }
}

// ── Sidecar source (detections saved by an external OCR run) ─────────────────

/// Shapes a saved OCR result may take.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SidecarFile {
    Detections(Vec<Detection>),
    /// Parallel arrays as written by PaddleOCR's result `save_to_json`.
    Parallel { rec_texts: Vec<String>, rec_scores: Vec<f32> },
    /// The same arrays nested one level down under `res`.
    Nested { res: Box<SidecarFile> },
}

impl SidecarFile {
    fn into_detections(self) -> Result<Vec<Detection>, String> {
        match self {
            SidecarFile::Detections(d) => Ok(d),
            SidecarFile::Parallel { rec_texts, rec_scores } => {
                if rec_texts.len() != rec_scores.len() {
                    return Err(format!(
                        "{} texts but {} scores",
                        rec_texts.len(),
                        rec_scores.len()
                    ));
                }
                Ok(rec_texts.into_iter().zip(rec_scores).map(|(t, s)| Detection::new(t, s)).collect())
            }
            SidecarFile::Nested { res } => res.into_detections(),
        }
    }
}

/// Reads detections from JSON written by an OCR engine run elsewhere.
///
/// Either one fixed file, or `<image>.tokens.json` next to each source image.
#[derive(Debug, Clone)]
pub enum SidecarTokenSource {
    Fixed(PathBuf),
    BesideImage,
}

impl SidecarTokenSource {
    pub fn sidecar_path(image_path: &Path) -> PathBuf {
        let mut name = image_path.as_os_str().to_owned();
        name.push(".tokens.json");
        PathBuf::from(name)
    }

    pub fn parse(json: &str) -> Result<Vec<Detection>, String> {
        let file: SidecarFile = serde_json::from_str(json).map_err(|e| e.to_string())?;
        file.into_detections()
    }

    fn read(path: &Path) -> Result<Vec<Detection>, TokenSourceError> {
        let file_err = |message: String| TokenSourceError::TokenFile { path: path.to_path_buf(), message };
        let json = std::fs::read_to_string(path).map_err(|e| file_err(e.to_string()))?;
        Self::parse(&json).map_err(file_err)
    }
}

impl TokenSource for SidecarTokenSource {
    fn recognize(&mut self, image: &NormalizedImage) -> Result<Vec<Detection>, TokenSourceError> {
        match self {
            SidecarTokenSource::Fixed(path) => Self::read(path),
            SidecarTokenSource::BesideImage => {
                let source = image.source_path.as_deref().ok_or(TokenSourceError::MissingSourcePath)?;
                Self::read(&Self::sidecar_path(source))
            }
        }
    }
}

// ── Tesseract source (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{Detection, TokenSource, TokenSourceError};
    use crate::preprocess::NormalizedImage;
    use leptess::LepTess;

    /// One detection per recognized text line; confidence is the mean word
    /// confidence of the line scaled to 0–1.
    ///
    /// Holds only the engine settings. Each call starts its own `LepTess`, so the
    /// value is `Send` and a handle never outlives one document.
    #[derive(Debug, Clone)]
    pub struct TesseractTokenSource {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractTokenSource {
        /// Starts the engine once to reject a bad data path or language up front.
        pub fn new(data_path: Option<&str>, lang: &str) -> Result<Self, TokenSourceError> {
            let source = Self { data_path: data_path.map(str::to_string), lang: lang.to_string() };
            source.engine()?;
            Ok(source)
        }

        fn engine(&self) -> Result<LepTess, TokenSourceError> {
            LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| TokenSourceError::Engine(e.to_string()))
        }
    }

    impl TokenSource for TesseractTokenSource {
        fn recognize(&mut self, image: &NormalizedImage) -> Result<Vec<Detection>, TokenSourceError> {
            let png = image.to_png().map_err(|e| TokenSourceError::ImageDecode(e.to_string()))?;
            let mut lt = self.engine()?;
            lt.set_image_from_mem(&png)
                .map_err(|e| TokenSourceError::ImageDecode(e.to_string()))?;
            let tsv = lt.get_tsv_text(0).map_err(|e| TokenSourceError::Engine(e.to_string()))?;
            Ok(lines_from_tsv(&tsv))
        }
    }

    /// Group Tesseract TSV word rows (level 5) into lines, in output order.
    pub(crate) fn lines_from_tsv(tsv: &str) -> Vec<Detection> {
        let mut lines: Vec<((u32, u32, u32, u32), Vec<String>, Vec<f32>)> = Vec::new();
        for row in tsv.lines() {
            let cols: Vec<&str> = row.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                continue;
            }
            let key = |i: usize| cols[i].parse::<u32>().unwrap_or(0);
            let line_key = (key(1), key(2), key(3), key(4));
            let conf: f32 = cols[10].parse().unwrap_or(-1.0);
            let word = cols[11].trim();
            if word.is_empty() || conf < 0.0 {
                continue;
            }
            match lines.last_mut() {
                Some((k, words, confs)) if *k == line_key => {
                    words.push(word.to_string());
                    confs.push(conf);
                }
                _ => lines.push((line_key, vec![word.to_string()], vec![conf])),
            }
        }
        lines
            .into_iter()
            .map(|(_, words, confs)| {
                let mean = confs.iter().sum::<f32>() / confs.len() as f32;
                Detection::new(words.join(" "), mean / 100.0)
            })
            .collect()
    }

}
