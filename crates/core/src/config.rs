use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Confidence threshold must be within 0.0..=1.0, got {0}")]
    InvalidThreshold(f32),
    #[error("Invalid preprocessing setting: {0}")]
    InvalidPreprocess(String),
}

/// Image normalization settings. The four `do_*`/`use_*`/`enhance_*` switches
/// toggle the optional steps; grayscale conversion always runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessConfig {
    /// `false` reduces normalization to grayscale conversion only.
    pub enabled: bool,
    pub do_deskew: bool,
    pub do_denoise: bool,
    /// Local Gaussian-weighted threshold when true, global Otsu when false.
    pub use_adaptive_threshold: bool,
    pub enhance_contrast: bool,
    /// Estimated skew beyond this is clamped before rotating.
    pub max_skew_degrees: f32,
    /// Non-local-means filter strength; higher removes more noise and detail.
    pub denoise_strength: f32,
    pub clahe_clip_limit: f32,
    /// Tiles per side for adaptive histogram equalization.
    pub clahe_grid: u32,
    pub adaptive_block_radius: u32,
    /// Subtracted from the local mean before comparing a pixel against it.
    pub adaptive_offset: i32,
    /// Images with a side longer than this are scaled down first.
    pub max_dimension: Option<u32>,
    /// Where the normalized image is written for audit, if anywhere.
    pub save_dir: Option<PathBuf>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            do_deskew: true,
            do_denoise: true,
            use_adaptive_threshold: true,
            enhance_contrast: true,
            max_skew_degrees: 15.0,
            denoise_strength: 12.0,
            clahe_clip_limit: 3.0,
            clahe_grid: 8,
            adaptive_block_radius: 15,
            adaptive_offset: 10,
            max_dimension: Some(2800),
            save_dir: None,
        }
    }
}

/// Forward-window sizes for subject-row reconstruction. These were tuned on
/// real marks cards, not derived; treat them as knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Tokens after an anchor searched for the course title.
    pub title_window: usize,
    /// Tokens after an anchor searched for mark values.
    pub marks_window: usize,
    /// Longest digit string accepted as a mark.
    pub max_mark_len: usize,
    /// A title candidate must be longer than this many characters.
    pub min_title_len: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { title_window: 2, marks_window: 5, max_mark_len: 3, min_title_len: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub confidence_threshold: f32,
    pub output_dir: PathBuf,
    pub preprocess: PreprocessConfig,
    pub extraction: ExtractionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            output_dir: PathBuf::from("results"),
            preprocess: PreprocessConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(toml_content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.confidence_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(ConfigError::InvalidThreshold(t));
        }
        let p = &self.preprocess;
        if !(0.0..=45.0).contains(&p.max_skew_degrees) {
            return Err(ConfigError::InvalidPreprocess(format!(
                "max_skew_degrees {} outside 0..=45",
                p.max_skew_degrees
            )));
        }
        if !(p.denoise_strength > 0.0) {
            return Err(ConfigError::InvalidPreprocess(format!(
                "denoise_strength must be positive, got {}",
                p.denoise_strength
            )));
        }
        if p.clahe_grid == 0 || !(p.clahe_clip_limit > 0.0) {
            return Err(ConfigError::InvalidPreprocess(
                "clahe_grid and clahe_clip_limit must be positive".to_string(),
            ));
        }
        if p.max_dimension == Some(0) {
            return Err(ConfigError::InvalidPreprocess("max_dimension cannot be 0".to_string()));
        }
        Ok(())
    }
}
