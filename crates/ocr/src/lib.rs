pub mod batch;
pub mod export;
pub mod extract;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;

pub use batch::{process_batch, BatchOutcome};
pub use export::{save_all, ArtifactPaths, ExportError};
pub use extract::{ExtractError, Extractor};
pub use pipeline::{MarksCardPipeline, PipelineError, ProcessOutcome};
pub use preprocess::{NormalizedImage, Normalizer, PreprocessError};
pub use recognizer::{Detection, MockTokenSource, SidecarTokenSource, TokenSource, TokenSourceError};

#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractTokenSource;
