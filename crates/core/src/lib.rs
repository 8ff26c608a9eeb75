pub mod config;
pub mod filter;
pub mod record;
pub mod token;

pub use config::{ConfigError, ExtractionConfig, PipelineConfig, PreprocessConfig};
pub use filter::filter_by_confidence;
pub use record::{DocumentRecord, StudentInfo, SubjectRow, SummaryFields};
pub use token::Token;
