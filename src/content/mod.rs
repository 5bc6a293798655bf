pub mod config;
pub mod pipeline;
pub mod prompt;
pub mod queue;
pub mod scoring;
pub mod strategy;
pub mod types;

pub use config::PipelineConfig;
pub use pipeline::{ContentPipeline, GenerationOutcome};
pub use strategy::{ContentStrategy, StrategyTable};
pub use types::{ContentLength, ContentRequest, GeneratedContent, TopicalType, WeightedInterest};
