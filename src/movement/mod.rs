pub mod classifier;
pub mod config;
pub mod types;

pub use classifier::MovementClassifier;
pub use config::ClassifierConfig;
pub use types::{LocationReading, MovementAnalysis, MovementMode, Trend};
