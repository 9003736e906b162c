pub mod answer;
pub mod confidence;
pub mod extraction;
pub mod generator;
pub mod llm;
pub mod prompt;

pub use answer::{AnswerGenerationAgent, GeneratedAnswer};
pub use confidence::{ConfidenceCalibrator, ConfidenceReport, UncertaintyLevel};
pub use extraction::{Extraction, Provenance};
pub use generator::{GenerationOutcome, TwoPassGenerator};
pub use llm::LlmProvider;
