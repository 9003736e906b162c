pub mod chunker;
pub mod pipeline;

pub use chunker::{ChunkDraft, Chunker, SentenceSpan};
pub use pipeline::{IngestReport, IngestionPipeline};
