pub mod gemini;
pub mod media;
pub mod mediators;

pub use gemini::GeminiClient;
pub use mediators::{CitationRecord, Mediators, ModelRoster, SearchResult};
