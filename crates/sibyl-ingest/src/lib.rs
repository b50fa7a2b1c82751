//! Crawl -> chunk -> embed -> store -> link-to-graph ingestion pipeline
//! (component G).

pub mod chunker;
pub mod crawler;
pub mod embedder;
pub mod errors;
pub mod graph_link;
pub mod pipeline;
pub mod tagger;

pub use chunker::{Chunk, ChunkSource, ChunkStrategy, ChunkerConfig, DocumentChunker};
pub use crawler::{RawDocument, SourceCrawler, WalkdirCrawler, WebCrawler};
pub use embedder::{BatchEmbedder, EmbeddingCapability, MockEmbedder};
pub use errors::IngestError;
pub use pipeline::{IngestionPipeline, IngestionPipelineConfig, ProgressCallback};
