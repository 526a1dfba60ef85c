//! Chunk-to-payload mapping.
//!
//! Shapes a raw [`ChunkRecord`](crate::model::ChunkRecord) into the content
//! and metadata sent to the memory service, and scores its quality.

pub mod metadata;

pub use metadata::{
    normalize_content, ChunkMetadata, MappedChunk, MetadataMapper, MetadataValidation, PageSource,
    TransformationSummary,
};
