//! Retrieval-augmented generation.
//!
//! - `embedding`: text to vector through the inference endpoint
//! - `augment`: keyword expansion of the question before search
//! - `retriever`: similarity search and hit normalisation
//! - `context_builder`: prompt context and citation block
//! - `generator`: the streamed Delta/Final answer

pub mod augment;
pub mod context_builder;
pub mod embedding;
pub mod generator;
pub mod hit;
pub mod retriever;

pub use augment::{QueryAugmenter, TriggerRule};
pub use context_builder::{build_sources_block, format_context};
pub use embedding::{Embedder, HuggingFaceEmbedder};
pub use generator::{delta_suffix, GenerationEvent, GenerationStream, StreamingGenerator};
pub use hit::{Hit, HitMetadata};
pub use retriever::{ContextSource, SupabaseVectorSearch, VectorRetriever, VectorSearch};
