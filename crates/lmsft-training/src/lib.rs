//! lmsft training data preparation
//!
//! Turns raw multi-turn datasets and a base model into fine-tuning inputs:
//! - Routing datasets to per-source normalizers (`DispatchTable`, `Normalizer`)
//! - Canonical conversations with provenance (`Conversation`)
//! - Deduplicated, seeded train/test parquet splits (`AggregatedCorpus`)
//! - An extended model whose tokenizer carries the chat template (`apply_template`)

pub mod aggregate;
pub mod artifacts;
pub mod columnar;
pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod model;
pub mod normalizers;
pub mod pipeline;
pub mod progress;
pub mod template;

pub use aggregate::{split, AggregatedCorpus, SplitCorpus, SplitSettings};
pub use artifacts::{read_conversations, write_conversations, ArtifactKind, PrepArtifact, SplitManifest};
pub use dataset::{Conversation, Message, ProcessedDataset, Role};
pub use dispatch::{resolve_routes, DispatchTable, NormalizerRegistry, Route};
pub use error::{PrepError, PrepResult, RecordError};
pub use fetch::{DataKind, Fetcher, HubFetcher, MirrorFetcher};
pub use layout::{sanitize_identifier, DataLayout};
pub use model::{apply_template, ExtendedModelArtifact, ExtensionManifest};
pub use normalizers::{NormalizeOptions, NormalizeReport, Normalizer};
pub use pipeline::{
    extend_model, AggregateSummary, DatasetOutcome, ModelSettings, NormalizeSummary, Pipeline, PipelineSettings, RunSummary,
};
pub use progress::{ProgressEvent, ProgressSink, RecordingProgressSink, TracingProgressSink};
pub use template::{ChatTemplateSpec, TemplateDocument, TurnFormat};
