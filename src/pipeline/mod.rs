//! RAG pipeline: stage registry, validation and execution
//!
//! ## Modules
//!
//! - `stages` - one trait per category plus the built-in techniques
//! - `registry` - closed technique enum, name lookup, stage construction
//! - `validator` - pure configuration checks (errors vs. warnings)
//! - `executor` - runs one input through the enabled stages
//! - `cross_encoder` - fastembed rerankers behind a single-flight model cache

pub mod cross_encoder;
pub mod executor;
pub mod registry;
pub mod stages;
pub mod validator;

pub use cross_encoder::{CrossEncoder, CrossEncoderLoader, FastEmbedLoader, RerankerModels};
pub use executor::{execute, PipelineExecutor, PipelineResult, StageTimings, Stages};
pub use registry::{Stability, StageRegistry, StageServices, Technique, DEFAULT_RETRIEVAL_K};
pub use stages::{DocumentFilter, Generation, Generator, PromptBuilder, Reranker, Retriever};
pub use validator::{validate, ConfigValidator, ValidationResult};
