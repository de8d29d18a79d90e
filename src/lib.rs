//! RAG benchmark library
//!
//! Runs sweeps of retrieval-augmented generation pipelines over a labelled
//! dataset and scores retrieval and generation quality.

pub mod benchmark;
pub mod clients;
pub mod config;
pub mod dataset;
pub mod document;
pub mod error;
pub mod metrics;
pub mod model_cache;
pub mod pipeline;
