//! # SurgiSense Core
//!
//! Runtime-agnostic logic for the SurgiSense backend: the overlapping
//! text chunker, the exact L2 vector index, the grounding prompt, the
//! error taxonomy, and the provider traits ([`Embedder`](embedding::Embedder),
//! [`ChatModel`](llm::ChatModel)) the application crate implements.
//!
//! This crate contains no tokio, HTTP client, or filesystem I/O.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod prompt;
