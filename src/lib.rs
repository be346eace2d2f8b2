//! # SurgiSense
//!
//! Backend for a surgical-recovery dashboard: digitizes medical documents
//! into structured data, answers questions grounded in the most recently
//! uploaded document, transcribes voice notes, and assesses wound photos.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ extract ──┬──▶ hosted LLM (structured extraction) ──▶ JSON
//!                       │
//!                       └──▶ chunk ──▶ embed ──▶ VectorIndex (one document)
//!                                                      │
//!  question ──▶ embed ──▶ top-k ──▶ grounding prompt ──┴──▶ hosted LLM ──▶ answer
//! ```
//!
//! Chunking, the vector index, prompts and the error taxonomy live in the
//! `surgisense-core` crate; this crate wires them to HTTP providers, the
//! axum server and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding providers (local, OpenAI, Ollama) |
//! | [`extract`] | PDF / text extraction |
//! | [`llm`] | OpenAI-compatible chat-completions client |
//! | [`rag`] | Single-document RAG orchestrator |
//! | [`records`] | Surgical data and discharge-summary extraction |
//! | [`speech`] | Speech-to-text |
//! | [`wound`] | Wound-image assessment |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI commands |

pub mod commands;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod llm;
pub mod rag;
pub mod records;
pub mod server;
pub mod speech;
pub mod upstream;
pub mod wound;
