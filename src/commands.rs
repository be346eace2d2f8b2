//! Offline and one-shot CLI commands.
//!
//! `serve` lives in [`crate::server`]; everything else the binary exposes is
//! here so the same code paths the HTTP handlers use can be driven from a
//! terminal.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use surgisense_core::chunk::{chunk_text, ChunkingParams};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::extract_text;
use crate::llm::HostedChatModel;
use crate::rag::RagService;
use crate::records::digitize_discharge_summary;

/// Read a document from disk and extract its text.
pub fn read_document(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path.file_name().and_then(|n| n.to_str());
    let text = extract_text(&bytes, None, file_name)?;
    if text.trim().is_empty() {
        bail!("{}: document contains no text", path.display());
    }
    Ok(text)
}

/// `surgisense chunk <file>`: print chunk count and character ranges.
pub fn run_chunk(
    config: &Config,
    path: &Path,
    size: Option<usize>,
    overlap: Option<usize>,
) -> Result<()> {
    let params = ChunkingParams::new(
        size.unwrap_or(config.chunking.size),
        overlap.unwrap_or(config.chunking.overlap),
    )?;
    let text = read_document(path)?;
    let chunks = chunk_text(&text, &params);

    println!(
        "{} chunks (size={}, overlap={}, chars={})",
        chunks.len(),
        params.size(),
        params.overlap(),
        text.chars().count()
    );
    for chunk in &chunks {
        println!(
            "  [{}] {}..{}  {}",
            chunk.index,
            chunk.start,
            chunk.end,
            &chunk.hash[..12]
        );
    }
    Ok(())
}

/// `surgisense ask <file> <question>`: ingest one document and answer once.
pub async fn run_ask(config: &Config, path: &Path, question: &str) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let text = read_document(path)?;

    let llm = Arc::new(HostedChatModel::new(&config.llm)?);
    let embedder = create_embedder(&config.embedding)?;
    let rag = RagService::new(
        config.chunking.params()?,
        config.retrieval.top_k,
        embedder,
        llm,
    )?;

    let report = rag.try_ingest(&text).await?;
    eprintln!("Indexed {} chunks ({} dims).", report.chunks, report.dims);

    let answer = rag.try_ask(question).await?;
    for hit in &answer.retrieved {
        eprintln!("  chunk {} (distance {:.4})", hit.chunk_index, hit.distance);
    }
    println!("{}", answer.text);
    Ok(())
}

/// `surgisense digitize <file>`: run the discharge-summary extraction.
pub async fn run_digitize(config: &Config, path: &Path) -> Result<()> {
    let text = read_document(path)?;
    let llm = HostedChatModel::new(&config.llm)?;
    let outcome = digitize_discharge_summary(&llm, &config.llm.record_model, &text).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// `surgisense check-config`: print the effective settings.
pub fn run_check_config(config: &Config) {
    println!("Configuration OK");
    println!("  bind:       {}", config.server.bind);
    println!(
        "  chunking:   size={} overlap={}",
        config.chunking.size, config.chunking.overlap
    );
    println!("  top_k:      {}", config.retrieval.top_k);
    if config.embedding.is_enabled() {
        println!(
            "  embedding:  {}{}",
            config.embedding.provider,
            config
                .embedding
                .model
                .as_deref()
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        );
    } else {
        println!("  embedding:  disabled (document Q&A unavailable)");
    }
    println!("  llm:        {} @ {}", config.llm.chat_model, config.llm.base_url);
    println!("  speech:     {} @ {}", config.speech.model, config.speech.url);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_document_rejects_blank_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "   ").unwrap();
        assert!(read_document(file.path()).is_err());
    }

    #[test]
    fn read_document_returns_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Follow up with Dr Rao on 2024-03-01.").unwrap();
        assert_eq!(
            read_document(file.path()).unwrap(),
            "Follow up with Dr Rao on 2024-03-01."
        );
    }

    #[test]
    fn chunk_rejects_bad_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "some text").unwrap();
        let err = run_chunk(&Config::default(), file.path(), Some(10), Some(10)).unwrap_err();
        assert!(err.to_string().contains("invalid chunking parameters"));
    }
}
