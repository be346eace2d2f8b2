//! Retrieval-augmented question answering over one ingested document.
//!
//! [`RagService`] owns the chunking parameters, the embedding provider, the
//! chat model, and the session state. The state is an immutable snapshot
//! ([`IndexedDocument`]: chunks + vector index) behind an `RwLock`:
//!
//! ```text
//!   EMPTY ──ingest──▶ READY ──ingest──▶ READY (replaced)
//!                       │
//!                      ask ─▶ embed question ─▶ top-k ─▶ grounding prompt ─▶ model
//! ```
//!
//! Ingestion builds the new snapshot off to the side and installs it with a
//! single pointer swap, so no reader ever sees chunks from one document
//! paired with the index of another. A failed ingestion leaves the previous
//! snapshot in place. Readers clone the `Arc` under a short read lock and
//! never hold the lock across an await.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use surgisense_core::chunk::{chunk_text, content_hash, Chunk, ChunkingParams};
use surgisense_core::embedding::Embedder;
use surgisense_core::error::{ConfigurationError, IndexError, InputError, RagError};
use surgisense_core::index::VectorIndex;
use surgisense_core::llm::{ChatMessage, ChatModel, ChatRequest};
use surgisense_core::prompt::{grounding_prompt, join_context, ANSWER_FAILED, NOT_READY};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default number of chunks retrieved per question.
pub const DEFAULT_TOP_K: usize = 3;

/// One committed index generation: the chunks of a document and their vectors.
#[derive(Debug)]
pub struct IndexedDocument {
    pub generation: Uuid,
    pub chunks: Vec<Chunk>,
    pub index: VectorIndex,
    /// SHA-256 of the full document text; logged instead of the content.
    pub fingerprint: String,
    pub ingested_at: DateTime<Utc>,
}

/// Summary of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub generation: Uuid,
    pub chunks: usize,
    pub dims: usize,
    pub fingerprint: String,
}

/// A chunk selected for a question, with its squared L2 distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_index: usize,
    pub distance: f32,
    pub text: String,
}

/// Result of a question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// Concatenated context sent to the model; `None` when no document is loaded.
    pub context: Option<String>,
    pub retrieved: Vec<RetrievedChunk>,
}

impl Answer {
    fn not_ready() -> Self {
        Self {
            text: NOT_READY.to_string(),
            context: None,
            retrieved: Vec::new(),
        }
    }
}

/// Externally visible session status.
#[derive(Debug, Clone, Serialize)]
pub struct RagStatus {
    pub ready: bool,
    pub chunks: usize,
    pub generation: Option<Uuid>,
    pub ingested_at: Option<DateTime<Utc>>,
    pub embedding_model: String,
}

/// The RAG orchestrator. Shared across request handlers via `Arc`.
pub struct RagService {
    params: ChunkingParams,
    top_k: usize,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    state: RwLock<Option<Arc<IndexedDocument>>>,
    /// Serializes ingestions so concurrent uploads commit in arrival order.
    ingest_gate: Mutex<()>,
}

impl RagService {
    pub fn new(
        params: ChunkingParams,
        top_k: usize,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
    ) -> Result<Self, ConfigurationError> {
        if top_k == 0 {
            return Err(ConfigurationError::Invalid(
                "retrieval.top_k must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            params,
            top_k,
            embedder,
            llm,
            state: RwLock::new(None),
            ingest_gate: Mutex::new(()),
        })
    }

    pub fn params(&self) -> &ChunkingParams {
        &self.params
    }

    /// The committed snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<IndexedDocument>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, next: Option<Arc<IndexedDocument>>) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn status(&self) -> RagStatus {
        let snapshot = self.snapshot();
        RagStatus {
            ready: snapshot.is_some(),
            chunks: snapshot.as_ref().map(|s| s.chunks.len()).unwrap_or(0),
            generation: snapshot.as_ref().map(|s| s.generation),
            ingested_at: snapshot.as_ref().map(|s| s.ingested_at),
            embedding_model: self.embedder.model_name().to_string(),
        }
    }

    /// Drop the current document and return to the empty state.
    ///
    /// Waits for any in-flight ingestion so it cannot re-install a document
    /// after the clear.
    pub async fn reset(&self) {
        let _gate = self.ingest_gate.lock().await;
        self.install(None);
        info!("document session cleared");
    }

    /// Chunk, embed, and index `document_text`, replacing the current document.
    ///
    /// On error the previously committed document stays in place.
    pub async fn try_ingest(&self, document_text: &str) -> Result<IngestReport, RagError> {
        if document_text.trim().is_empty() {
            return Err(InputError::EmptyDocument.into());
        }

        let _gate = self.ingest_gate.lock().await;

        let chunks = chunk_text(document_text, &self.params);
        if chunks.is_empty() {
            return Err(InputError::EmptyDocument.into());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        debug!(chunks = chunks.len(), "embedding document chunks");
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::CountMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            }
            .into());
        }
        let index = VectorIndex::build(vectors)?;

        let snapshot = Arc::new(IndexedDocument {
            generation: Uuid::new_v4(),
            fingerprint: content_hash(document_text),
            chunks,
            index,
            ingested_at: Utc::now(),
        });
        let report = IngestReport {
            generation: snapshot.generation,
            chunks: snapshot.chunks.len(),
            dims: snapshot.index.dims(),
            fingerprint: snapshot.fingerprint.clone(),
        };
        self.install(Some(snapshot));

        let short_hash = &report.fingerprint[..12];
        info!(
            generation = %report.generation,
            chunks = report.chunks,
            dims = report.dims,
            fingerprint = short_hash,
            "document indexed"
        );
        Ok(report)
    }

    /// Boundary form of [`try_ingest`](Self::try_ingest): `true` on success.
    pub async fn ingest(&self, document_text: &str) -> bool {
        match self.try_ingest(document_text).await {
            Ok(_) => true,
            Err(e @ RagError::Input(_)) => {
                warn!(error = %e, "document ingestion rejected");
                false
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, "RAG ingestion error");
                false
            }
        }
    }

    /// Embed `question` and return the nearest chunks of the current document.
    ///
    /// Returns an empty list when no document is loaded.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>, RagError> {
        match self.snapshot() {
            Some(snapshot) => self.retrieve_from(&snapshot, question).await,
            None => Ok(Vec::new()),
        }
    }

    async fn retrieve_from(
        &self,
        snapshot: &IndexedDocument,
        question: &str,
    ) -> Result<Vec<RetrievedChunk>, RagError> {
        let query = self.embedder.embed_one(question).await?;
        let hits = snapshot.index.search(&query, self.top_k)?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                snapshot.chunks.get(hit.chunk_index).map(|chunk| RetrievedChunk {
                    chunk_index: hit.chunk_index,
                    distance: hit.distance,
                    text: chunk.text.clone(),
                })
            })
            .collect())
    }

    /// Answer `question` from the current document.
    ///
    /// With no document loaded this returns the fixed "not ready" answer for
    /// any input. Embedding or model failures are returned as errors.
    pub async fn try_ask(&self, question: &str) -> Result<Answer, RagError> {
        let snapshot = match self.snapshot() {
            Some(s) => s,
            None => return Ok(Answer::not_ready()),
        };

        let retrieved = self.retrieve_from(&snapshot, question).await?;
        let texts: Vec<&str> = retrieved.iter().map(|r| r.text.as_str()).collect();
        let context = join_context(&texts);

        debug!(
            generation = %snapshot.generation,
            retrieved = retrieved.len(),
            context_chars = context.len(),
            "asking chat model"
        );

        let request = ChatRequest::new(vec![ChatMessage::user(grounding_prompt(
            &context, question,
        ))])
        .with_temperature(0.0);
        let text = self.llm.complete(&request).await?;

        Ok(Answer {
            text,
            context: Some(context),
            retrieved,
        })
    }

    /// Boundary form of [`try_ask`](Self::try_ask): never fails, degrading to
    /// a fixed sentence when an upstream call errors.
    pub async fn ask(&self, question: &str) -> String {
        match self.try_ask(question).await {
            Ok(answer) => answer.text,
            Err(e) => {
                error!(kind = e.kind(), error = %e, "RAG chat error");
                ANSWER_FAILED.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use surgisense_core::error::UpstreamError;
    use surgisense_core::prompt::{parse_grounding_prompt, NOT_SPECIFIED};

    const DISCHARGE: &str = "Patient underwent appendectomy on 2024-01-01. Discharge meds: Amoxicillin 500mg twice daily.";

    /// Bag-of-words embedder: each lowercase word hashed into one of `DIMS` buckets.
    struct HashingEmbedder {
        fail: AtomicBool,
    }

    const DIMS: usize = 64;

    impl HashingEmbedder {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
            }
        }

        fn vector(text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; DIMS];
            for word in text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
            {
                let mut h: u32 = 2166136261;
                for b in word.to_lowercase().bytes() {
                    h ^= b as u32;
                    h = h.wrapping_mul(16777619);
                }
                v[(h as usize) % DIMS] += 1.0;
            }
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                v.iter_mut().for_each(|x| *x /= norm);
            }
            v
        }
    }

    #[async_trait]
    impl Embedder for HashingEmbedder {
        fn model_name(&self) -> &str {
            "hashing-test"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(UpstreamError::Timeout {
                    operation: "embedding",
                    timeout_secs: 1,
                });
            }
            Ok(texts.iter().map(|t| Self::vector(t)).collect())
        }
    }

    /// Returns one vector fewer than requested.
    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
            Ok(texts.iter().skip(1).map(|_| vec![0.0, 1.0]).collect())
        }
    }

    /// Blocks inside `embed` until released, to hold an ingestion in flight.
    struct GatedEmbedder {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl Embedder for GatedEmbedder {
        fn model_name(&self) -> &str {
            "gated"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(texts.iter().map(|t| HashingEmbedder::vector(t)).collect())
        }
    }

    /// Plays a grounded model: answers with the first context sentence that
    /// mentions one of `keywords`, otherwise with the "does not specify" reply.
    struct KeywordModel {
        keywords: Vec<&'static str>,
        prompts: StdMutex<Vec<String>>,
        temperatures: StdMutex<Vec<Option<f32>>>,
        fail: AtomicBool,
    }

    impl KeywordModel {
        fn new(keywords: &[&'static str]) -> Self {
            Self {
                keywords: keywords.to_vec(),
                prompts: StdMutex::new(Vec::new()),
                temperatures: StdMutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            }
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ChatModel for KeywordModel {
        fn model_name(&self) -> &str {
            "keyword-test"
        }
        async fn complete(&self, request: &ChatRequest) -> Result<String, UpstreamError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(UpstreamError::Status {
                    operation: "chat completion",
                    status: 503,
                    body: "overloaded".to_string(),
                });
            }
            let prompt = request.messages[0].text();
            self.prompts.lock().unwrap().push(prompt.clone());
            self.temperatures.lock().unwrap().push(request.temperature);

            let (context, _question) = parse_grounding_prompt(&prompt).unwrap();
            let answer = context
                .split(". ")
                .find(|sentence| {
                    let lower = sentence.to_lowercase();
                    self.keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
                })
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| NOT_SPECIFIED.to_string());
            Ok(answer)
        }
    }

    fn service(
        size: usize,
        overlap: usize,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
    ) -> RagService {
        RagService::new(
            ChunkingParams::new(size, overlap).unwrap(),
            DEFAULT_TOP_K,
            embedder,
            llm,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ask_before_ingest_returns_sentinel() {
        let llm = Arc::new(KeywordModel::new(&["anything"]));
        let rag = service(800, 100, Arc::new(HashingEmbedder::new()), llm.clone());
        for question in ["What medication was prescribed?", "", "   ", "¿Qué?"] {
            assert_eq!(rag.ask(question).await, NOT_READY);
        }
        assert!(llm.prompts.lock().unwrap().is_empty());
        assert!(!rag.status().ready);
    }

    #[tokio::test]
    async fn test_end_to_end_single_chunk() {
        let llm = Arc::new(KeywordModel::new(&["Amoxicillin"]));
        let rag = service(800, 100, Arc::new(HashingEmbedder::new()), llm.clone());

        assert!(rag.ingest(DISCHARGE).await);
        assert_eq!(rag.status().chunks, 1);

        let answer = rag.try_ask("What medication was prescribed?").await.unwrap();
        assert_eq!(answer.context.as_deref(), Some(DISCHARGE));
        assert_eq!(answer.retrieved.len(), 1);
        assert_ne!(answer.text, NOT_SPECIFIED);
        assert_ne!(answer.text, NOT_READY);
        assert!(answer.text.contains("Amoxicillin"));

        assert_eq!(llm.temperatures.lock().unwrap()[0], Some(0.0));
        assert!(llm.last_prompt().contains(NOT_SPECIFIED));
    }

    #[tokio::test]
    async fn test_unrelated_question_declines() {
        let llm = Arc::new(KeywordModel::new(&["warfarin"]));
        let rag = service(800, 100, Arc::new(HashingEmbedder::new()), llm.clone());
        assert!(rag.ingest(DISCHARGE).await);

        let answer = rag.ask("Is the patient taking warfarin?").await;
        assert_eq!(answer, NOT_SPECIFIED);
    }

    #[tokio::test]
    async fn test_reingest_replaces_previous_document() {
        let llm = Arc::new(KeywordModel::new(&["medication", "meds"]));
        let rag = service(60, 10, Arc::new(HashingEmbedder::new()), llm.clone());

        let doc_a = "Alpha record. Knee replacement performed on 2023-05-05. Warfarin 5mg nightly. Physiotherapy weekly for six weeks.";
        let doc_b = "Bravo record. Cholecystectomy performed on 2024-02-10. Discharge meds: Paracetamol 1g as needed. Follow up in ten days.";

        assert!(rag.ingest(doc_a).await);
        let first = rag.snapshot().unwrap().generation;
        assert!(rag.ingest(doc_b).await);
        assert_ne!(rag.snapshot().unwrap().generation, first);

        let answer = rag.try_ask("Which medication?").await.unwrap();
        let context = answer.context.unwrap();
        assert!(!context.contains("Warfarin"));
        assert!(!context.contains("Alpha"));
        for r in &answer.retrieved {
            assert!(doc_b.contains(&r.text));
        }
        assert_eq!(
            rag.status().chunks,
            chunk_text(doc_b, rag.params()).len()
        );
    }

    #[tokio::test]
    async fn test_retrieval_is_deterministic_and_ordered() {
        let llm = Arc::new(KeywordModel::new(&[]));
        let rag = service(40, 8, Arc::new(HashingEmbedder::new()), llm);
        let doc = "Wound check on day three shows mild redness. \
                   Sutures removed on day ten. \
                   Patient reports pain score of two. \
                   Amoxicillin continued for five more days. \
                   Next review with Dr Rao on 2024-03-01.";
        assert!(rag.ingest(doc).await);

        let first = rag.retrieve("When were sutures removed?").await.unwrap();
        let second = rag.retrieve("When were sutures removed?").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), DEFAULT_TOP_K);
        for pair in first.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn test_context_joined_in_distance_order() {
        let llm = Arc::new(KeywordModel::new(&[]));
        let rag = service(30, 5, Arc::new(HashingEmbedder::new()), llm.clone());
        assert!(rag
            .ingest("Red flags include fever above 38C, spreading redness, or discharge from the incision site.")
            .await);

        let answer = rag.try_ask("fever redness").await.unwrap();
        let expected: Vec<&str> = answer.retrieved.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(answer.context.unwrap(), expected.join("\n\n"));
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let rag = service(
            800,
            100,
            Arc::new(HashingEmbedder::new()),
            Arc::new(KeywordModel::new(&[])),
        );
        assert!(!rag.ingest("").await);
        assert!(!rag.ingest(" \n\t ").await);
        assert!(matches!(
            rag.try_ingest("").await,
            Err(RagError::Input(InputError::EmptyDocument))
        ));
        assert!(!rag.status().ready);
    }

    #[tokio::test]
    async fn test_failed_ingest_keeps_previous_document() {
        let embedder = Arc::new(HashingEmbedder::new());
        let llm = Arc::new(KeywordModel::new(&["Amoxicillin"]));
        let rag = service(800, 100, embedder.clone(), llm);

        assert!(rag.ingest(DISCHARGE).await);
        let before = rag.snapshot().unwrap();

        embedder.fail.store(true, Ordering::SeqCst);
        let err = rag.try_ingest("Completely different document.").await.unwrap_err();
        assert_eq!(err.kind(), "upstream_timeout");
        embedder.fail.store(false, Ordering::SeqCst);

        let after = rag.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(rag.ask("medication?").await.contains("Amoxicillin"));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_rejected() {
        let rag = service(
            10,
            2,
            Arc::new(ShortEmbedder),
            Arc::new(KeywordModel::new(&[])),
        );
        let err = rag.try_ingest("abcdefghijklmnopqrstuvwxyz").await.unwrap_err();
        assert!(matches!(
            err,
            RagError::Index(IndexError::CountMismatch { .. })
        ));
        assert!(rag.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_upstream_failure_degrades_answer() {
        let embedder = Arc::new(HashingEmbedder::new());
        let llm = Arc::new(KeywordModel::new(&["Amoxicillin"]));
        let rag = service(800, 100, embedder.clone(), llm.clone());
        assert!(rag.ingest(DISCHARGE).await);

        llm.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            rag.try_ask("medication?").await,
            Err(RagError::Upstream(_))
        ));
        assert_eq!(rag.ask("medication?").await, ANSWER_FAILED);
        llm.fail.store(false, Ordering::SeqCst);

        embedder.fail.store(true, Ordering::SeqCst);
        assert_eq!(rag.ask("medication?").await, ANSWER_FAILED);
    }

    #[tokio::test]
    async fn test_reset_returns_to_empty() {
        let rag = service(
            800,
            100,
            Arc::new(HashingEmbedder::new()),
            Arc::new(KeywordModel::new(&[])),
        );
        assert!(rag.ingest(DISCHARGE).await);
        rag.reset().await;
        assert_eq!(rag.ask("anything").await, NOT_READY);
    }

    #[tokio::test]
    async fn test_reset_during_ingest_is_not_undone() {
        let embedder = Arc::new(GatedEmbedder {
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let rag = Arc::new(service(
            800,
            100,
            embedder.clone(),
            Arc::new(KeywordModel::new(&[])),
        ));

        let writer = Arc::clone(&rag);
        let ingest = tokio::spawn(async move { writer.ingest(DISCHARGE).await });
        embedder.started.notified().await;

        let clearer = Arc::clone(&rag);
        let reset = tokio::spawn(async move { clearer.reset().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        embedder.release.notify_one();

        assert!(ingest.await.unwrap());
        reset.await.unwrap();
        assert!(rag.snapshot().is_none());
        assert_eq!(rag.ask("medication?").await, NOT_READY);
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let result = RagService::new(
            ChunkingParams::default(),
            0,
            Arc::new(HashingEmbedder::new()),
            Arc::new(KeywordModel::new(&[])),
        );
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ask_sees_one_document() {
        let llm = Arc::new(KeywordModel::new(&[]));
        let rag = Arc::new(service(
            24,
            4,
            Arc::new(HashingEmbedder::new()),
            llm,
        ));
        let doc_a = "alpha ".repeat(40);
        let doc_b = "bravo ".repeat(40);
        assert!(rag.ingest(&doc_a).await);

        let mut handles = Vec::new();
        for i in 0..16 {
            let writer = Arc::clone(&rag);
            let doc = if i % 2 == 0 { doc_b.clone() } else { doc_a.clone() };
            handles.push(tokio::spawn(async move {
                writer.ingest(&doc).await;
            }));
            let reader = Arc::clone(&rag);
            handles.push(tokio::spawn(async move {
                let answer = reader.try_ask("alpha bravo").await.unwrap();
                let context = answer.context.unwrap();
                assert!(
                    !(context.contains("alpha") && context.contains("bravo")),
                    "context mixed two documents"
                );
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let snapshot = rag.snapshot().unwrap();
        assert_eq!(snapshot.chunks.len(), snapshot.index.len());
    }
}
