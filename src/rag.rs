//! Consulta RAG con citas sobre el corpus de documentos.
//!
//! Flujo:
//!   1. Selección de candidatos: documentos cuyo contenido contiene la
//!      pregunta (sin distinguir mayúsculas), los 5 más recientes.
//!   2. Sin candidatos: respuesta fija de rechazo, sin llamar al LLM.
//!   3. Contexto: cada documento recortado a 2000 caracteres y etiquetado
//!      `[DOC-N: fichero]`, en el orden de selección.
//!   4. El LLM responde citando con etiquetas `[DOC-N]`.
//!   5. Fuentes: todos los documentos seleccionados, se citen o no.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{
    error::{AppError, LlmError},
    llm::LanguageModel,
    models::{Document, DocumentSource},
    repository::{DocumentStore, StoreResult},
};

/// Máximo de documentos candidatos por pregunta.
pub const MAX_SOURCES: usize = 5;

/// Caracteres de cada documento que entran en el contexto.
pub const EXCERPT_CHARS: usize = 2000;

pub const DEFAULT_MAX_TOKENS: u64 = 2048;

pub const NO_DOCUMENTS_ANSWER: &str =
    "I don't have any documents to answer this question. Please upload some documents first.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

pub const SYSTEM_PROMPT: &str = r#"You are a scientific research assistant for a biotechnology company developing functional proteins via precision fermentation.

CRITICAL RULES:
1. Answer ONLY based on the provided documents
2. ALWAYS cite sources using [DOC-X] format
3. If information is not in the documents, say "I don't have enough information in the provided documents"
4. Never make up or hallucinate information
5. Be precise and scientific in your language"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<DocumentSource>,
}

impl RagAnswer {
    fn refusal() -> Self {
        Self {
            answer: NO_DOCUMENTS_ANSWER.to_string(),
            sources: Vec::new(),
        }
    }
}

/// Estrategia de relevancia intercambiable (subcadena hoy, embeddings mañana).
#[async_trait]
pub trait Ranker: Send + Sync {
    /// Candidatos ordenados, como mucho `limit`.
    async fn rank(&self, question: &str, limit: usize) -> StoreResult<Vec<Document>>;
}

/// Relevancia por subcadena delegada en el almacén.
pub struct SubstringRanker {
    documents: Arc<dyn DocumentStore>,
}

impl SubstringRanker {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl Ranker for SubstringRanker {
    async fn rank(&self, question: &str, limit: usize) -> StoreResult<Vec<Document>> {
        self.documents.list_documents_matching(question, limit).await
    }
}

/// Filtra `corpus` por subcadena sin distinguir mayúsculas y devuelve los
/// `limit` más recientes. Ante fechas iguales se conserva el orden del corpus.
pub fn select_candidates(question: &str, corpus: &[Document], limit: usize) -> Vec<Document> {
    let needle = question.to_lowercase();
    let mut matches: Vec<Document> = corpus
        .iter()
        .filter(|doc| doc.content.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matches.truncate(limit);
    matches
}

/// Primeros `max_chars` caracteres (no bytes) del texto.
pub fn excerpt(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &content[..byte_idx],
        None => content,
    }
}

pub fn build_context(documents: &[Document]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "[DOC-{}: {}]\n{}",
                i + 1,
                doc.filename,
                excerpt(&doc.content, EXCERPT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn build_user_prompt(context: &str, question: &str) -> String {
    format!(
        "Here are the relevant documents from our database:\n\n{context}\n\nQuestion: {question}\n\nPlease provide a detailed answer based ONLY on these documents. Include citations in [DOC-X] format."
    )
}

/// Responde con los documentos ya seleccionados. Con cero documentos devuelve
/// el rechazo fijo sin llamar al modelo.
pub async fn answer_with_documents(
    llm: &dyn LanguageModel,
    question: &str,
    documents: &[Document],
    max_tokens: u64,
) -> Result<RagAnswer, LlmError> {
    if documents.is_empty() {
        info!("Sin documentos coincidentes; se devuelve la respuesta de rechazo.");
        return Ok(RagAnswer::refusal());
    }

    let context = build_context(documents);
    let user_prompt = build_user_prompt(&context, question);
    debug!("Contexto construido con {} documentos ({} caracteres)", documents.len(), context.len());

    let answer = llm.complete(SYSTEM_PROMPT, &user_prompt, max_tokens).await?;

    Ok(RagAnswer {
        answer,
        sources: documents.iter().map(DocumentSource::from).collect(),
    })
}

/// Pregunta contra un corpus en memoria: selección + respuesta.
pub async fn answer(
    llm: &dyn LanguageModel,
    question: &str,
    corpus: &[Document],
) -> Result<RagAnswer, LlmError> {
    let candidates = select_candidates(question, corpus, MAX_SOURCES);
    answer_with_documents(llm, question, &candidates, DEFAULT_MAX_TOKENS).await
}

/// Motor sin estado: ranking inyectado + modelo inyectado.
#[derive(Clone)]
pub struct RagEngine {
    ranker: Arc<dyn Ranker>,
    llm: Arc<dyn LanguageModel>,
    max_tokens: u64,
}

impl RagEngine {
    pub fn new(ranker: Arc<dyn Ranker>, llm: Arc<dyn LanguageModel>, max_tokens: u64) -> Self {
        Self {
            ranker,
            llm,
            max_tokens,
        }
    }

    pub async fn ask(&self, question: &str) -> Result<RagAnswer, AppError> {
        let question = validate_question(question)?;
        let candidates = self.ranker.rank(question, MAX_SOURCES).await?;
        info!("Pregunta con {} documentos candidatos", candidates.len());

        Ok(answer_with_documents(self.llm.as_ref(), question, &candidates, self.max_tokens).await?)
    }

    /// Como `ask`, pero abandona la llamada en curso si llega `cancel`.
    /// Soltar el emisor sin enviar no cancela.
    /// El motor no escribe nada, así que cancelar no deja estado parcial.
    ///
    /// Es la vía de cancelación para quien use el motor como biblioteca
    /// (tareas en segundo plano, lotes). El handler HTTP no la necesita: si el
    /// cliente se desconecta, axum suelta el futuro de `ask` y la llamada al
    /// modelo se abandona igual.
    pub async fn ask_cancellable(
        &self,
        question: &str,
        cancel: oneshot::Receiver<()>,
    ) -> Result<RagAnswer, AppError> {
        tokio::select! {
            result = self.ask(question) => result,
            Ok(()) = cancel => {
                info!("Pregunta cancelada por el llamador");
                Err(AppError::ModelUnavailable(LlmError::Cancelled))
            }
        }
    }
}

fn validate_question(question: &str) -> Result<&str, AppError> {
    if question.trim().is_empty() {
        return Err(AppError::Validation("Question is required".to_string()));
    }
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    /// Modelo determinista que registra cuántas veces se le llama.
    #[derive(Default)]
    struct StubModel {
        calls: AtomicUsize,
        last_user_prompt: Mutex<String>,
        reply: String,
    }

    impl StubModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl LanguageModel for StubModel {
        async fn complete(&self, system: &str, user: &str, _max_tokens: u64) -> Result<String, LlmError> {
            assert_eq!(system, SYSTEM_PROMPT);
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_user_prompt.lock().unwrap() = user.to_string();
            Ok(self.reply.clone())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(&self, _: &str, _: &str, _: u64) -> Result<String, LlmError> {
            Err(LlmError::Provider("overloaded".to_string()))
        }
    }

    struct HangingModel;

    #[async_trait]
    impl LanguageModel for HangingModel {
        async fn complete(&self, _: &str, _: &str, _: u64) -> Result<String, LlmError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn doc(id: &str, content: &str, minute: u32) -> Document {
        Document {
            id: id.to_string(),
            filename: format!("{id}.pdf"),
            content: content.to_string(),
            mime_type: "application/pdf".to_string(),
            file_size: content.len() as i64,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            protein_id: None,
        }
    }

    #[tokio::test]
    async fn no_match_refuses_without_calling_the_model() {
        let model = StubModel::replying("should not be used");
        let corpus = vec![doc("a", "Fermentation at 30C", 0)];

        let result = answer(&model, "xyz-nonexistent-term", &corpus).await.unwrap();

        assert_eq!(result.answer, NO_DOCUMENTS_ANSWER);
        assert!(result.sources.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_corpus_refuses() {
        let model = StubModel::replying("unused");
        let result = answer(&model, "yield", &[]).await.unwrap();
        assert_eq!(result, RagAnswer::refusal());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn keeps_the_five_most_recent_matches() {
        let model = StubModel::replying("Purity was 94% [DOC-1].");
        let corpus: Vec<Document> = (0..7)
            .map(|i| doc(&format!("d{i}"), "Mass spectrometry PURITY data", i))
            .chain(std::iter::once(doc("unrelated", "stability", 59)))
            .collect();

        let result = answer(&model, "purity", &corpus).await.unwrap();

        let ids: Vec<_> = result.sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["d6", "d5", "d4", "d3", "d2"]);
        assert_eq!(result.answer, "Purity was 94% [DOC-1].");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn context_labels_follow_selection_order() {
        let model = StubModel::replying("ok");
        let corpus = vec![doc("older", "yield 85%", 1), doc("newer", "yield 92%", 2)];

        answer(&model, "Yield", &corpus).await.unwrap();

        let prompt = model.last_user_prompt.lock().unwrap().clone();
        let first = prompt.find("[DOC-1: newer.pdf]").unwrap();
        let second = prompt.find("[DOC-2: older.pdf]").unwrap();
        assert!(first < second);
        assert!(prompt.contains("yield 92%\n\n---\n\n[DOC-2: older.pdf]"));
        assert!(prompt.contains("Question: Yield"));
    }

    #[test]
    fn long_documents_are_truncated_to_exact_length() {
        let long = "é".repeat(EXCERPT_CHARS + 500);
        let context = build_context(&[doc("long", &long, 0)]);
        let body = context.strip_prefix("[DOC-1: long.pdf]\n").unwrap();
        assert_eq!(body.chars().count(), EXCERPT_CHARS);

        assert_eq!(excerpt("short", EXCERPT_CHARS), "short");
    }

    #[tokio::test]
    async fn sources_include_every_selected_document() {
        // El modelo solo cita DOC-1, pero ambas fuentes se devuelven.
        let model = StubModel::replying("[DOC-1] only");
        let corpus = vec![doc("a", "protein x", 1), doc("b", "Protein X", 2)];

        let result = answer(&model, "protein x", &corpus).await.unwrap();
        assert_eq!(result.sources.len(), 2);
    }

    #[tokio::test]
    async fn empty_model_text_yields_empty_answer() {
        let model = StubModel::replying("");
        let result = answer(&model, "protein", &[doc("a", "protein", 0)]).await.unwrap();
        assert_eq!(result.answer, "");
        assert_eq!(result.sources.len(), 1);
    }

    #[tokio::test]
    async fn model_failures_surface_as_errors() {
        let result = answer(&FailingModel, "protein", &[doc("a", "protein", 0)]).await;
        assert!(matches!(result, Err(LlmError::Provider(_))));
    }

    #[tokio::test]
    async fn engine_uses_the_store_backed_ranker() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..6 {
            let mut d = doc(&format!("d{i}"), "Fermentation run", 0);
            d.created_at = Utc::now() - Duration::minutes(10 - i);
            store.insert_document(d).unwrap();
        }
        let model = Arc::new(StubModel::replying("answer [DOC-1]"));
        let engine = RagEngine::new(
            Arc::new(SubstringRanker::new(store)),
            model.clone(),
            DEFAULT_MAX_TOKENS,
        );

        let result = engine.ask("fermentation").await.unwrap();
        assert_eq!(result.sources.len(), MAX_SOURCES);
        assert_eq!(result.sources[0].id, "d5");
        assert!(result.sources.iter().all(|s| s.id != "d0"));
    }

    #[tokio::test]
    async fn blank_questions_are_rejected() {
        let engine = RagEngine::new(
            Arc::new(SubstringRanker::new(Arc::new(InMemoryStore::new()))),
            Arc::new(StubModel::replying("unused")),
            DEFAULT_MAX_TOKENS,
        );
        let err = engine.ask("   ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn cancelling_aborts_the_in_flight_call() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_document(doc("a", "protein", 0)).unwrap();
        let engine = RagEngine::new(
            Arc::new(SubstringRanker::new(store)),
            Arc::new(HangingModel),
            DEFAULT_MAX_TOKENS,
        );

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(async move { engine.ask_cancellable("protein", cancel_rx).await });
        cancel_tx.send(()).unwrap();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(AppError::ModelUnavailable(LlmError::Cancelled))
        ));
    }

    #[tokio::test]
    async fn dropping_the_cancel_sender_still_answers() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_document(doc("a", "protein", 0)).unwrap();
        let engine = RagEngine::new(
            Arc::new(SubstringRanker::new(store)),
            Arc::new(StubModel::replying("Done [DOC-1].")),
            DEFAULT_MAX_TOKENS,
        );

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        drop(cancel_tx);

        let response = engine.ask_cancellable("protein", cancel_rx).await.unwrap();
        assert_eq!(response.answer, "Done [DOC-1].");
        assert_eq!(response.sources.len(), 1);
    }
}
