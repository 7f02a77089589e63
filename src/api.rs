use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    error::AppError,
    gap_analysis::{self, GapAnalysisResult},
    models::{
        Document, Evidence, NewDocument, NewEvidence, NewProcess, NewProcessLink, NewProtein,
        Process, ProcessLink, Protein, ProteinWithRelations, QueryRecord,
    },
    rag::RagAnswer,
};

/// Texto que ve el usuario (y que queda en el historial) cuando el modelo falla.
pub const FALLBACK_ANSWER: &str = "Sorry, I encountered an error. Please try again.";

const QUERY_HISTORY_LIMIT: usize = 50;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDocumentPayload {
    protein_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCreated {
    id: String,
    filename: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Proteína con su análisis de brechas recalculado.
#[derive(Serialize)]
pub struct ProteinOverview {
    #[serde(flatten)]
    protein: Protein,
    gaps: GapAnalysisResult,
}

#[derive(Serialize)]
pub struct ProteinDetail {
    #[serde(flatten)]
    protein: ProteinWithRelations,
    gaps: GapAnalysisResult,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(query_handler))
        .route("/api/queries", get(query_history_handler))
        .route("/api/documents", get(list_documents_handler).post(create_document_handler))
        .route("/api/documents/:id/protein", put(link_document_handler))
        .route("/api/proteins", get(list_proteins_handler).post(create_protein_handler))
        .route("/api/proteins/:id", get(protein_detail_handler))
        .route("/api/proteins/:id/gaps", get(protein_gaps_handler))
        .route("/api/proteins/:id/evidence", post(add_evidence_handler))
        .route("/api/proteins/:id/processes", post(link_process_handler))
        .route("/api/processes", post(create_process_handler))
        .route("/api/gaps", get(all_gaps_handler))
        .route("/api/status", get(status_handler))
        .with_state(app_state)
}

// --- Handlers: preguntas ---

/// Extrae `question` del cuerpo. Cualquier cuerpo que no traiga una cadena no
/// vacía es un error de validación, sin exponer el mensaje de serde.
fn question_from(payload: Result<Json<Value>, JsonRejection>) -> Result<String, AppError> {
    let required = || AppError::Validation("Question is required".to_string());
    let Json(body) = payload.map_err(|rejection| {
        warn!("Cuerpo de consulta inválido: {}", rejection.body_text());
        required()
    })?;

    body.get("question")
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(required)
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<RagAnswer>, AppError> {
    let question = question_from(payload)?;

    match state.rag.ask(&question).await {
        Ok(response) => {
            // Se registra todo lo respondido, incluidos los rechazos.
            state.queries.log_query(&question, &response.answer).await?;
            Ok(Json(response))
        }
        Err(AppError::ModelUnavailable(err)) => {
            warn!("Pregunta sin respuesta del modelo: {}", err);
            if let Err(log_err) = state.queries.log_query(&question, FALLBACK_ANSWER).await {
                error!("No se pudo registrar la consulta fallida: {}", log_err);
            }
            Err(AppError::ModelUnavailable(err))
        }
        Err(other) => Err(other),
    }
}

#[axum::debug_handler]
async fn query_history_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<QueryRecord>>, AppError> {
    Ok(Json(state.queries.recent_queries(QUERY_HISTORY_LIMIT).await?))
}

// --- Handlers: documentos ---

#[axum::debug_handler]
async fn create_document_handler(
    State(state): State<AppState>,
    Json(payload): Json<NewDocument>,
) -> Result<(StatusCode, Json<DocumentCreated>), AppError> {
    if payload.filename.trim().is_empty() {
        return Err(AppError::Validation("No file provided".to_string()));
    }

    let document = state.documents.create_document(payload).await?;
    info!("Documento registrado: {} ({} bytes)", document.filename, document.file_size);

    Ok((
        StatusCode::CREATED,
        Json(DocumentCreated {
            id: document.id,
            filename: document.filename,
            created_at: document.created_at,
        }),
    ))
}

#[axum::debug_handler]
async fn list_documents_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Document>>, AppError> {
    Ok(Json(state.documents.list_documents().await?))
}

#[axum::debug_handler]
async fn link_document_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Json(payload): Json<LinkDocumentPayload>,
) -> Result<Json<Document>, AppError> {
    Ok(Json(
        state
            .documents
            .link_document(&document_id, &payload.protein_id)
            .await?,
    ))
}

// --- Handlers: proteínas y análisis de brechas ---

#[axum::debug_handler]
async fn list_proteins_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProteinOverview>>, AppError> {
    let proteins = state.proteins.list_proteins().await?;
    let overviews = try_join_all(proteins.into_iter().map(|protein| {
        let store = state.proteins.clone();
        async move {
            let gaps = gap_analysis::analyze_protein(store.as_ref(), &protein.id).await?;
            Ok::<_, AppError>(ProteinOverview { protein, gaps })
        }
    }))
    .await?;
    Ok(Json(overviews))
}

#[axum::debug_handler]
async fn create_protein_handler(
    State(state): State<AppState>,
    Json(payload): Json<NewProtein>,
) -> Result<(StatusCode, Json<Protein>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("Protein name is required".to_string()));
    }
    let protein = state.proteins.create_protein(payload).await?;
    Ok((StatusCode::CREATED, Json(protein)))
}

#[axum::debug_handler]
async fn protein_detail_handler(
    State(state): State<AppState>,
    Path(protein_id): Path<String>,
) -> Result<Json<ProteinDetail>, AppError> {
    let protein = state.proteins.get_protein_with_relations(&protein_id).await?;
    let gaps = gap_analysis::evaluate(&protein);
    Ok(Json(ProteinDetail { protein, gaps }))
}

#[axum::debug_handler]
async fn protein_gaps_handler(
    State(state): State<AppState>,
    Path(protein_id): Path<String>,
) -> Result<Json<GapAnalysisResult>, AppError> {
    Ok(Json(
        gap_analysis::analyze_protein(state.proteins.as_ref(), &protein_id).await?,
    ))
}

#[axum::debug_handler]
async fn all_gaps_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<GapAnalysisResult>>, AppError> {
    Ok(Json(
        gap_analysis::analyze_all_proteins(state.proteins.as_ref()).await?,
    ))
}

#[axum::debug_handler]
async fn add_evidence_handler(
    State(state): State<AppState>,
    Path(protein_id): Path<String>,
    Json(payload): Json<NewEvidence>,
) -> Result<(StatusCode, Json<Evidence>), AppError> {
    payload.validate().map_err(AppError::Validation)?;
    let evidence = state.proteins.add_evidence(&protein_id, payload).await?;
    Ok((StatusCode::CREATED, Json(evidence)))
}

#[axum::debug_handler]
async fn create_process_handler(
    State(state): State<AppState>,
    Json(payload): Json<NewProcess>,
) -> Result<(StatusCode, Json<Process>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("Process name is required".to_string()));
    }
    let process = state.proteins.create_process(payload).await?;
    Ok((StatusCode::CREATED, Json(process)))
}

#[axum::debug_handler]
async fn link_process_handler(
    State(state): State<AppState>,
    Path(protein_id): Path<String>,
    Json(payload): Json<NewProcessLink>,
) -> Result<(StatusCode, Json<ProcessLink>), AppError> {
    let link = state.proteins.link_process(&protein_id, payload).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

// --- Salud ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.documents.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "llm_provider": format!("{:?}", state.config.llm_provider),
                "llm_model": state.config.llm_chat_model,
            })),
        ),
        Err(e) => {
            error!("Error en el health check del almacén: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        error::LlmError,
        gap_analysis::ReadinessStatus,
        llm::LanguageModel,
        memory_store::InMemoryStore,
        rag::{RagEngine, SubstringRanker, DEFAULT_MAX_TOKENS, NO_DOCUMENTS_ANSWER},
        repository::{DocumentStore, ProteinStore, QueryLog},
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(&self, _: &str, _: &str, _: u64) -> Result<String, LlmError> {
            Ok("Yield reached 85% [DOC-1].".to_string())
        }
    }

    struct DownModel;

    #[async_trait]
    impl LanguageModel for DownModel {
        async fn complete(&self, _: &str, _: &str, _: u64) -> Result<String, LlmError> {
            Err(LlmError::Timeout(60))
        }
    }

    fn state_with(model: Arc<dyn LanguageModel>) -> (AppState, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let config = AppConfig::from_lookup(|key| match key {
            "STORE_BACKEND" => Some("memory".to_string()),
            _ => None,
        })
        .unwrap();
        let state = AppState {
            config,
            documents: store.clone(),
            proteins: store.clone(),
            queries: store.clone(),
            rag: RagEngine::new(Arc::new(SubstringRanker::new(store.clone())), model, DEFAULT_MAX_TOKENS),
        };
        (state, store)
    }

    fn question(q: Option<&str>) -> Result<Json<Value>, JsonRejection> {
        Ok(Json(match q {
            Some(q) => json!({ "question": q }),
            None => json!({}),
        }))
    }

    async fn add_document(store: &InMemoryStore, content: &str) {
        store
            .create_document(NewDocument {
                filename: "Protein_X_Fermentation_Study.pdf".into(),
                content: content.into(),
                mime_type: "application/pdf".into(),
                file_size: Some(1024),
                protein_id: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_question_is_a_validation_error() {
        let (state, store) = state_with(Arc::new(EchoModel));
        let err = query_handler(State(state.clone()), question(None)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let err = query_handler(State(state), question(Some("  "))).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.recent_queries(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_string_question_is_a_validation_error() {
        let (state, store) = state_with(Arc::new(EchoModel));
        add_document(&store, "42 mg/L titer").await;

        for body in [json!({ "question": 42 }), json!({ "question": null }), json!(["42"])] {
            let err = query_handler(State(state.clone()), Ok(Json(body))).await.unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
            assert_eq!(err.public_message(), "Question is required");
        }
        assert!(store.recent_queries(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_body_is_a_validation_error() {
        use axum::{body::Body, extract::FromRequest, http::{header, Request}};

        let (state, _) = state_with(Arc::new(EchoModel));
        let request = Request::post("/api/query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"question\": "))
            .unwrap();
        let payload = Json::<Value>::from_request(request, &()).await;
        assert!(payload.is_err());

        let err = query_handler(State(state), payload).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Question is required");
    }

    #[tokio::test]
    async fn answered_questions_are_logged() {
        let (state, store) = state_with(Arc::new(EchoModel));
        add_document(&store, "Fermentation yield was 85%").await;

        let Json(response) = query_handler(State(state), question(Some("fermentation yield")))
            .await
            .unwrap();
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].filename, "Protein_X_Fermentation_Study.pdf");

        let history = store.recent_queries(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].answer, response.answer);
    }

    #[tokio::test]
    async fn refusals_are_logged_too() {
        let (state, store) = state_with(Arc::new(EchoModel));
        let Json(response) = query_handler(State(state), question(Some("xyz-nonexistent-term")))
            .await
            .unwrap();
        assert_eq!(response.answer, NO_DOCUMENTS_ANSWER);
        assert_eq!(store.recent_queries(10).await.unwrap()[0].answer, NO_DOCUMENTS_ANSWER);
    }

    #[tokio::test]
    async fn model_outage_returns_generic_error_and_logs_fallback() {
        let (state, store) = state_with(Arc::new(DownModel));
        add_document(&store, "purity 94%").await;

        let err = query_handler(State(state), question(Some("purity"))).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.public_message().contains("60"));

        let history = store.recent_queries(10).await.unwrap();
        assert_eq!(history[0].answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn gaps_for_unknown_protein_are_not_found() {
        let (state, _) = state_with(Arc::new(EchoModel));
        let err = protein_gaps_handler(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn protein_endpoints_report_readiness() {
        let (state, store) = state_with(Arc::new(EchoModel));
        let protein = store
            .create_protein(NewProtein { name: "Protein Y".into(), sequence: None, maturity: "R&D".into() })
            .await
            .unwrap();

        for i in 0..2 {
            let (status, _) = add_evidence_handler(
                State(state.clone()),
                Path(protein.id.clone()),
                Json(NewEvidence { evidence_type: "Stability Test".into(), description: format!("run {i}"), confidence: Some(80) }),
            )
            .await
            .unwrap();
            assert_eq!(status, StatusCode::CREATED);
        }

        let Json(gaps) = protein_gaps_handler(State(state.clone()), Path(protein.id.clone()))
            .await
            .unwrap();
        assert_eq!(gaps.status, ReadinessStatus::InProgress);
        assert_eq!(gaps.recommendations.len(), 3);

        let Json(all) = all_gaps_handler(State(state.clone())).await.unwrap();
        assert_eq!(all, vec![gaps.clone()]);

        let Json(detail) = protein_detail_handler(State(state.clone()), Path(protein.id.clone()))
            .await
            .unwrap();
        assert_eq!(detail.protein.evidence.len(), 2);
        assert_eq!(detail.gaps, gaps);

        let Json(overview) = list_proteins_handler(State(state)).await.unwrap();
        assert_eq!(overview.len(), 1);
        assert_eq!(overview[0].gaps.status, ReadinessStatus::InProgress);
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_rejected() {
        let (state, store) = state_with(Arc::new(EchoModel));
        let protein = store
            .create_protein(NewProtein { name: "Protein X".into(), sequence: None, maturity: "MVP".into() })
            .await
            .unwrap();
        let err = add_evidence_handler(
            State(state),
            Path(protein.id),
            Json(NewEvidence { evidence_type: "QC".into(), description: String::new(), confidence: Some(150) }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn documents_can_be_registered_and_linked() {
        let (state, store) = state_with(Arc::new(EchoModel));
        let protein = store
            .create_protein(NewProtein { name: "Protein Z".into(), sequence: None, maturity: "Production".into() })
            .await
            .unwrap();

        let (status, Json(created)) = create_document_handler(
            State(state.clone()),
            Json(NewDocument {
                filename: "Protein_Z_Production_Validation.pdf".into(),
                content: "validated at scale".into(),
                mime_type: "application/pdf".into(),
                file_size: None,
                protein_id: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(linked) = link_document_handler(
            State(state.clone()),
            Path(created.id.clone()),
            Json(LinkDocumentPayload { protein_id: protein.id.clone() }),
        )
        .await
        .unwrap();
        assert_eq!(linked.protein_id.as_deref(), Some(protein.id.as_str()));

        let Json(docs) = list_documents_handler(State(state)).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn status_reports_ok_for_memory_store() {
        let (state, _) = state_with(Arc::new(EchoModel));
        let response = status_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
