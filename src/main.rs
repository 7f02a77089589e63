use std::sync::Arc;

use protein_ip_rag::{
    api,
    app_state::AppState,
    config::{self, StoreBackend},
    llm::{LanguageModel, LlmManager},
    memory_store::InMemoryStore,
    neo4j_store::Neo4jStore,
    rag::{RagEngine, SubstringRanker},
    repository::{DocumentStore, ProteinStore, QueryLog},
};
use anyhow::{anyhow, Context, Result};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type Stores = (Arc<dyn DocumentStore>, Arc<dyn ProteinStore>, Arc<dyn QueryLog>);

async fn build_stores(cfg: &config::AppConfig) -> Result<Stores> {
    match cfg.store_backend {
        StoreBackend::Neo4j => {
            let neo4j_cfg = cfg
                .neo4j
                .as_ref()
                .ok_or_else(|| anyhow!("Falta la configuración de Neo4j"))?;
            let store = Arc::new(Neo4jStore::connect(neo4j_cfg).await?);
            info!("Conexión a Neo4j OK");
            let documents: Arc<dyn DocumentStore> = store.clone();
            let proteins: Arc<dyn ProteinStore> = store.clone();
            let queries: Arc<dyn QueryLog> = store;
            Ok((documents, proteins, queries))
        }
        StoreBackend::Memory => {
            warn!("Usando almacén en memoria: los datos se pierden al cerrar el servidor.");
            let store = Arc::new(InMemoryStore::new());
            let documents: Arc<dyn DocumentStore> = store.clone();
            let proteins: Arc<dyn ProteinStore> = store.clone();
            let queries: Arc<dyn QueryLog> = store;
            Ok((documents, proteins, queries))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Almacén de documentos, proteínas y consultas
    let (documents, proteins, queries) = build_stores(&cfg).await?;

    // 4. Modelo de lenguaje y motor RAG
    let llm: Arc<dyn LanguageModel> = Arc::new(LlmManager::from_config(&cfg));
    info!(
        "LLM configurado: {:?} ({}), timeout {:?}",
        cfg.llm_provider, cfg.llm_chat_model, cfg.llm_timeout
    );
    let rag = RagEngine::new(
        Arc::new(SubstringRanker::new(documents.clone())),
        llm,
        cfg.llm_max_tokens,
    );

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        documents,
        proteins,
        queries,
        rag,
    };

    // 6. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Apagado ordenado con Ctrl-C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
