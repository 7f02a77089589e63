use std::sync::Arc;

use crate::{
    config::AppConfig,
    rag::RagEngine,
    repository::{DocumentStore, ProteinStore, QueryLog},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub documents: Arc<dyn DocumentStore>,
    pub proteins: Arc<dyn ProteinStore>,
    pub queries: Arc<dyn QueryLog>,
    pub rag: RagEngine,
}
