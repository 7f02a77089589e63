//! Interfaces de almacenamiento que consumen los motores y la API.
//!
//! Implementaciones:
//!   - `neo4j_store::Neo4jStore` (Cypher sobre `neo4rs`).
//!   - `memory_store::InMemoryStore` (tests y ejecución sin base de datos).

use async_trait::async_trait;

use crate::{
    error::StoreError,
    models::{
        Document, Evidence, NewDocument, NewEvidence, NewProcess, NewProcessLink, NewProtein,
        Process, ProcessLink, Protein, ProteinWithRelations, QueryRecord,
    },
};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(&self, doc: NewDocument) -> StoreResult<Document>;

    /// Todos los documentos, del más reciente al más antiguo.
    async fn list_documents(&self) -> StoreResult<Vec<Document>>;

    /// Documentos cuyo contenido contiene `substring` (sin distinguir
    /// mayúsculas), del más reciente al más antiguo, como mucho `limit`.
    async fn list_documents_matching(&self, substring: &str, limit: usize)
        -> StoreResult<Vec<Document>>;

    /// Vincula un documento existente a una proteína existente.
    async fn link_document(&self, document_id: &str, protein_id: &str) -> StoreResult<Document>;

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ProteinStore: Send + Sync {
    async fn create_protein(&self, protein: NewProtein) -> StoreResult<Protein>;

    /// Orden de enumeración estable: por nombre y luego por id.
    async fn list_proteins(&self) -> StoreResult<Vec<Protein>>;

    /// Falla con `StoreError::NotFound` si la proteína no existe.
    async fn get_protein_with_relations(&self, id: &str) -> StoreResult<ProteinWithRelations>;

    async fn create_process(&self, process: NewProcess) -> StoreResult<Process>;

    async fn link_process(&self, protein_id: &str, link: NewProcessLink)
        -> StoreResult<ProcessLink>;

    async fn add_evidence(&self, protein_id: &str, evidence: NewEvidence) -> StoreResult<Evidence>;
}

/// Historial de consultas, solo anexado.
#[async_trait]
pub trait QueryLog: Send + Sync {
    async fn log_query(&self, question: &str, answer: &str) -> StoreResult<QueryRecord>;

    /// Las `limit` consultas más recientes, de la más nueva a la más antigua.
    async fn recent_queries(&self, limit: usize) -> StoreResult<Vec<QueryRecord>>;
}
