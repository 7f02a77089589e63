//! Implementación de los repositorios sobre Neo4j.
//!
//! Grafo:
//!   (:Protein)-[:HAS_DOCUMENT]->(:Document)
//!   (:Protein)-[:HAS_EVIDENCE]->(:Evidence)
//!   (:Protein)-[:USES_PROCESS {yield_pct, conditions}]->(:Process)
//!   (:Query)   registro de consultas, sin relaciones.
//!
//! Las fechas se guardan como RFC 3339 en UTC con precisión fija, de modo que
//! el orden lexicográfico coincide con el cronológico.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Graph, Row};
use tracing::info;
use uuid::Uuid;

use crate::{
    config::Neo4jConfig,
    error::StoreError,
    models::{
        Document, Evidence, NewDocument, NewEvidence, NewProcess, NewProcessLink, NewProtein,
        Process, ProcessLink, Protein, ProteinWithRelations, QueryRecord,
    },
    repository::{DocumentStore, ProteinStore, QueryLog, StoreResult},
};

const DOCUMENT_FIELDS: &str = "d.id AS id, d.filename AS filename, d.content AS content,
     d.mime_type AS mime_type, d.file_size AS file_size, d.created_at AS created_at,
     p.id AS protein_id";

#[derive(Clone)]
pub struct Neo4jStore {
    graph: Arc<Graph>,
}

/// Constraints e índices para las etiquetas del grafo.
const SCHEMA: [&str; 6] = [
    "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (d:Document) REQUIRE d.id IS UNIQUE",
    "CREATE CONSTRAINT protein_id IF NOT EXISTS FOR (p:Protein) REQUIRE p.id IS UNIQUE",
    "CREATE CONSTRAINT process_id IF NOT EXISTS FOR (pr:Process) REQUIRE pr.id IS UNIQUE",
    "CREATE CONSTRAINT evidence_id IF NOT EXISTS FOR (e:Evidence) REQUIRE e.id IS UNIQUE",
    "CREATE CONSTRAINT query_id IF NOT EXISTS FOR (q:Query) REQUIRE q.id IS UNIQUE",
    // La recuperación de candidatos ordena por recencia.
    "CREATE INDEX document_created_at IF NOT EXISTS FOR (d:Document) ON (d.created_at)",
];

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    /// Abre la conexión Bolt descrita por `cfg` y deja el esquema listo.
    pub async fn connect(cfg: &Neo4jConfig) -> anyhow::Result<Self> {
        let addr = cfg.bolt_address()?;
        info!("Conectando a Neo4j en {addr} como '{}'...", cfg.user);
        let graph = Graph::new(&addr, &cfg.user, &cfg.password)
            .await
            .with_context(|| format!("Error conectando a Neo4j en {addr}"))?;

        let store = Self::new(Arc::new(graph));
        store
            .ensure_schema()
            .await
            .context("Error asegurando el esquema de Neo4j")?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        for stmt in SCHEMA {
            self.graph.run(query(stmt)).await?;
        }
        info!("Esquema de Neo4j asegurado ({} sentencias).", SCHEMA.len());
        Ok(())
    }

    async fn protein_exists(&self, id: &str) -> StoreResult<bool> {
        let mut cursor = self
            .graph
            .execute(query("MATCH (p:Protein {id: $id}) RETURN p.id AS id").param("id", id))
            .await?;
        Ok(cursor.next().await?.is_some())
    }

    async fn document_by_id(&self, id: &str) -> StoreResult<Document> {
        let cypher = format!(
            "MATCH (d:Document {{id: $id}})
             OPTIONAL MATCH (p:Protein)-[:HAS_DOCUMENT]->(d)
             RETURN {DOCUMENT_FIELDS}"
        );
        let mut cursor = self.graph.execute(query(&cypher).param("id", id)).await?;
        match cursor.next().await? {
            Some(row) => row_to_document(&row),
            None => Err(StoreError::not_found("Document", id)),
        }
    }

    async fn collect_documents(&self, q: neo4rs::Query) -> StoreResult<Vec<Document>> {
        let mut cursor = self.graph.execute(q).await?;
        let mut docs = Vec::new();
        while let Some(row) = cursor.next().await? {
            docs.push(row_to_document(&row)?);
        }
        Ok(docs)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("fecha inválida '{raw}': {e}")))
}

fn missing_field(key: &str) -> StoreError {
    StoreError::Decode(format!("Falta campo '{key}' en resultado de Neo4j"))
}

fn required_str(row: &Row, key: &str) -> StoreResult<String> {
    row.get::<String>(key).ok_or_else(|| missing_field(key))
}

fn required_i64(row: &Row, key: &str) -> StoreResult<i64> {
    row.get::<i64>(key).ok_or_else(|| missing_field(key))
}

/// Cadena vacía en el grafo equivale a ausencia.
fn optional_text(row: &Row, key: &str) -> Option<String> {
    row.get::<String>(key).filter(|s| !s.is_empty())
}

fn row_to_document(row: &Row) -> StoreResult<Document> {
    Ok(Document {
        id: required_str(row, "id")?,
        filename: required_str(row, "filename")?,
        content: required_str(row, "content")?,
        mime_type: required_str(row, "mime_type")?,
        file_size: required_i64(row, "file_size")?,
        created_at: parse_timestamp(&required_str(row, "created_at")?)?,
        protein_id: row.get::<String>("protein_id"),
    })
}

fn row_to_protein(row: &Row) -> StoreResult<Protein> {
    Ok(Protein {
        id: required_str(row, "id")?,
        name: required_str(row, "name")?,
        sequence: optional_text(row, "sequence"),
        maturity: required_str(row, "maturity")?,
        created_at: parse_timestamp(&required_str(row, "created_at")?)?,
    })
}

fn row_to_process(row: &Row) -> StoreResult<Process> {
    Ok(Process {
        id: required_str(row, "process_id")?,
        name: required_str(row, "process_name")?,
        description: optional_text(row, "process_description"),
        process_type: required_str(row, "process_type")?,
    })
}

fn row_to_evidence(row: &Row) -> StoreResult<Evidence> {
    Ok(Evidence {
        id: required_str(row, "id")?,
        evidence_type: required_str(row, "type")?,
        description: required_str(row, "description")?,
        confidence: row.get::<i64>("confidence"),
        protein_id: required_str(row, "protein_id")?,
        created_at: parse_timestamp(&required_str(row, "created_at")?)?,
    })
}

fn row_to_query(row: &Row) -> StoreResult<QueryRecord> {
    Ok(QueryRecord {
        id: required_str(row, "id")?,
        question: required_str(row, "question")?,
        answer: required_str(row, "answer")?,
        created_at: parse_timestamp(&required_str(row, "created_at")?)?,
    })
}

#[async_trait]
impl DocumentStore for Neo4jStore {
    async fn create_document(&self, doc: NewDocument) -> StoreResult<Document> {
        if let Some(pid) = &doc.protein_id {
            if !self.protein_exists(pid).await? {
                return Err(StoreError::not_found("Protein", pid.clone()));
            }
        }

        let document = Document {
            id: Uuid::new_v4().to_string(),
            file_size: doc.effective_size(),
            filename: doc.filename,
            content: doc.content,
            mime_type: doc.mime_type,
            created_at: Utc::now(),
            protein_id: doc.protein_id,
        };

        let tx = self.graph.start_txn().await?;
        tx.run(
            query(
                "CREATE (d:Document {id: $id, filename: $filename, content: $content,
                         mime_type: $mime_type, file_size: $file_size, created_at: $created_at})",
            )
            .param("id", document.id.clone())
            .param("filename", document.filename.clone())
            .param("content", document.content.clone())
            .param("mime_type", document.mime_type.clone())
            .param("file_size", document.file_size)
            .param("created_at", timestamp(document.created_at)),
        )
        .await?;

        if let Some(pid) = &document.protein_id {
            tx.run(
                query(
                    "MATCH (p:Protein {id: $pid}), (d:Document {id: $did})
                     MERGE (p)-[:HAS_DOCUMENT]->(d)",
                )
                .param("pid", pid.clone())
                .param("did", document.id.clone()),
            )
            .await?;
        }
        tx.commit().await?;

        Ok(document)
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        let cypher = format!(
            "MATCH (d:Document)
             OPTIONAL MATCH (p:Protein)-[:HAS_DOCUMENT]->(d)
             RETURN {DOCUMENT_FIELDS}
             ORDER BY d.created_at DESC"
        );
        self.collect_documents(query(&cypher)).await
    }

    async fn list_documents_matching(
        &self,
        substring: &str,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        let cypher = format!(
            "MATCH (d:Document)
             WHERE toLower(d.content) CONTAINS toLower($needle)
             OPTIONAL MATCH (p:Protein)-[:HAS_DOCUMENT]->(d)
             RETURN {DOCUMENT_FIELDS}
             ORDER BY d.created_at DESC
             LIMIT $limit"
        );
        self.collect_documents(
            query(&cypher)
                .param("needle", substring)
                .param("limit", limit as i64),
        )
        .await
    }

    async fn link_document(&self, document_id: &str, protein_id: &str) -> StoreResult<Document> {
        if !self.protein_exists(protein_id).await? {
            return Err(StoreError::not_found("Protein", protein_id));
        }
        // Falla antes de tocar el grafo si el documento no existe.
        self.document_by_id(document_id).await?;

        let tx = self.graph.start_txn().await?;
        // Un documento pertenece como mucho a una proteína.
        tx.run(
            query("MATCH (:Protein)-[r:HAS_DOCUMENT]->(d:Document {id: $did}) DELETE r")
                .param("did", document_id),
        )
        .await?;
        tx.run(
            query(
                "MATCH (p:Protein {id: $pid}), (d:Document {id: $did})
                 MERGE (p)-[:HAS_DOCUMENT]->(d)",
            )
            .param("pid", protein_id)
            .param("did", document_id),
        )
        .await?;
        tx.commit().await?;

        self.document_by_id(document_id).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }
}

#[async_trait]
impl ProteinStore for Neo4jStore {
    async fn create_protein(&self, protein: NewProtein) -> StoreResult<Protein> {
        let protein = Protein {
            id: Uuid::new_v4().to_string(),
            name: protein.name,
            sequence: protein.sequence.filter(|s| !s.is_empty()),
            maturity: protein.maturity,
            created_at: Utc::now(),
        };

        self.graph
            .run(
                query(
                    "CREATE (p:Protein {id: $id, name: $name, maturity: $maturity,
                             created_at: $created_at})
                     SET p.sequence = CASE WHEN $sequence = '' THEN null ELSE $sequence END",
                )
                .param("id", protein.id.clone())
                .param("name", protein.name.clone())
                .param("maturity", protein.maturity.clone())
                .param("created_at", timestamp(protein.created_at))
                .param("sequence", protein.sequence.clone().unwrap_or_default()),
            )
            .await?;

        Ok(protein)
    }

    async fn list_proteins(&self) -> StoreResult<Vec<Protein>> {
        let mut cursor = self
            .graph
            .execute(query(
                "MATCH (p:Protein)
                 RETURN p.id AS id, p.name AS name, p.sequence AS sequence,
                        p.maturity AS maturity, p.created_at AS created_at
                 ORDER BY p.name, p.id",
            ))
            .await?;

        let mut proteins = Vec::new();
        while let Some(row) = cursor.next().await? {
            proteins.push(row_to_protein(&row)?);
        }
        Ok(proteins)
    }

    async fn get_protein_with_relations(&self, id: &str) -> StoreResult<ProteinWithRelations> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (p:Protein {id: $id})
                     RETURN p.id AS id, p.name AS name, p.sequence AS sequence,
                            p.maturity AS maturity, p.created_at AS created_at",
                )
                .param("id", id),
            )
            .await?;
        let protein = match cursor.next().await? {
            Some(row) => row_to_protein(&row)?,
            None => return Err(StoreError::not_found("Protein", id)),
        };

        // Procesos vinculados
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (p:Protein {id: $id})-[l:USES_PROCESS]->(pr:Process)
                     RETURN pr.id AS process_id, pr.name AS process_name,
                            pr.description AS process_description, pr.type AS process_type,
                            l.yield_pct AS yield_pct, l.conditions AS conditions
                     ORDER BY pr.name",
                )
                .param("id", id),
            )
            .await?;
        let mut processes = Vec::new();
        while let Some(row) = cursor.next().await? {
            processes.push(ProcessLink {
                protein_id: id.to_string(),
                process: row_to_process(&row)?,
                yield_pct: row.get::<f64>("yield_pct"),
                conditions: optional_text(&row, "conditions"),
            });
        }

        // Evidencias
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (p:Protein {id: $id})-[:HAS_EVIDENCE]->(e:Evidence)
                     RETURN e.id AS id, e.type AS type, e.description AS description,
                            e.confidence AS confidence, p.id AS protein_id,
                            e.created_at AS created_at
                     ORDER BY e.created_at",
                )
                .param("id", id),
            )
            .await?;
        let mut evidence = Vec::new();
        while let Some(row) = cursor.next().await? {
            evidence.push(row_to_evidence(&row)?);
        }

        // Documentos
        let cypher = format!(
            "MATCH (p:Protein {{id: $id}})-[:HAS_DOCUMENT]->(d:Document)
             RETURN {DOCUMENT_FIELDS}
             ORDER BY d.created_at DESC"
        );
        let documents = self.collect_documents(query(&cypher).param("id", id)).await?;

        Ok(ProteinWithRelations {
            protein,
            processes,
            evidence,
            documents,
        })
    }

    async fn create_process(&self, process: NewProcess) -> StoreResult<Process> {
        let process = Process {
            id: Uuid::new_v4().to_string(),
            name: process.name,
            description: process.description.filter(|s| !s.is_empty()),
            process_type: process.process_type,
        };

        self.graph
            .run(
                query(
                    "CREATE (pr:Process {id: $id, name: $name, type: $type})
                     SET pr.description = CASE WHEN $description = '' THEN null ELSE $description END",
                )
                .param("id", process.id.clone())
                .param("name", process.name.clone())
                .param("type", process.process_type.clone())
                .param("description", process.description.clone().unwrap_or_default()),
            )
            .await?;

        Ok(process)
    }

    async fn link_process(
        &self,
        protein_id: &str,
        link: NewProcessLink,
    ) -> StoreResult<ProcessLink> {
        if !self.protein_exists(protein_id).await? {
            return Err(StoreError::not_found("Protein", protein_id));
        }
        let conditions = link.conditions.map(|c| c.to_string());

        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (p:Protein {id: $pid}), (pr:Process {id: $prid})
                     MERGE (p)-[l:USES_PROCESS]->(pr)
                     SET l.yield_pct = CASE WHEN $has_yield THEN $yield_pct ELSE null END,
                         l.conditions = CASE WHEN $conditions = '' THEN null ELSE $conditions END
                     RETURN pr.id AS process_id, pr.name AS process_name,
                            pr.description AS process_description, pr.type AS process_type",
                )
                .param("pid", protein_id)
                .param("prid", link.process_id.clone())
                .param("has_yield", link.yield_pct.is_some())
                .param("yield_pct", link.yield_pct.unwrap_or_default())
                .param("conditions", conditions.clone().unwrap_or_default()),
            )
            .await?;

        let process = match cursor.next().await? {
            Some(row) => row_to_process(&row)?,
            None => return Err(StoreError::not_found("Process", link.process_id)),
        };

        Ok(ProcessLink {
            protein_id: protein_id.to_string(),
            process,
            yield_pct: link.yield_pct,
            conditions,
        })
    }

    async fn add_evidence(&self, protein_id: &str, evidence: NewEvidence) -> StoreResult<Evidence> {
        if !self.protein_exists(protein_id).await? {
            return Err(StoreError::not_found("Protein", protein_id));
        }

        let evidence = Evidence {
            id: Uuid::new_v4().to_string(),
            evidence_type: evidence.evidence_type,
            description: evidence.description,
            confidence: evidence.confidence,
            protein_id: protein_id.to_string(),
            created_at: Utc::now(),
        };

        self.graph
            .run(
                query(
                    "MATCH (p:Protein {id: $pid})
                     CREATE (p)-[:HAS_EVIDENCE]->(e:Evidence {id: $id, type: $type,
                             description: $description, created_at: $created_at})
                     SET e.confidence = CASE WHEN $has_confidence THEN $confidence ELSE null END",
                )
                .param("pid", protein_id)
                .param("id", evidence.id.clone())
                .param("type", evidence.evidence_type.clone())
                .param("description", evidence.description.clone())
                .param("created_at", timestamp(evidence.created_at))
                .param("has_confidence", evidence.confidence.is_some())
                .param("confidence", evidence.confidence.unwrap_or_default()),
            )
            .await?;

        Ok(evidence)
    }
}

#[async_trait]
impl QueryLog for Neo4jStore {
    async fn log_query(&self, question: &str, answer: &str) -> StoreResult<QueryRecord> {
        let record = QueryRecord {
            id: Uuid::new_v4().to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            created_at: Utc::now(),
        };

        self.graph
            .run(
                query(
                    "CREATE (q:Query {id: $id, question: $question, answer: $answer,
                             created_at: $created_at})",
                )
                .param("id", record.id.clone())
                .param("question", record.question.clone())
                .param("answer", record.answer.clone())
                .param("created_at", timestamp(record.created_at)),
            )
            .await?;

        Ok(record)
    }

    async fn recent_queries(&self, limit: usize) -> StoreResult<Vec<QueryRecord>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (q:Query)
                     RETURN q.id AS id, q.question AS question, q.answer AS answer,
                            q.created_at AS created_at
                     ORDER BY q.created_at DESC
                     LIMIT $limit",
                )
                .param("limit", limit as i64),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = cursor.next().await? {
            records.push(row_to_query(&row)?);
        }
        Ok(records)
    }
}
