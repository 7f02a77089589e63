use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{
        Document, Evidence, NewDocument, NewEvidence, NewProcess, NewProcessLink, NewProtein,
        Process, ProcessLink, Protein, ProteinWithRelations, QueryRecord,
    },
    rag::select_candidates,
    repository::{DocumentStore, ProteinStore, QueryLog, StoreResult},
};

#[derive(Debug, Default)]
struct Tables {
    documents: Vec<Document>,
    proteins: Vec<Protein>,
    processes: Vec<Process>,
    process_links: Vec<ProcessLink>,
    evidence: Vec<Evidence>,
    queries: Vec<QueryRecord>,
}

/// Almacén en memoria. Lo usan los tests y `STORE_BACKEND=memory`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserta un documento tal cual (con su `created_at`), sin validar vínculos.
    pub fn insert_document(&self, doc: Document) -> StoreResult<()> {
        self.write()?.documents.push(doc);
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("bloqueo del almacén envenenado".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("bloqueo del almacén envenenado".to_string()))
    }
}

fn newest_first(docs: &mut [Document]) {
    docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_document(&self, doc: NewDocument) -> StoreResult<Document> {
        let mut tables = self.write()?;
        if let Some(pid) = &doc.protein_id {
            if !tables.proteins.iter().any(|p| &p.id == pid) {
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
        tables.documents.push(document.clone());
        Ok(document)
    }

    async fn list_documents(&self) -> StoreResult<Vec<Document>> {
        let mut docs = self.read()?.documents.clone();
        newest_first(&mut docs);
        Ok(docs)
    }

    async fn list_documents_matching(
        &self,
        substring: &str,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        let tables = self.read()?;
        Ok(select_candidates(substring, &tables.documents, limit))
    }

    async fn link_document(&self, document_id: &str, protein_id: &str) -> StoreResult<Document> {
        let mut tables = self.write()?;
        if !tables.proteins.iter().any(|p| p.id == protein_id) {
            return Err(StoreError::not_found("Protein", protein_id));
        }
        let doc = tables
            .documents
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or_else(|| StoreError::not_found("Document", document_id))?;
        doc.protein_id = Some(protein_id.to_string());
        Ok(doc.clone())
    }
}

#[async_trait]
impl ProteinStore for InMemoryStore {
    async fn create_protein(&self, protein: NewProtein) -> StoreResult<Protein> {
        let protein = Protein {
            id: Uuid::new_v4().to_string(),
            name: protein.name,
            sequence: protein.sequence,
            maturity: protein.maturity,
            created_at: Utc::now(),
        };
        self.write()?.proteins.push(protein.clone());
        Ok(protein)
    }

    async fn list_proteins(&self) -> StoreResult<Vec<Protein>> {
        let mut proteins = self.read()?.proteins.clone();
        proteins.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(proteins)
    }

    async fn get_protein_with_relations(&self, id: &str) -> StoreResult<ProteinWithRelations> {
        let tables = self.read()?;
        let protein = tables
            .proteins
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Protein", id))?;

        let mut documents: Vec<Document> = tables
            .documents
            .iter()
            .filter(|d| d.protein_id.as_deref() == Some(id))
            .cloned()
            .collect();
        newest_first(&mut documents);

        Ok(ProteinWithRelations {
            protein,
            processes: tables
                .process_links
                .iter()
                .filter(|l| l.protein_id == id)
                .cloned()
                .collect(),
            evidence: tables
                .evidence
                .iter()
                .filter(|e| e.protein_id == id)
                .cloned()
                .collect(),
            documents,
        })
    }

    async fn create_process(&self, process: NewProcess) -> StoreResult<Process> {
        let process = Process {
            id: Uuid::new_v4().to_string(),
            name: process.name,
            description: process.description,
            process_type: process.process_type,
        };
        self.write()?.processes.push(process.clone());
        Ok(process)
    }

    async fn link_process(
        &self,
        protein_id: &str,
        link: NewProcessLink,
    ) -> StoreResult<ProcessLink> {
        let mut tables = self.write()?;
        if !tables.proteins.iter().any(|p| p.id == protein_id) {
            return Err(StoreError::not_found("Protein", protein_id));
        }
        let process = tables
            .processes
            .iter()
            .find(|p| p.id == link.process_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Process", link.process_id.clone()))?;

        let link = ProcessLink {
            protein_id: protein_id.to_string(),
            process,
            yield_pct: link.yield_pct,
            conditions: link.conditions.map(|c| c.to_string()),
        };
        // Un único vínculo por (proteína, proceso); relincar actualiza sus datos.
        match tables
            .process_links
            .iter_mut()
            .find(|l| l.protein_id == link.protein_id && l.process.id == link.process.id)
        {
            Some(existing) => *existing = link.clone(),
            None => tables.process_links.push(link.clone()),
        }
        Ok(link)
    }

    async fn add_evidence(&self, protein_id: &str, evidence: NewEvidence) -> StoreResult<Evidence> {
        let mut tables = self.write()?;
        if !tables.proteins.iter().any(|p| p.id == protein_id) {
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
        tables.evidence.push(evidence.clone());
        Ok(evidence)
    }
}

#[async_trait]
impl QueryLog for InMemoryStore {
    async fn log_query(&self, question: &str, answer: &str) -> StoreResult<QueryRecord> {
        let record = QueryRecord {
            id: Uuid::new_v4().to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            created_at: Utc::now(),
        };
        self.write()?.queries.push(record.clone());
        Ok(record)
    }

    async fn recent_queries(&self, limit: usize) -> StoreResult<Vec<QueryRecord>> {
        let tables = self.read()?;
        Ok(tables.queries.iter().rev().take(limit).cloned().collect())
    }
}
