//! Modelos de dominio: documentos, proteínas y sus relaciones, y el
//! registro de consultas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Documento con su texto ya extraído. Inmutable salvo el vínculo a proteína.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub mime_type: String,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
    pub protein_id: Option<String>,
}

/// Par `{id, filename}` devuelto como fuente de una respuesta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSource {
    pub id: String,
    pub filename: String,
}

impl From<&Document> for DocumentSource {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Protein {
    pub id: String,
    pub name: String,
    pub sequence: Option<String>,
    pub maturity: String,
    pub created_at: DateTime<Utc>,
}

/// Proceso de producción (fermentación, purificación...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub process_type: String,
}

/// Vínculo proteína–proceso con rendimiento y condiciones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessLink {
    pub protein_id: String,
    pub process: Process,
    #[serde(rename = "yield")]
    pub yield_pct: Option<f64>,
    /// Blob JSON opaco (temperatura, pH, duración...).
    pub conditions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: String,
    #[serde(rename = "type")]
    pub evidence_type: String,
    pub description: String,
    pub confidence: Option<i64>,
    pub protein_id: String,
    pub created_at: DateTime<Utc>,
}

/// Agregado de lectura usado por el análisis de brechas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProteinWithRelations {
    #[serde(flatten)]
    pub protein: Protein,
    pub processes: Vec<ProcessLink>,
    pub evidence: Vec<Evidence>,
    pub documents: Vec<Document>,
}

/// Entrada del historial de consultas (solo anexado).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

// --- Entradas de creación ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub filename: String,
    pub content: String,
    pub mime_type: String,
    pub file_size: Option<i64>,
    pub protein_id: Option<String>,
}

impl NewDocument {
    /// Tamaño declarado o, en su defecto, el del texto en bytes.
    pub fn effective_size(&self) -> i64 {
        self.file_size.unwrap_or(self.content.len() as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProtein {
    pub name: String,
    pub sequence: Option<String>,
    pub maturity: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProcess {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub process_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProcessLink {
    pub process_id: String,
    #[serde(rename = "yield")]
    pub yield_pct: Option<f64>,
    pub conditions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvidence {
    #[serde(rename = "type")]
    pub evidence_type: String,
    pub description: String,
    pub confidence: Option<i64>,
}

impl NewEvidence {
    pub fn validate(&self) -> Result<(), String> {
        if self.evidence_type.trim().is_empty() {
            return Err("Evidence type is required".to_string());
        }
        match self.confidence {
            Some(c) if !(0..=100).contains(&c) => {
                Err(format!("Confidence must be between 0 and 100, got {c}"))
            }
            _ => Ok(()),
        }
    }
}
