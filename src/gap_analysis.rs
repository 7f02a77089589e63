//! Análisis de brechas: cuánto le falta a una proteína para estar lista para PI.
//!
//! El resultado es función pura de los recuentos actuales; se recalcula en
//! cada lectura y nunca se cachea.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    models::ProteinWithRelations,
    repository::{ProteinStore, StoreResult},
};

/// Umbrales de preparación de proceso.
pub const REQUIRED_PROCESSES: i64 = 1;
pub const REQUIRED_EVIDENCE: i64 = 3;
pub const REQUIRED_DOCUMENTS: i64 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GapState {
    Complete,
    Partial,
    Missing,
}

impl GapState {
    pub fn classify(requirement: Requirement) -> Self {
        if requirement.has >= requirement.required {
            Self::Complete
        } else if requirement.has > 0 {
            Self::Partial
        } else {
            Self::Missing
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadinessStatus {
    ReadyForIp,
    InProgress,
    NotStarted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub required: i64,
    pub has: i64,
}

impl Requirement {
    /// Sin recortar: puede ser negativo si `has` supera a `required`.
    pub fn shortfall(&self) -> i64 {
        self.required - self.has
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirements {
    pub process: Requirement,
    pub evidence: Requirement,
    pub documents: Requirement,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gaps {
    pub process: GapState,
    pub evidence: GapState,
    pub documents: GapState,
}

impl Gaps {
    fn all(&self) -> [GapState; 3] {
        [self.process, self.evidence, self.documents]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recommendation {
    pub priority: Priority,
    pub message: String,
    pub missing: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GapAnalysisResult {
    pub protein_id: String,
    pub protein_name: String,
    pub requirements: Requirements,
    pub gaps: Gaps,
    pub status: ReadinessStatus,
    pub recommendations: Vec<Recommendation>,
}

/// Recuentos de una proteína, la única entrada del cálculo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub processes: usize,
    pub evidence: usize,
    pub documents: usize,
}

impl From<&ProteinWithRelations> for Counts {
    fn from(protein: &ProteinWithRelations) -> Self {
        Self {
            processes: protein.processes.len(),
            evidence: protein.evidence.len(),
            documents: protein.documents.len(),
        }
    }
}

fn derive_status(gaps: &Gaps) -> ReadinessStatus {
    let states = gaps.all();
    if states.iter().all(|g| *g == GapState::Complete) {
        ReadinessStatus::ReadyForIp
    } else if states.iter().any(|g| *g != GapState::Missing) {
        ReadinessStatus::InProgress
    } else {
        ReadinessStatus::NotStarted
    }
}

fn recommendations(requirements: &Requirements, gaps: &Gaps) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if gaps.process != GapState::Complete {
        out.push(Recommendation {
            priority: Priority::High,
            message: "Add production process data".to_string(),
            missing: requirements.process.shortfall(),
        });
    }

    if gaps.evidence != GapState::Complete {
        let missing = requirements.evidence.shortfall();
        out.push(Recommendation {
            priority: Priority::High,
            message: format!("Add {missing} more evidence items"),
            missing,
        });
    }

    if gaps.documents != GapState::Complete {
        let missing = requirements.documents.shortfall();
        out.push(Recommendation {
            priority: Priority::Medium,
            message: format!("Upload {missing} more supporting documents"),
            missing,
        });
    }

    out
}

/// Cálculo puro a partir de los recuentos.
pub fn evaluate_counts(protein_id: &str, protein_name: &str, counts: Counts) -> GapAnalysisResult {
    let requirements = Requirements {
        process: Requirement { required: REQUIRED_PROCESSES, has: counts.processes as i64 },
        evidence: Requirement { required: REQUIRED_EVIDENCE, has: counts.evidence as i64 },
        documents: Requirement { required: REQUIRED_DOCUMENTS, has: counts.documents as i64 },
    };

    let gaps = Gaps {
        process: GapState::classify(requirements.process),
        evidence: GapState::classify(requirements.evidence),
        documents: GapState::classify(requirements.documents),
    };

    GapAnalysisResult {
        protein_id: protein_id.to_string(),
        protein_name: protein_name.to_string(),
        status: derive_status(&gaps),
        recommendations: recommendations(&requirements, &gaps),
        requirements,
        gaps,
    }
}

pub fn evaluate(protein: &ProteinWithRelations) -> GapAnalysisResult {
    evaluate_counts(&protein.protein.id, &protein.protein.name, Counts::from(protein))
}

/// Falla con `StoreError::NotFound` si la proteína no existe.
pub async fn analyze_protein(store: &dyn ProteinStore, protein_id: &str) -> StoreResult<GapAnalysisResult> {
    let protein = store.get_protein_with_relations(protein_id).await?;
    let result = evaluate(&protein);
    debug!("Brechas de '{}': {:?}", result.protein_name, result.status);
    Ok(result)
}

/// Analiza cada proteína por separado, en el orden de enumeración del almacén.
pub async fn analyze_all_proteins(store: &dyn ProteinStore) -> StoreResult<Vec<GapAnalysisResult>> {
    let proteins = store.list_proteins().await?;
    try_join_all(proteins.iter().map(|p| analyze_protein(store, &p.id))).await
}
