//! Preguntas con citas sobre documentos científicos y análisis de brechas
//! de proteínas para la preparación de PI.

pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod gap_analysis;
pub mod llm;
pub mod memory_store;
pub mod models;
pub mod neo4j_store;
pub mod rag;
pub mod repository;
