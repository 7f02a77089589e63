//! Carga y gestión de configuración de la aplicación (almacén + LLM).

use std::{env, time::Duration};
use anyhow::{anyhow, Context, Result};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAI,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Modelo de chat usado cuando `LLM_CHAT_MODEL` no está definido.
    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAI => "gpt-4o-mini",
        }
    }
}

/// Dónde viven documentos, proteínas y el historial de consultas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Neo4j,
    Memory,
}

impl StoreBackend {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "neo4j" => Ok(Self::Neo4j),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("Backend de almacenamiento no soportado: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Neo4jConfig {
    /// `host:puerto` que espera el driver Bolt a partir de `NEO4J_URI`.
    /// Sin puerto explícito se usa el 7687.
    pub fn bolt_address(&self) -> Result<String> {
        let url = Url::parse(&self.uri)
            .with_context(|| format!("NEO4J_URI no es una URL válida: {}", self.uri))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("NEO4J_URI no indica host: {}", self.uri))?;
        Ok(format!("{host}:{}", url.port().unwrap_or(7687)))
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub store_backend: StoreBackend,
    pub neo4j: Option<Neo4jConfig>,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub llm_max_tokens: u64,
    pub llm_timeout: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de claves.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store_backend = StoreBackend::from_str(
            &lookup("STORE_BACKEND").unwrap_or_else(|| "neo4j".to_string()),
        )?;

        let neo4j = match store_backend {
            StoreBackend::Neo4j => Some(Neo4jConfig {
                uri: lookup("NEO4J_URI").ok_or_else(|| anyhow!("Falta NEO4J_URI en el entorno"))?,
                user: lookup("NEO4J_USER").ok_or_else(|| anyhow!("Falta NEO4J_USER en el entorno"))?,
                password: lookup("NEO4J_PASSWORD")
                    .ok_or_else(|| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            }),
            StoreBackend::Memory => None,
        };

        let server_addr = lookup("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());

        let llm_provider =
            LlmProvider::from_str(&lookup("LLM_PROVIDER").unwrap_or_else(|| "anthropic".to_string()))?;

        let llm_chat_model = lookup("LLM_CHAT_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| llm_provider.default_chat_model().to_string());

        let llm_max_tokens = match lookup("LLM_MAX_TOKENS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("LLM_MAX_TOKENS no es un entero válido: {raw}"))?,
            None => 2048,
        };

        let timeout_secs = match lookup("LLM_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("LLM_TIMEOUT_SECS no es un entero válido: {raw}"))?,
            None => 60,
        };
        if timeout_secs == 0 {
            return Err(anyhow!("LLM_TIMEOUT_SECS debe ser mayor que cero"));
        }

        Ok(Self {
            store_backend,
            neo4j,
            server_addr,
            llm_provider,
            llm_chat_model,
            llm_max_tokens,
            llm_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
