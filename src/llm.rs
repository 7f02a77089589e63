//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//!
//! El motor RAG solo conoce el trait `LanguageModel`; `LlmManager` lo
//! implementa sobre Anthropic y OpenAI y aplica el tiempo límite configurado.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use rig::completion::Prompt;
use tracing::{debug, warn};

use crate::{
    config::{AppConfig, LlmProvider},
    error::LlmError,
};

/// Capacidad mínima de completado: instrucción de sistema + turno de usuario.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u64,
    ) -> Result<String, LlmError>;
}

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
    pub timeout: Duration,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            timeout: cfg.llm_timeout,
        }
    }

    fn model_name(&self) -> &str {
        if self.chat_model.is_empty() {
            self.provider.default_chat_model()
        } else {
            self.chat_model.as_str()
        }
    }

    async fn answer_with_anthropic(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u64,
    ) -> Result<String, LlmError> {
        use rig::client::CompletionClient as _;
        use rig::providers::anthropic;

        let client = anthropic::Client::from_env();
        let agent = client
            .agent(self.model_name())
            .preamble(system_prompt)
            .max_tokens(max_tokens)
            .build();

        agent
            .prompt(user_prompt)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))
    }

    async fn answer_with_openai(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u64,
    ) -> Result<String, LlmError> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let agent = client
            .agent(self.model_name())
            .preamble(system_prompt)
            .max_tokens(max_tokens)
            .build();

        agent
            .prompt(user_prompt)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))
    }
}

/// Ejecuta `call` con tiempo límite; agotarlo es un fallo del modelo, no una espera.
pub async fn with_timeout<F>(limit: Duration, call: F) -> Result<String, LlmError>
where
    F: Future<Output = Result<String, LlmError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(limit.as_secs())),
    }
}

#[async_trait]
impl LanguageModel for LlmManager {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u64,
    ) -> Result<String, LlmError> {
        debug!(
            "Llamando a {:?} ({}) con max_tokens={}",
            self.provider,
            self.model_name(),
            max_tokens
        );

        let result = match self.provider {
            LlmProvider::Anthropic => {
                with_timeout(
                    self.timeout,
                    self.answer_with_anthropic(system_prompt, user_prompt, max_tokens),
                )
                .await
            }
            LlmProvider::OpenAI => {
                with_timeout(
                    self.timeout,
                    self.answer_with_openai(system_prompt, user_prompt, max_tokens),
                )
                .await
            }
        };

        if let Err(err) = &result {
            warn!("La llamada al LLM falló: {}", err);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_calls_become_timeouts() {
        let result = with_timeout(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout(_))));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let result = with_timeout(Duration::from_secs(5), async { Ok("[DOC-1] yes".to_string()) })
            .await
            .unwrap();
        assert_eq!(result, "[DOC-1] yes");
    }

    #[test]
    fn falls_back_to_provider_default_model() {
        let manager = LlmManager {
            provider: LlmProvider::OpenAI,
            chat_model: String::new(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(manager.model_name(), "gpt-4o-mini");
    }
}
