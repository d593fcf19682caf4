//! Erros do cliente da API Anthropic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` vem do cabeçalho `retry-after` (padrão 1s).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// A resposta não trouxe nenhum bloco de texto.
    #[error("empty response from model")]
    EmptyResponse,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}
