use thiserror::Error;

/// Falhas na comunicação com a Messages API.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` vem do header `retry-after`, ou 1s.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status de erro, com o corpo da resposta como mensagem.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// A resposta chegou mas não trazia texto utilizável.
    #[error("empty response from {model}")]
    EmptyResponse { model: String },
}
