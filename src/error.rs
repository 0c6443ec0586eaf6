//! Tipos de erro do cliente de status.
//!
//! [`StatusError`] cobre apenas falhas do próprio cliente (conectividade,
//! protocolo, timeout, cancelamento). Um job que termina com status `error`
//! NÃO é um erro do cliente: é um retorno bem-sucedido que o chamador interpreta.

use thiserror::Error;

use crate::status::JobId;

/// Erros que encerram uma operação de rastreamento sem status terminal.
///
/// É `Clone` porque o mesmo resultado é entregue a todos os chamadores
/// que compartilham o rastreamento de um job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    /// Falha de I/O no caminho push ou pull (DNS, conexão recusada, HTTP 5xx).
    #[error("transport error: {0}")]
    Transport(String),

    /// O colaborador devolveu um valor de status desconhecido ou um corpo inválido.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// O backend não conhece o job.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// O prazo terminou sem que nenhum caminho observasse um status terminal.
    #[error("timed out waiting for job {0}")]
    Timeout(JobId),

    /// O chamador fechou o job enquanto a espera estava em andamento.
    #[error("tracking of job {0} was cancelled")]
    Cancelled(JobId),
}

impl From<reqwest::Error> for StatusError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StatusError::Protocol(err.to_string())
        } else {
            StatusError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let err = StatusError::Timeout(JobId::from("42"));
        assert_eq!(err.to_string(), "timed out waiting for job 42");
    }

    #[test]
    fn not_found_display() {
        let err = StatusError::NotFound(JobId::from("unknown"));
        assert_eq!(err.to_string(), "job not found: unknown");
    }

    #[test]
    fn error_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone + 'static>() {}
        assert_traits::<StatusError>();
    }
}
