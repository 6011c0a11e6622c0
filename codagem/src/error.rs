use crate::ping::ProbeError;
use thiserror::Error;

/// Erros devolvidos pelas operações do registro de monitoramento.
///
/// Falhas de probe não aparecem aqui: são dados, registrados no estado do
/// endpoint.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("endereço inválido: {0}")]
    InvalidAddress(String),

    #[error("limite de sessões atingido ({limit}), monitoramento não iniciado")]
    ResourceExhaustion { limit: usize },

    #[error("probe indisponível: {0}")]
    ProbeUnavailable(#[from] ProbeError),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
