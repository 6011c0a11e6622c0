use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Status de um endpoint monitorado
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    #[default]
    Unknown,
    Online,
    Offline,
    Error,
}

/// Motivo de falha de uma probe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    Unreachable,
    /// Nunca ocorre com literais IP, mantido para o parser do comando `ping`.
    DnsError,
    PermissionDenied,
    Unknown,
}

/// Resultado de uma única probe (echo request com espera limitada)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub failure_reason: Option<FailureReason>,
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    pub fn success(latency_ms: f64) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms.max(0.0)),
            failure_reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(reason: FailureReason) -> Self {
        Self {
            success: false,
            latency_ms: None,
            failure_reason: Some(reason),
            timestamp: Utc::now(),
        }
    }
}

/// Fase do ciclo de vida de uma sessão de monitoramento
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Created,
    Running,
    Cancelling,
    Terminated,
}

/// Resumo de uma sessão ativa, exposto por `GET /monitor`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub address: IpAddr,
    pub phase: SessionPhase,
}

/// Resposta de uma probe avulsa (fora de qualquer sessão)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneShotProbe {
    pub address: IpAddr,
    #[serde(flatten)]
    pub result: ProbeResult,
}
