//! endpoint.rs — Estatísticas acumuladas de um endereço monitorado
//!
//! A janela de latências é um FIFO limitado: média, mínimo e máximo são
//! recalculados sobre as amostras retidas, então latências antigas saem da
//! média.

use crate::types::{EndpointStatus, FailureReason, ProbeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::IpAddr;

/// Latência corrente quando a última probe falhou ou ainda não houve probe.
pub const NO_LATENCY: f64 = -1.0;

/// Mínimo, máximo e média da janela retida.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LatencyStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
}

/// Estado de um endereço. Cópias deste tipo são os snapshots entregues aos leitores.
///
/// Só serializa: a capacidade da janela não faz parte do JSON, então um
/// estado só nasce por `new`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointState {
    pub address: IpAddr,
    pub status: EndpointStatus,
    pub current_latency_ms: f64,
    pub loss_percent: f64,
    pub total_probes: u64,
    pub successful_probes: u64,
    pub failed_probes: u64,
    pub consecutive_failures: u32,
    pub stats: LatencyStats,
    pub samples: VecDeque<f64>,
    pub last_failure: Option<FailureReason>,
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip)]
    max_samples: usize,
}

impl EndpointState {
    pub fn new(address: IpAddr, max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            address,
            status: EndpointStatus::Unknown,
            current_latency_ms: NO_LATENCY,
            loss_percent: 100.0,
            total_probes: 0,
            successful_probes: 0,
            failed_probes: 0,
            consecutive_failures: 0,
            stats: LatencyStats::default(),
            samples: VecDeque::with_capacity(max_samples),
            last_failure: None,
            last_update: None,
            max_samples,
        }
    }

    /// Forma "sem dados" para endereços que nunca foram monitorados.
    pub fn empty(address: IpAddr) -> Self {
        Self::new(address, 1)
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Incorpora o resultado de uma probe.
    ///
    /// O status só vira Offline depois de `failure_threshold` falhas seguidas;
    /// abaixo disso o status anterior é mantido.
    pub fn record(&mut self, result: &ProbeResult, failure_threshold: u32) {
        self.total_probes += 1;

        match result.latency_ms {
            Some(latency) if result.success => {
                self.successful_probes += 1;
                self.consecutive_failures = 0;
                self.current_latency_ms = latency;
                self.status = EndpointStatus::Online;
                while self.samples.len() >= self.max_samples.max(1) {
                    self.samples.pop_front();
                }
                self.samples.push_back(latency);
                self.recompute_stats();
            }
            _ => {
                self.failed_probes += 1;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.current_latency_ms = NO_LATENCY;
                self.last_failure = Some(result.failure_reason.unwrap_or(FailureReason::Unknown));
                if self.consecutive_failures >= failure_threshold {
                    self.status = EndpointStatus::Offline;
                }
            }
        }

        self.loss_percent = loss_percent(self.failed_probes, self.total_probes);
        self.last_update = Some(result.timestamp);
    }

    /// Marca o endereço com erro terminal (sessão encerrada por falha de recurso).
    pub fn mark_error(&mut self) {
        self.status = EndpointStatus::Error;
        self.current_latency_ms = NO_LATENCY;
        self.last_update = Some(Utc::now());
    }

    fn recompute_stats(&mut self) {
        if self.samples.is_empty() {
            self.stats = LatencyStats::default();
            return;
        }
        let min = self.samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        self.stats = LatencyStats {
            min: Some(min),
            max: Some(max),
            avg: Some(avg),
        };
    }
}

/// Percentual de perda, 100 quando nenhuma probe foi feita.
pub fn loss_percent(failed: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (failed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}
