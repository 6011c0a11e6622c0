//! ping.rs — Execução de uma única probe com tempo limitado
//!
//! Dois mecanismos: o comando `ping` do sistema e sockets ICMP nativos via
//! surge-ping. Ambos ficam atrás do trait `Prober`; o `ProbeExecutor` impõe o
//! limite rígido de `timeout + margem` e abandona a probe que estourar.

use crate::config::ProbeBackend;
use crate::types::{FailureReason, ProbeResult};
use async_trait::async_trait;
use std::io;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use surge_ping::{Client, Config as SurgeConfig, ICMP, PingIdentifier, PingSequence, SurgeError};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

/// Falhas que impedem a criação do mecanismo de probe. Encerram a sessão.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("executável `{program}` indisponível: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("falha ao criar socket ICMP: {0}")]
    Socket(#[source] io::Error),
    #[error("backend sem suporte a {0}")]
    Unsupported(&'static str),
}

/// Mecanismo de probe. Sem estado; seguro para chamadas concorrentes em
/// endereços diferentes.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Executa um echo request contra `address`, esperando no máximo `timeout`.
    async fn probe(&self, address: IpAddr, timeout: Duration) -> Result<ProbeResult, ProbeError>;

    /// Nome do backend para logging.
    fn name(&self) -> &'static str;
}

/// Cria o prober configurado.
pub fn build_prober(backend: ProbeBackend) -> Result<Arc<dyn Prober>, ProbeError> {
    Ok(match backend {
        ProbeBackend::Command => Arc::new(CommandProber::default()),
        ProbeBackend::Icmp => Arc::new(IcmpProber::new()?),
    })
}

/// Probe via comando `ping` do sistema.
#[derive(Debug, Clone)]
pub struct CommandProber {
    program: String,
}

impl Default for CommandProber {
    fn default() -> Self {
        Self::new("ping")
    }
}

impl CommandProber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Prober for CommandProber {
    async fn probe(&self, address: IpAddr, limit: Duration) -> Result<ProbeResult, ProbeError> {
        // -W só aceita segundos inteiros em versões antigas do iputils;
        // o timeout do tokio abaixo garante o limite real.
        let wait_secs = limit.as_secs_f64().ceil().max(1.0) as u64;

        let mut cmd = Command::new(&self.program);
        if address.is_ipv6() {
            cmd.arg("-6");
        } else {
            cmd.arg("-4");
        }
        cmd.arg("-n")
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(wait_secs.to_string())
            .arg(address.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let start = Instant::now();
        let output = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e))
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                ) =>
            {
                return Err(ProbeError::Unavailable {
                    program: self.program.clone(),
                    source: e,
                });
            }
            Ok(Err(e)) => {
                debug!("[PING {}] Erro ao executar ping: {}", address, e);
                return Ok(ProbeResult::failure(FailureReason::Unknown));
            }
            // Timeout explícito; o processo filho morre junto com o future
            Err(_) => return Ok(ProbeResult::failure(FailureReason::Timeout)),
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            let latency = parse_latency(&text).unwrap_or_else(|| {
                debug!(
                    "[PING {}] Latência não encontrada na saída, usando tempo medido.",
                    address
                );
                elapsed_ms
            });
            Ok(ProbeResult::success(latency))
        } else {
            Ok(ProbeResult::failure(classify_output(&text)))
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Extrai a latência de `time=12.3 ms` (ou `time<1 ms`) da saída do ping.
pub fn parse_latency(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let start = line.find("time=").or_else(|| line.find("time<"))? + "time=".len();
        let value: String = line[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        value.parse::<f64>().ok()
    })
}

/// Classifica a saída de um ping que falhou.
pub fn classify_output(output: &str) -> FailureReason {
    let lower = output.to_lowercase();
    if lower.contains("permission denied") || lower.contains("operation not permitted") {
        FailureReason::PermissionDenied
    } else if lower.contains("unreachable") {
        FailureReason::Unreachable
    } else if lower.contains("name or service not known") {
        FailureReason::DnsError
    } else if lower.contains("100% packet loss") {
        FailureReason::Timeout
    } else {
        FailureReason::Unknown
    }
}

/// Probe via socket ICMP (surge-ping).
pub struct IcmpProber {
    v4: Client,
    v6: Option<Client>,
}

impl IcmpProber {
    pub fn new() -> Result<Self, ProbeError> {
        let v4 = Client::new(&SurgeConfig::default()).map_err(ProbeError::Socket)?;
        let v6 = match Client::new(&SurgeConfig::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Socket ICMPv6 indisponível, endereços IPv6 não serão monitorados: {}", e);
                None
            }
        };
        Ok(Self { v4, v6 })
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, address: IpAddr, limit: Duration) -> Result<ProbeResult, ProbeError> {
        let client = match address {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => self.v6.as_ref().ok_or(ProbeError::Unsupported("IPv6"))?,
        };

        let payload = [0u8; 56];
        let mut pinger = client.pinger(address, PingIdentifier(rand::random())).await;
        pinger.timeout(limit);

        let result = match pinger.ping(PingSequence(0), &payload).await {
            Ok((_, rtt)) => ProbeResult::success(rtt.as_secs_f64() * 1000.0),
            Err(SurgeError::Timeout { .. }) => ProbeResult::failure(FailureReason::Timeout),
            Err(SurgeError::IOError(e)) => ProbeResult::failure(classify_io(&e)),
            Err(e) => {
                debug!("[PING {}] Erro ICMP: {}", address, e);
                ProbeResult::failure(FailureReason::Unknown)
            }
        };
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "icmp"
    }
}

fn classify_io(error: &io::Error) -> FailureReason {
    match error.kind() {
        io::ErrorKind::PermissionDenied => FailureReason::PermissionDenied,
        io::ErrorKind::NetworkUnreachable | io::ErrorKind::HostUnreachable => {
            FailureReason::Unreachable
        }
        io::ErrorKind::TimedOut => FailureReason::Timeout,
        _ => FailureReason::Unknown,
    }
}

/// Executor de probes com limite rígido e tentativas múltiplas.
#[derive(Clone)]
pub struct ProbeExecutor {
    prober: Arc<dyn Prober>,
    grace: Duration,
    attempts: usize,
}

impl ProbeExecutor {
    pub fn new(prober: Arc<dyn Prober>, grace: Duration, attempts: usize) -> Self {
        Self {
            prober,
            grace,
            attempts: attempts.max(1),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.prober.name()
    }

    /// Executa uma probe. Nunca bloqueia mais que `timeout + grace`.
    ///
    /// Com várias tentativas, o timeout é dividido entre elas e o limite
    /// rígido vale para o conjunto. A probe tem sucesso se qualquer tentativa
    /// teve, com a média das latências bem-sucedidas; senão falha com o
    /// último motivo.
    pub async fn probe(&self, address: IpAddr, limit: Duration) -> Result<ProbeResult, ProbeError> {
        let per_attempt = (limit / self.attempts as u32).max(Duration::from_millis(1));
        let bound = limit + self.grace;
        let mut latencies = Vec::with_capacity(self.attempts);
        let mut last_failure = None;

        let attempts = async {
            for _ in 0..self.attempts {
                let result = self.single(address, per_attempt).await?;
                match result.latency_ms {
                    Some(latency) if result.success => latencies.push(latency),
                    _ => last_failure = result.failure_reason,
                }
            }
            Ok::<(), ProbeError>(())
        };
        let outcome = timeout(bound, attempts).await;
        match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "[PING {}] Tentativas não terminaram em {:?}, abandonadas.",
                    address, bound
                );
                last_failure = Some(FailureReason::Timeout);
            }
        }

        if latencies.is_empty() {
            Ok(ProbeResult::failure(last_failure.unwrap_or(FailureReason::Unknown)))
        } else {
            let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;
            Ok(ProbeResult::success(avg))
        }
    }

    async fn single(&self, address: IpAddr, limit: Duration) -> Result<ProbeResult, ProbeError> {
        match timeout(limit + self.grace, self.prober.probe(address, limit)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "[PING {}] Probe não terminou em {:?}, abandonada.",
                    address,
                    limit + self.grace
                );
                Ok(ProbeResult::failure(FailureReason::Timeout))
            }
        }
    }
}
