//! registry.rs — Registro endereço → sessão ativa
//!
//! No máximo uma sessão não terminada por endereço. Start e stop são
//! idempotentes; consultas a endereços nunca monitorados devolvem a forma
//! "sem dados" em vez de erro.

use crate::config::Config;
use crate::endpoint::EndpointState;
use crate::error::{MonitorError, Result};
use crate::ping::{ProbeExecutor, Prober};
use crate::session::{MonitorSession, SessionSettings, SessionTable};
use crate::storage::StateStore;
use crate::types::{ActiveSession, OneShotProbe};
use crate::validator;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Resultado de um pedido de início de monitoramento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Estatísticas de um endereço, com indicação se há monitoramento ativo.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub monitored: bool,
    #[serde(flatten)]
    pub state: EndpointState,
}

pub struct MonitorRegistry {
    sessions: Arc<SessionTable>,
    store: Arc<StateStore>,
    executor: ProbeExecutor,
    settings: SessionSettings,
    stop_grace: Duration,
    max_sessions: usize,
    next_id: AtomicU64,
}

impl MonitorRegistry {
    pub fn new(config: &Config, prober: Arc<dyn Prober>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            store: Arc::new(StateStore::new(config.max_samples, config.failure_threshold)),
            executor: ProbeExecutor::new(prober, config.probe_grace(), config.attempts_per_probe),
            settings: SessionSettings {
                interval: config.interval(),
                probe_timeout: config.probe_timeout(),
            },
            stop_grace: config.stop_grace(),
            max_sessions: config.max_sessions,
            next_id: AtomicU64::new(1),
        }
    }

    fn parse(address: &str) -> Result<IpAddr> {
        validator::parse(address).ok_or_else(|| MonitorError::InvalidAddress(address.to_string()))
    }

    /// Inicia o monitoramento contínuo de `address`.
    pub fn start_monitoring(&self, address: &str) -> Result<StartOutcome> {
        let ip = Self::parse(address)?;

        // len() não pode ser chamado com o lock do entry em mãos
        if !self.sessions.contains_key(&ip) && self.sessions.len() >= self.max_sessions {
            warn!(
                "[MONITOR {}] Limite de {} sessões atingido, start recusado.",
                ip, self.max_sessions
            );
            return Err(MonitorError::ResourceExhaustion {
                limit: self.max_sessions,
            });
        }

        match self.sessions.entry(ip) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_running() {
                    info!("[MONITOR {}] Já monitorado, start ignorado.", ip);
                    return Ok(StartOutcome::AlreadyRunning);
                }
                // sessão em término que ainda não saiu da tabela
                occupied.get().stop();
                let session = self.spawn_session(ip);
                info!(
                    "[MONITOR {}] Sessão {} substituída pela sessão {}.",
                    ip,
                    occupied.get().id(),
                    session.id()
                );
                occupied.insert(session);
                Ok(StartOutcome::Started)
            }
            Entry::Vacant(vacant) => {
                let session = self.spawn_session(ip);
                info!("[MONITOR {}] Monitoramento iniciado (sessão {}).", ip, session.id());
                vacant.insert(session);
                Ok(StartOutcome::Started)
            }
        }
    }

    fn spawn_session(&self, ip: IpAddr) -> MonitorSession {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.store.init(ip, id);
        let mut session =
            MonitorSession::new(id, ip, Arc::clone(&self.store), Arc::clone(&self.sessions));
        session.start(self.executor.clone(), self.settings);
        session
    }

    /// Para o monitoramento de `address` e devolve o estado final, se havia sessão.
    ///
    /// A entrada do estado é liberada antes de esperar a task, então um start
    /// concorrente já começa do zero. Espera no máximo `stop_grace` pelo
    /// término.
    pub async fn stop_monitoring(&self, address: &str) -> Result<Option<EndpointState>> {
        let ip = Self::parse(address)?;

        let Some((_, mut session)) = self.sessions.remove(&ip) else {
            if self.store.discard(ip) {
                info!("[MONITOR {}] Erro terminal anterior descartado.", ip);
            } else {
                info!("[MONITOR {}] Nenhuma sessão ativa, stop ignorado.", ip);
            }
            return Ok(None);
        };

        session.stop();
        let final_state = session.release();
        if !session.join(self.stop_grace).await {
            warn!(
                "[MONITOR {}] Sessão {} não terminou em {:?}, removida mesmo assim.",
                ip,
                session.id(),
                self.stop_grace
            );
        }
        self.store.discard(ip);
        info!("[MONITOR {}] Monitoramento parado (sessão {}).", ip, session.id());
        Ok(final_state)
    }

    /// Estatísticas atuais de `address`.
    ///
    /// Sem sessão ativa, devolve o estado de uma sessão encerrada por erro
    /// terminal, se houver, ou a forma "sem dados".
    pub fn get_stats(&self, address: &str) -> Result<EndpointStats> {
        let ip = Self::parse(address)?;
        if let Some(state) = self.store.get(ip) {
            return Ok(EndpointStats {
                monitored: true,
                state,
            });
        }
        Ok(EndpointStats {
            monitored: false,
            state: self
                .store
                .last_error(ip)
                .unwrap_or_else(|| EndpointState::empty(ip)),
        })
    }

    /// Probe avulsa, sem sessão e sem tocar no estado.
    pub async fn probe_once(&self, address: &str) -> Result<OneShotProbe> {
        let ip = Self::parse(address)?;
        let result = self
            .executor
            .probe(ip, self.settings.probe_timeout)
            .await
            .map_err(|e| {
                error!("[PING {}] Probe avulsa impossível: {}", ip, e);
                MonitorError::ProbeUnavailable(e)
            })?;
        Ok(OneShotProbe {
            address: ip,
            result,
        })
    }

    /// Sessões atualmente registradas, ordenadas por endereço.
    pub fn active(&self) -> Vec<ActiveSession> {
        let mut active: Vec<ActiveSession> = self
            .sessions
            .iter()
            .map(|entry| ActiveSession {
                address: entry.address(),
                phase: entry.phase(),
            })
            .collect();
        active.sort_by_key(|session| session.address);
        active
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Para todas as sessões: sinaliza todas antes de esperar cada uma.
    pub async fn shutdown(&self) {
        let addresses: Vec<IpAddr> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let stopping: Vec<MonitorSession> = addresses
            .iter()
            .filter_map(|ip| self.sessions.remove(ip))
            .map(|(_, session)| {
                session.stop();
                session.release();
                session
            })
            .collect();

        info!("Encerrando {} sessões de monitoramento...", stopping.len());
        for mut session in stopping {
            if !session.join(self.stop_grace).await {
                warn!(
                    "[MONITOR {}] Sessão {} não terminou no shutdown.",
                    session.address(),
                    session.id()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::CommandProber;
    use crate::ping::testing::{ScriptedProber, Step};
    use crate::types::{EndpointStatus, FailureReason, SessionPhase};
    use tokio::time::sleep;

    fn config(interval_ms: u64, probe_timeout_ms: u64) -> Config {
        Config {
            interval_ms,
            probe_timeout_ms,
            probe_grace_ms: 20,
            stop_grace_ms: 500,
            ..Config::default()
        }
    }

    fn registry(config: &Config, prober: ScriptedProber) -> (MonitorRegistry, Arc<ScriptedProber>) {
        let prober = Arc::new(prober);
        (MonitorRegistry::new(config, prober.clone()), prober)
    }

    fn replying() -> ScriptedProber {
        ScriptedProber::new(Step::Reply(0.05), Duration::from_millis(1))
    }

    #[tokio::test(start_paused = true)]
    async fn start_duplicado_mantem_uma_sessao() {
        let (registry, _) = registry(&config(200, 100), replying());

        assert_eq!(registry.start_monitoring("127.0.0.1").unwrap(), StartOutcome::Started);
        assert_eq!(
            registry.start_monitoring("127.0.0.1").unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.active()[0].phase, SessionPhase::Running);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn endereco_invalido_nao_toca_estado() {
        let (registry, prober) = registry(&config(200, 100), replying());

        for bad in ["999.1.1.1", "not-an-ip", ""] {
            assert!(matches!(
                registry.start_monitoring(bad),
                Err(MonitorError::InvalidAddress(_))
            ));
            assert!(matches!(
                registry.stop_monitoring(bad).await,
                Err(MonitorError::InvalidAddress(_))
            ));
        }
        assert_eq!(registry.active_count(), 0);
        assert!(registry.store.is_empty());
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn stop_sem_sessao_e_noop() {
        let (registry, _) = registry(&config(200, 100), replying());
        assert!(registry.stop_monitoring("1.2.3.4").await.unwrap().is_none());
        assert!(registry.store.is_empty());
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn stats_sem_historico_tem_forma_vazia() {
        let (registry, _) = registry(&config(200, 100), replying());
        let stats = registry.get_stats("1.2.3.4").unwrap();
        assert!(!stats.monitored);
        assert_eq!(stats.state.status, EndpointStatus::Unknown);
        assert_eq!(stats.state.total_probes, 0);
        assert_eq!(stats.state.loss_percent, 100.0);
        assert_eq!(stats.state.stats.avg, None);
        assert!(registry.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loopback_por_um_segundo() {
        let (registry, _) = registry(&config(200, 100), replying());
        registry.start_monitoring("127.0.0.1").unwrap();

        sleep(Duration::from_millis(1000)).await;
        let stats = registry.get_stats("127.0.0.1").unwrap();
        assert!(stats.monitored);
        assert!((4..=6).contains(&stats.state.total_probes));
        assert_eq!(stats.state.successful_probes, stats.state.total_probes);
        assert_eq!(stats.state.status, EndpointStatus::Online);
        assert_eq!(stats.state.loss_percent, 0.0);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn endereco_nao_roteavel_fica_offline() {
        let (registry, _) = registry(
            &config(200, 50),
            ScriptedProber::new(Step::Fail(FailureReason::Timeout), Duration::from_millis(50)),
        );
        registry.start_monitoring("10.255.255.1").unwrap();

        sleep(Duration::from_millis(1000)).await;
        let state = registry.get_stats("10.255.255.1").unwrap().state;
        assert!(state.total_probes >= 3);
        assert_eq!(state.failed_probes, state.total_probes);
        assert!(state.consecutive_failures >= 3);
        assert_eq!(state.status, EndpointStatus::Offline);
        assert_eq!(state.loss_percent, 100.0);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_remove_estado_mesmo_com_probe_em_voo() {
        let (registry, prober) = registry(
            &config(200, 1000),
            ScriptedProber::new(Step::Reply(1.0), Duration::from_millis(300)),
        );
        registry.start_monitoring("192.0.2.7").unwrap();
        sleep(Duration::from_millis(700)).await;
        let calls = prober.calls();

        let final_state = registry.stop_monitoring("192.0.2.7").await.unwrap().unwrap();
        assert_eq!(final_state.total_probes, 2);
        assert!(!registry.get_stats("192.0.2.7").unwrap().monitored);

        sleep(Duration::from_millis(2000)).await;
        assert!(!registry.get_stats("192.0.2.7").unwrap().monitored);
        assert_eq!(prober.calls(), calls);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_com_probe_pendurada_respeita_grace() {
        let mut cfg = config(200, 100);
        cfg.stop_grace_ms = 50;
        let (registry, _) = registry(&cfg, ScriptedProber::new(Step::Hang, Duration::ZERO));
        registry.start_monitoring("192.0.2.8").unwrap();
        sleep(Duration::from_millis(10)).await;

        let start = tokio::time::Instant::now();
        registry.stop_monitoring("192.0.2.8").await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(50));
        assert!(!registry.get_stats("192.0.2.8").unwrap().monitored);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_comeca_do_zero() {
        let (registry, _) = registry(&config(100, 50), replying());
        registry.start_monitoring("192.0.2.9").unwrap();
        sleep(Duration::from_millis(450)).await;
        registry.stop_monitoring("192.0.2.9").await.unwrap();

        registry.start_monitoring("192.0.2.9").unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.get_stats("192.0.2.9").unwrap().state.total_probes, 1);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_durante_stop_comeca_do_zero() {
        let (registry, _) = registry(&config(100, 50), replying());
        registry.start_monitoring("192.0.2.30").unwrap();
        sleep(Duration::from_millis(450)).await;
        let before = registry.get_stats("192.0.2.30").unwrap().state.total_probes;
        assert!(before >= 4);

        let stop = registry.stop_monitoring("192.0.2.30");
        tokio::pin!(stop);
        // avança o stop até a espera pela task antiga
        tokio::select! {
            biased;
            _ = &mut stop => panic!("stop terminou antes da task antiga rodar"),
            _ = std::future::ready(()) => {}
        }

        assert_eq!(registry.start_monitoring("192.0.2.30").unwrap(), StartOutcome::Started);
        assert_eq!(registry.get_stats("192.0.2.30").unwrap().state.total_probes, 0);

        let final_state = stop.await.unwrap().unwrap();
        assert_eq!(final_state.total_probes, before);

        sleep(Duration::from_millis(50)).await;
        let stats = registry.get_stats("192.0.2.30").unwrap();
        assert!(stats.monitored);
        assert_eq!(stats.state.total_probes, 1);
        assert_eq!(registry.active_count(), 1);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn limite_de_sessoes() {
        let mut cfg = config(200, 100);
        cfg.max_sessions = 2;
        let (registry, _) = registry(&cfg, replying());

        registry.start_monitoring("192.0.2.1").unwrap();
        registry.start_monitoring("192.0.2.2").unwrap();
        assert!(matches!(
            registry.start_monitoring("192.0.2.3"),
            Err(MonitorError::ResourceExhaustion { limit: 2 })
        ));
        assert!(!registry.get_stats("192.0.2.3").unwrap().monitored);
        // endereço já monitorado continua idempotente no limite
        assert_eq!(
            registry.start_monitoring("192.0.2.2").unwrap(),
            StartOutcome::AlreadyRunning
        );
        registry.shutdown().await;
        assert_eq!(registry.active_count(), 0);
        assert!(registry.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sessao_com_erro_fatal_sai_do_registro() {
        let (registry, prober) = registry(
            &config(100, 50),
            ScriptedProber::new(Step::Reply(1.0), Duration::ZERO).with_script([Step::Fatal]),
        );
        registry.start_monitoring("192.0.2.20").unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.active_count(), 0);
        let stats = registry.get_stats("192.0.2.20").unwrap();
        assert!(!stats.monitored);
        assert_eq!(stats.state.status, EndpointStatus::Error);

        // stop depois do término descarta o erro, novo start funciona
        assert!(registry.stop_monitoring("192.0.2.20").await.unwrap().is_none());
        assert_eq!(
            registry.get_stats("192.0.2.20").unwrap().state.status,
            EndpointStatus::Unknown
        );
        assert_eq!(registry.start_monitoring("192.0.2.20").unwrap(), StartOutcome::Started);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.get_stats("192.0.2.20").unwrap().state.status, EndpointStatus::Online);
        assert_eq!(prober.calls(), 2);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn enderecos_distintos_em_paralelo() {
        let (registry, _) = registry(&config(100, 50), replying());
        let addresses: Vec<String> = (1..=20).map(|i| format!("198.51.100.{i}")).collect();
        for address in &addresses {
            registry.start_monitoring(address).unwrap();
        }
        sleep(Duration::from_millis(1000)).await;

        for address in &addresses {
            let state = registry.get_stats(address).unwrap().state;
            assert!(state.total_probes >= 9);
            assert_eq!(state.total_probes, state.successful_probes + state.failed_probes);
            assert!(state.samples.len() <= state.max_samples());
        }
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn probe_avulsa_nao_cria_estado() {
        let (registry, _) = registry(&config(200, 100), replying());
        let probe = registry.probe_once("::1").await.unwrap();
        assert!(probe.result.success);
        assert_eq!(probe.address.to_string(), "::1");
        assert!(registry.store.is_empty());
        assert!(matches!(
            registry.probe_once("localhost").await,
            Err(MonitorError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requer o comando ping e acesso ICMP ao loopback"]
    async fn loopback_real() {
        let registry = MonitorRegistry::new(&config(200, 100), Arc::new(CommandProber::default()));
        registry.start_monitoring("127.0.0.1").unwrap();
        sleep(Duration::from_millis(1000)).await;

        let state = registry.stop_monitoring("127.0.0.1").await.unwrap().unwrap();
        assert!((4..=6).contains(&state.total_probes));
        assert_eq!(state.successful_probes, state.total_probes);
        assert_eq!(state.status, EndpointStatus::Online);
        assert_eq!(state.loss_percent, 0.0);
    }

    #[tokio::test]
    #[ignore = "requer o comando ping"]
    async fn endereco_nao_roteavel_real() {
        let registry = MonitorRegistry::new(&config(200, 50), Arc::new(CommandProber::default()));
        registry.start_monitoring("10.255.255.1").unwrap();
        sleep(Duration::from_millis(1000)).await;

        let state = registry.stop_monitoring("10.255.255.1").await.unwrap().unwrap();
        assert_eq!(state.successful_probes, 0);
        assert_eq!(state.status, EndpointStatus::Offline);
        assert_eq!(state.loss_percent, 100.0);
    }
}
