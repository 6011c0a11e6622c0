//! session.rs — Ciclo de vida do monitoramento contínuo de um endereço
//!
//! Created -> Running -> Cancelling -> Terminated. Uma task por endereço:
//! probe, atualização do estado, espera do restante do intervalo. As duas
//! suspensões (probe e espera) são interrompidas pelo token de cancelamento.

use crate::endpoint::EndpointState;
use crate::ping::ProbeExecutor;
use crate::storage::StateStore;
use crate::types::SessionPhase;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tabela endereço → sessão, compartilhada com o registro.
pub type SessionTable = DashMap<IpAddr, MonitorSession>;

/// Parâmetros de temporização de uma sessão.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
}

/// Parte da sessão compartilhada entre a task e quem a controla.
struct SessionShared {
    id: u64,
    address: IpAddr,
    cancel: CancellationToken,
    phase: watch::Sender<SessionPhase>,
    released: OnceLock<Option<EndpointState>>,
    store: Arc<StateStore>,
    sessions: Arc<SessionTable>,
}

impl SessionShared {
    /// Libera a entrada do StateStore e desregistra a sessão. Só a primeira
    /// chamada tem efeito; as seguintes devolvem o mesmo estado final.
    fn release(&self) -> Option<EndpointState> {
        let mut first = false;
        let final_state = self.released.get_or_init(|| {
            first = true;
            let state = self.store.release(self.address, self.id);
            self.sessions
                .remove_if(&self.address, |_, session| session.id() == self.id);
            state
        });
        if !first {
            debug!(
                "[MONITOR {}] Sessão {} já liberada, nada a fazer.",
                self.address, self.id
            );
        }
        final_state.clone()
    }
}

/// Sessão de monitoramento de um endereço.
pub struct MonitorSession {
    shared: Arc<SessionShared>,
    task: Option<JoinHandle<()>>,
}

impl MonitorSession {
    pub fn new(
        id: u64,
        address: IpAddr,
        store: Arc<StateStore>,
        sessions: Arc<SessionTable>,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Created);
        Self {
            shared: Arc::new(SessionShared {
                id,
                address,
                cancel: CancellationToken::new(),
                phase,
                released: OnceLock::new(),
                store,
                sessions,
            }),
            task: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn address(&self) -> IpAddr {
        self.shared.address
    }

    pub fn phase(&self) -> SessionPhase {
        *self.shared.phase.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == SessionPhase::Running
    }

    /// Created -> Running: dispara o loop de probes.
    pub fn start(&mut self, executor: ProbeExecutor, settings: SessionSettings) {
        if self.task.is_some() {
            warn!(
                "[MONITOR {}] Sessão {} já iniciada, ignorando novo start.",
                self.shared.address, self.shared.id
            );
            return;
        }
        self.shared.phase.send_replace(SessionPhase::Running);
        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(run_loop(shared, executor, settings)));
    }

    /// Sinaliza o cancelamento. Seguro mesmo depois do término.
    pub fn stop(&self) {
        self.shared.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Terminated {
                return false;
            }
            *phase = SessionPhase::Cancelling;
            true
        });
        self.shared.cancel.cancel();
    }

    /// Espera o término da task por até `grace`. Retorna true se terminou.
    pub async fn join(&mut self, grace: Duration) -> bool {
        let Some(task) = self.task.as_mut() else {
            return true;
        };
        match timeout(grace, task).await {
            Ok(Ok(())) => {
                self.task = None;
                true
            }
            Ok(Err(e)) => {
                warn!(
                    "[MONITOR {}] Inconsistência interna: task da sessão {} terminou com erro: {}",
                    self.shared.address, self.shared.id, e
                );
                self.task = None;
                self.shared.phase.send_replace(SessionPhase::Terminated);
                true
            }
            Err(_) => false,
        }
    }

    /// Libera a entrada do StateStore e o registro. Idempotente.
    pub fn release(&self) -> Option<EndpointState> {
        self.shared.release()
    }
}

async fn run_loop(shared: Arc<SessionShared>, executor: ProbeExecutor, settings: SessionSettings) {
    let address = shared.address;
    info!(
        "[MONITOR {}] Sessão {} em execução (backend {}, intervalo {:?}, timeout {:?}).",
        address,
        shared.id,
        executor.backend(),
        settings.interval,
        settings.probe_timeout
    );

    let mut cycle_number: u64 = 0;
    loop {
        let cycle_start = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            outcome = executor.probe(address, settings.probe_timeout) => outcome,
        };
        cycle_number += 1;

        match outcome {
            Ok(result) => {
                debug!(
                    "[MONITOR {}][CICLO {}] sucesso={} latência={:?} falha={:?}",
                    address, cycle_number, result.success, result.latency_ms, result.failure_reason
                );
                if !shared.store.update(address, shared.id, &result) {
                    if !shared.cancel.is_cancelled() {
                        warn!(
                            "[MONITOR {}] Inconsistência interna: entrada da sessão {} sumiu do estado, encerrando.",
                            address, shared.id
                        );
                    }
                    break;
                }
            }
            Err(e) => {
                error!(
                    "[MONITOR {}][CICLO {}] Falha irrecuperável na probe, encerrando sessão: {}",
                    address, cycle_number, e
                );
                shared.store.mark_error(address, shared.id);
                break;
            }
        }

        // Probe mais lenta que o intervalo: segue direto para a próxima
        let wait = settings.interval.saturating_sub(cycle_start.elapsed());
        if !wait.is_zero() {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }
    }

    let final_state = shared.release();
    shared.phase.send_replace(SessionPhase::Terminated);
    match final_state {
        Some(state) => info!(
            "[MONITOR {}] Sessão {} encerrada após {} ciclos. Status final {:?}, probes {}/{}, perda {:.2}%.",
            address,
            shared.id,
            cycle_number,
            state.status,
            state.successful_probes,
            state.total_probes,
            state.loss_percent
        ),
        None => info!(
            "[MONITOR {}] Sessão {} encerrada após {} ciclos.",
            address, shared.id, cycle_number
        ),
    }
}
