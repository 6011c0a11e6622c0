//! storage.rs — Mapa concorrente endereço → EndpointState
//!
//! Cada entrada pertence a uma sessão (`owner`). Atualizações de uma sessão
//! que não é mais a dona da entrada são descartadas, então uma probe em voo
//! no momento do stop não altera o estado de quem vier depois.
//!
//! Uma sessão que termina com erro terminal deixa a entrada aposentada: não
//! recebe mais atualizações e não conta como monitorada, mas o status Error
//! continua consultável até o próximo start ou stop do endereço.

use crate::endpoint::EndpointState;
use crate::types::{EndpointStatus, ProbeResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::IpAddr;
use tracing::debug;

#[derive(Debug)]
struct Slot {
    owner: u64,
    state: EndpointState,
    retired: bool,
}

impl Slot {
    fn live_for(&self, owner: u64) -> bool {
        !self.retired && self.owner == owner
    }
}

/// Fonte única de verdade para leitores e escritores.
///
/// O DashMap trava por shard: operações sobre endereços diferentes não
/// disputam um lock global.
#[derive(Debug)]
pub struct StateStore {
    entries: DashMap<IpAddr, Slot>,
    max_samples: usize,
    failure_threshold: u32,
}

impl StateStore {
    pub fn new(max_samples: usize, failure_threshold: u32) -> Self {
        Self {
            entries: DashMap::new(),
            max_samples,
            failure_threshold,
        }
    }

    /// Cria o estado zerado do endereço se ainda não existir.
    ///
    /// Idempotente: uma entrada ativa mantém seus dados e apenas passa a
    /// pertencer a `owner`. Uma entrada aposentada é substituída. Retorna
    /// true se a entrada foi criada.
    pub fn init(&self, address: IpAddr, owner: u64) -> bool {
        match self.entries.entry(address) {
            Entry::Occupied(mut slot) if !slot.get().retired => {
                debug!("[STORE {}] Entrada já existe, mantendo dados.", address);
                slot.get_mut().owner = owner;
                false
            }
            Entry::Occupied(mut slot) => {
                slot.insert(self.fresh(address, owner));
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.fresh(address, owner));
                true
            }
        }
    }

    fn fresh(&self, address: IpAddr, owner: u64) -> Slot {
        Slot {
            owner,
            state: EndpointState::new(address, self.max_samples),
            retired: false,
        }
    }

    /// Incorpora um resultado de probe de forma atômica.
    ///
    /// Retorna false quando a entrada não existe ou pertence a outra sessão.
    pub fn update(&self, address: IpAddr, owner: u64, result: &ProbeResult) -> bool {
        match self.entries.get_mut(&address) {
            Some(mut slot) if slot.live_for(owner) => {
                slot.state.record(result, self.failure_threshold);
                true
            }
            Some(_) => {
                debug!("[STORE {}] Resultado de sessão antiga descartado.", address);
                false
            }
            None => false,
        }
    }

    /// Marca a entrada com status Error, se ainda pertencer a `owner`.
    pub fn mark_error(&self, address: IpAddr, owner: u64) -> bool {
        match self.entries.get_mut(&address) {
            Some(mut slot) if slot.live_for(owner) => {
                slot.state.mark_error();
                true
            }
            _ => false,
        }
    }

    /// Cópia imutável do estado de uma entrada ativa.
    pub fn get(&self, address: IpAddr) -> Option<EndpointState> {
        self.entries
            .get(&address)
            .filter(|slot| !slot.retired)
            .map(|slot| slot.state.clone())
    }

    /// Último estado de uma sessão encerrada por erro terminal.
    pub fn last_error(&self, address: IpAddr) -> Option<EndpointState> {
        self.entries
            .get(&address)
            .filter(|slot| slot.retired)
            .map(|slot| slot.state.clone())
    }

    /// Libera a entrada de `owner` e devolve o estado final.
    ///
    /// Entradas com status Error ficam aposentadas em vez de removidas.
    pub fn release(&self, address: IpAddr, owner: u64) -> Option<EndpointState> {
        match self.entries.entry(address) {
            Entry::Occupied(mut slot) if slot.get().live_for(owner) => {
                if slot.get().state.status == EndpointStatus::Error {
                    slot.get_mut().retired = true;
                    Some(slot.get().state.clone())
                } else {
                    Some(slot.remove().state)
                }
            }
            _ => None,
        }
    }

    /// Esquece uma entrada aposentada. Entradas ativas não são tocadas.
    pub fn discard(&self, address: IpAddr) -> bool {
        self.entries
            .remove_if(&address, |_, slot| slot.retired)
            .is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
