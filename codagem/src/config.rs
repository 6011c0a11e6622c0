use config as config_crate;
use serde::Deserialize;
use std::time::Duration;

/// Mecanismo usado para executar as probes.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeBackend {
    /// Comando `ping` do sistema.
    #[default]
    Command,
    /// Socket ICMP nativo via surge-ping.
    Icmp,
}

/// Configuração operacional do sistema.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Endereço de escuta da API HTTP.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Intervalo entre probes de um mesmo endereço, em milissegundos.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Timeout de cada probe, em milissegundos.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Margem extra antes de abandonar uma probe que não terminou sozinha.
    #[serde(default = "default_probe_grace_ms")]
    pub probe_grace_ms: u64,
    /// Espera máxima pelo término de uma sessão no stop.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Quantidade de latências mantidas por endereço.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Falhas consecutivas necessárias para marcar o endereço como Offline.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Número máximo de sessões simultâneas.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Tentativas de ping por probe.
    #[serde(default = "default_attempts_per_probe")]
    pub attempts_per_probe: usize,
    #[serde(default)]
    pub probe_backend: ProbeBackend,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".into()
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_probe_timeout_ms() -> u64 {
    2000
}
fn default_probe_grace_ms() -> u64 {
    500
}
fn default_stop_grace_ms() -> u64 {
    2000
}
fn default_max_samples() -> usize {
    60
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_max_sessions() -> usize {
    256
}
fn default_attempts_per_probe() -> usize {
    1
}

/// Limite superior da janela de latências.
pub const MAX_SAMPLES_LIMIT: usize = 100;

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            interval_ms: default_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_grace_ms: default_probe_grace_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            max_samples: default_max_samples(),
            failure_threshold: default_failure_threshold(),
            max_sessions: default_max_sessions(),
            attempts_per_probe: default_attempts_per_probe(),
            probe_backend: ProbeBackend::default(),
        }
    }
}

impl Config {
    /// Carrega `config.*` (opcional) e variáveis `MONITOR_*`, nessa ordem.
    pub fn load() -> anyhow::Result<Self> {
        let settings = config_crate::Config::builder()
            .add_source(config_crate::File::with_name("config").required(false))
            .add_source(config_crate::Environment::with_prefix("MONITOR").try_parsing(true))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms deve ser maior que zero".into());
        }
        if self.probe_timeout_ms == 0 {
            return Err("probe_timeout_ms deve ser maior que zero".into());
        }
        if self.failure_threshold == 0 {
            return Err("failure_threshold deve ser maior que zero".into());
        }
        if self.attempts_per_probe == 0 {
            return Err("attempts_per_probe deve ser maior que zero".into());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions deve ser maior que zero".into());
        }
        if self.max_samples == 0 || self.max_samples > MAX_SAMPLES_LIMIT {
            return Err(format!(
                "max_samples ({}) deve estar entre 1 e {}",
                self.max_samples, MAX_SAMPLES_LIMIT
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn probe_grace(&self) -> Duration {
        Duration::from_millis(self.probe_grace_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_sao_validos() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.max_samples, 60);
        assert_eq!(config.probe_backend, ProbeBackend::Command);
    }

    #[test]
    fn rejeita_janela_fora_do_limite() {
        let config = Config {
            max_samples: MAX_SAMPLES_LIMIT + 1,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_samples: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejeita_intervalo_zero() {
        let config = Config {
            interval_ms: 0,
            ..Config::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            "interval_ms deve ser maior que zero"
        );
    }

    #[test]
    fn campos_ausentes_usam_defaults() {
        let settings = config_crate::Config::builder()
            .set_override("interval_ms", 250)
            .unwrap()
            .set_override("probe_backend", "icmp")
            .unwrap()
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();
        assert_eq!(config.interval_ms, 250);
        assert_eq!(config.probe_backend, ProbeBackend::Icmp);
        assert_eq!(config.probe_timeout_ms, 2000);
    }
}
