//! Monitor contínuo de alcançabilidade de rede.
//!
//! Sessões por endereço executam probes periódicas e mantêm estatísticas de
//! latência e perda consultáveis a qualquer momento.

pub mod api;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod ping;
pub mod registry;
pub mod session;
pub mod storage;
pub mod types;
pub mod validator;

pub use endpoint::EndpointState;
pub use error::MonitorError;
pub use registry::{EndpointStats, MonitorRegistry, StartOutcome};
