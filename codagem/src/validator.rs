//! validator.rs — Validação de endereços de host (literais IPv4/IPv6)
//!
//! Nenhuma resolução de nome é feita: hostnames são rejeitados.

use std::net::IpAddr;

/// Converte a string em `IpAddr` se for um literal IPv4 (dotted-quad) ou IPv6.
pub fn parse(input: &str) -> Option<IpAddr> {
    input.parse::<IpAddr>().ok()
}

/// Retorna true se a string é um endereço IP literal bem formado.
pub fn is_valid(input: &str) -> bool {
    parse(input).is_some()
}
