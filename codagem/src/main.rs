use anyhow::Result;
use monitor_conectividade::{api, config, ping, registry::MonitorRegistry};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializa o sistema de logging (tracing), `RUST_LOG` sobrescreve o nível
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::load()?;
    info!("Configuração carregada: {:?}", config);

    let prober = ping::build_prober(config.probe_backend)?;
    info!("Backend de probe: {}", prober.name());

    let registry = Arc::new(MonitorRegistry::new(&config, prober));

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn({
        let registry = Arc::clone(&registry);
        let listen_addr = config.listen_addr.clone();
        async move {
            api::start_server(&listen_addr, registry, async move {
                let _ = shutdown_rx.await;
            })
            .await
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Sinal de desligamento recebido. Encerrando monitoramento...");
        }
        res = &mut server => {
            match res {
                Ok(Err(e)) => error!("API HTTP encerrou com erro: {:?}", e),
                Err(e) => error!("Task da API falhou: {:?}", e),
                Ok(Ok(())) => {}
            }
            registry.shutdown().await;
            anyhow::bail!("API HTTP encerrada inesperadamente");
        }
    }

    let _ = shutdown_tx.send(());
    registry.shutdown().await;
    match server.await {
        Ok(Err(e)) => error!("API HTTP encerrou com erro: {:?}", e),
        Err(e) => error!("Task da API falhou: {:?}", e),
        Ok(Ok(())) => {}
    }
    info!("Monitoramento encerrado.");
    Ok(())
}
