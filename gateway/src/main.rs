// gateway/src/main.rs
use actix::Actor;
use actix_web::{App, HttpServer};

use common::{setup_tracing, with_bootstrap_tracing, GatewayConfig};
use gateway::actors::session_registry::{SessionRegistryActor, StopGateway};
use gateway::GatewayState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // The log level comes from the configuration, so loading logs go to a bootstrap subscriber
    let config = with_bootstrap_tracing(GatewayConfig::from_env);
    setup_tracing(&config.logging.level);

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
    }

    let bind_addr = config.server.bind_addr();
    let registry = SessionRegistryActor::new(config.limits.clone()).start();
    let state = GatewayState::new(config.clone(), registry.clone())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    tracing::info!(
        "Starting gateway on {}{} (max {} clients, {} per address)",
        bind_addr,
        config.server.path,
        config.limits.max_clients,
        config.limits.max_connections_per_ip
    );
    if config.webirc.enabled {
        tracing::info!("WEBIRC enabled as {}", config.webirc.gateway_name);
    }
    if config.encryption.enabled {
        tracing::info!("Payload encryption enabled");
    }

    let server = HttpServer::new(move || {
        let state = state.clone();
        App::new().configure(move |cfg| state.configure(cfg))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let handle = server.handle();
    actix_web::rt::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown requested, closing sessions");
        match registry.send(StopGateway).await {
            Ok(closed) => tracing::info!("Closed {} sessions", closed),
            Err(e) => tracing::error!("Session registry unavailable during shutdown: {}", e),
        }
        handle.stop(true).await;
    });

    server.await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
                return;
            },
            Err(e) => tracing::warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
