// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::net::TcpListener;
use std::time::Duration;

use relay_server::ws::messages::BroadcastShutdown;
use relay_server::{configurations, run, state::AppState, telemetry};
use tokio_util::sync::CancellationToken;
use tracing::info;

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let subscriber = telemetry::get_subscriber("relay-server".into(), "info".into(), std::io::stdout);
    telemetry::init_subscriber(subscriber);

    let environment = configurations::Environment::from_env()
        .unwrap_or_else(|e| panic!("{e}"));
    let settings = configurations::get_configuration("./")
        .expect("failed to load configuration");

    // §6.4: `dev_mode` bypasses SMS verification delivery; refusing to
    // start with it on anywhere but `local` keeps it out of production by
    // construction rather than by operator discipline.
    if settings.application.dev_mode && !matches!(environment, configurations::Environment::Local) {
        panic!("refusing to start: application.dev_mode is set outside the local environment");
    }

    let address = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = TcpListener::bind(&address)
        .unwrap_or_else(|e| panic!("failed to bind {address}: {e}"));
    info!(%address, "binding listener");

    let state = AppState::build(&settings)
        .await
        .expect("failed to build application state");

    let shutdown = CancellationToken::new();
    let scheduler = state.scheduler.clone();
    let scheduler_handles = scheduler.spawn_all(shutdown.clone());

    let registry = state.registry.clone();
    let server = run(listener, state)?;
    let server_handle = server.handle();

    actix::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining");
        shutdown.cancel();
        registry.do_send(BroadcastShutdown);
        server_handle.stop(true).await;
    });

    server.await?;

    for handle in scheduler_handles {
        let _ = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, handle).await;
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
