//! vsauth authorization server binary.
//!
//! Loads configuration from the environment, connects the storage backend,
//! starts the artifact reaper and serves the HTTP endpoints until a shutdown
//! signal arrives.

use anyhow::Result;
use std::{env, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;
use vsauth::{
    config::Config,
    errors::ConfigError,
    http::{AppState, build_router},
    oauth::{
        Argon2PasswordService, AuthorizationServer, EmailSender, LogEmailSender, ServerSettings,
        SigningKey, WebhookEmailSender,
    },
    storage::{create_storage_backend, parse_storage_backend, run_reaper},
};

fn load_signing_key(config: &Config) -> Result<SigningKey> {
    let kid = config.signing_key_id.as_deref();
    match &config.signing_key_path {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::SigningKeyUnreadable(path.clone(), e))?;
            Ok(SigningKey::from_pem(&pem, kid)?)
        }
        None => {
            tracing::warn!("SIGNING_KEY_PATH not set; generating an ephemeral signing key");
            let (key, _pem) = SigningKey::generate(kid)?;
            Ok(key)
        }
    }
}

fn email_sender(config: &Config, http_client: reqwest::Client) -> Arc<dyn EmailSender> {
    match &config.email_webhook_url {
        Some(url) => Arc::new(WebhookEmailSender::new(
            http_client,
            url.clone(),
            config.email_webhook_secret.clone(),
        )),
        None => {
            tracing::info!("EMAIL_WEBHOOK_URL not set; emails will be logged");
            Arc::new(LogEmailSender)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vsauth=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = vsauth::config::version()?;

    if env::args().any(|arg| arg == "--version") {
        println!("{version}");
        return Ok(());
    }

    tracing::info!(?version, "Starting vsauth");

    let config = Config::new()?;

    let storage_backend =
        parse_storage_backend(&config.storage_backend, config.database_url.as_deref())?;
    let stores = create_storage_backend(storage_backend).await?;

    let signing_key = Arc::new(load_signing_key(&config)?);
    tracing::info!(kid = signing_key.kid(), "signing key loaded");

    let http_client = reqwest::Client::builder()
        .user_agent(format!("vsauth/{}", version))
        .timeout(Duration::from_secs(10))
        .build()?;

    let auth_server = Arc::new(AuthorizationServer::new(
        stores.clone(),
        signing_key,
        Arc::new(Argon2PasswordService::new()),
        email_sender(&config, http_client),
        ServerSettings::from(&config),
    ));

    let app = build_router(AppState::new(auth_server.clone(), &config));

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!(error = ?err, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    tracing::error!(error = ?err, "failed to install signal handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    // Expired artifacts and stale counters
    {
        let interval = config
            .artifact_cleanup_interval
            .as_ref()
            .to_std()
            .unwrap_or(Duration::from_secs(60));
        tracker.spawn(run_reaper(
            stores,
            auth_server.rate_limiter().clone(),
            interval,
            token.clone(),
        ));
    }

    // Start HTTP server
    {
        let http_port = *config.http_port.as_ref();
        let bind_address = format!("0.0.0.0:{http_port}");
        tracing::info!("Starting server on {bind_address}");
        let listener = TcpListener::bind(&bind_address).await?;

        let inner_token = token.clone();
        tracker.spawn(async move {
            let shutdown_token = inner_token.clone();
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
                tracing::info!("axum graceful shutdown complete");
            })
            .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}
