use std::sync::Arc;

use anyhow::Context as _;
use idproxy_core::{
    client::{HttpClient, build_http_client},
    forwarder::Forwarder,
    server::Server,
    service::ProxyService,
    token::{
        CachedTokenProvider, MetadataTokenProvider, ServiceAccountTokenProvider,
        StaticTokenProvider, TokenProvider,
    },
};
use tracing::{Instrument as _, error, info, info_span};

use crate::config::{Settings, TokenSource};

mod config;
mod logging;

#[tokio::main]
async fn main() {
    // Initialize logging system
    if let Err(e) = logging::init_logging_from_env() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let server = start().instrument(info_span!("idproxy_startup")).await?;
    server.run_until(shutdown_signal()).await;
    info!("Auth proxy stopped");
    Ok(())
}

async fn start() -> anyhow::Result<Server> {
    let settings = Settings::load()?;
    info!(
        "Proxying to {} with audience {}",
        settings.upstream, settings.audience
    );

    let client = build_http_client();
    let tokens = build_token_provider(&settings.token, client.clone(), &settings.audience)
        .context("Failed to create ID token source")?;

    let forwarder = Forwarder::new(settings.upstream, tokens, client);
    let service =
        ProxyService::new(Arc::new(forwarder)).with_request_timeout(settings.request_timeout);

    let server = Server::new(settings.listen, service)
        .await
        .with_context(|| format!("Failed to start server on {}", settings.listen))?;
    info!("Starting auth proxy on port {}...", settings.listen.port());
    Ok(server)
}

fn build_token_provider(
    source: &TokenSource,
    client: HttpClient,
    audience: &str,
) -> anyhow::Result<Arc<dyn TokenProvider>> {
    let provider: Arc<dyn TokenProvider> = match source {
        TokenSource::Metadata { host: Some(host) } => {
            info!("Using metadata server {} for ID tokens", host);
            Arc::new(CachedTokenProvider::new(MetadataTokenProvider::new(
                client, host, audience,
            )?))
        }
        TokenSource::Metadata { host: None } => {
            info!("Using metadata server for ID tokens");
            Arc::new(CachedTokenProvider::new(MetadataTokenProvider::from_env(
                client, audience,
            )?))
        }
        TokenSource::ServiceAccount { key_file } => {
            info!("Using service account key {} for ID tokens", key_file.display());
            Arc::new(CachedTokenProvider::new(
                ServiceAccountTokenProvider::from_file(client, key_file, audience)?,
            ))
        }
        TokenSource::Static { token } => {
            info!("Using a static ID token");
            Arc::new(StaticTokenProvider::new(token.clone()))
        }
    };
    Ok(provider)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
