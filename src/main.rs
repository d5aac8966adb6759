use std::sync::Arc;

use tracing::info;

use swarmgate::config::Config;
use swarmgate::irc::bridge::{NoopBridge, OutboundBridge, RedisStreamBridge};
use swarmgate::irc::identity::StaticIdentities;
use swarmgate::irc::sanitize::MarkupSanitizer;
use swarmgate::irc::server::Gateway;
use swarmgate::irc::session;
use swarmgate::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env()?;
    info!(server = %config.gateway.server_name, network = %config.gateway.network, "swarmgate starting");

    // Recorder first so the gauges set during startup are captured.
    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let identities = match &config.agents_file {
        Some(path) => StaticIdentities::from_file(path)?,
        None => {
            info!("SWARM_AGENTS_FILE not set, no agent can authenticate until identities are added");
            StaticIdentities::default()
        }
    };

    let bridge: Arc<dyn OutboundBridge> = match &config.redis_url {
        Some(url) => {
            info!(prefix = %config.bridge_stream_prefix, "bridging channel traffic to redis streams");
            Arc::new(RedisStreamBridge::new(url, &config.bridge_stream_prefix)?)
        }
        None => Arc::new(NoopBridge),
    };

    let gateway = Gateway::new(
        config.gateway.clone(),
        Arc::new(identities),
        Arc::new(MarkupSanitizer),
        bridge,
    );

    if let Some(bind) = &config.irc_bind {
        let listener = tokio::net::TcpListener::bind(bind).await?;
        info!("line protocol listening on {bind}");
        let gateway = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = session::accept_tcp(listener, gateway).await {
                tracing::error!("tcp listener failed: {e}");
            }
        });
    }

    let state = AppState {
        gateway,
        prometheus: Some(prometheus),
    };
    web::serve(&config.web_addr, state).await
}
