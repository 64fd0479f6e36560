//! Process wiring: two linked broker instances and the GPS feed, each behind
//! its own listener.
//!
//! ```text
//!   :streamer  ──▶ producer-edge ◀══ LocalBridge ══▶ consumer-edge ◀── :viewer
//!   :gps-input ──▶ GpsStore ◀── :gps-output
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::bridge::LocalBridge;
use crate::broker::BrokerInstance;
use crate::config::ServerConfig;
use crate::gps::GpsStore;
use crate::handlers::{GpsState, InstanceState};
use crate::routes::{gps_input_router, gps_output_router, instance_router};

pub const PRODUCER_EDGE: &str = "producer-edge";
pub const CONSUMER_EDGE: &str = "consumer-edge";

/// Addresses actually bound, which differ from the config for port 0.
#[derive(Debug, Clone, Copy)]
pub struct BoundAddrs {
    pub streamer: SocketAddr,
    pub viewer: SocketAddr,
    pub gps_input: SocketAddr,
    pub gps_output: SocketAddr,
}

pub struct Server {
    producer_edge: Arc<BrokerInstance>,
    consumer_edge: Arc<BrokerInstance>,
    gps: Arc<GpsStore>,
    listeners: [TcpListener; 4],
    addrs: BoundAddrs,
    metrics: Option<PrometheusHandle>,
}

impl Server {
    /// Build both instances, link them, and bind every listener.
    pub async fn bind(config: &ServerConfig, metrics: Option<PrometheusHandle>) -> Result<Self> {
        let producer_edge = Arc::new(BrokerInstance::new(PRODUCER_EDGE, config.collision_policy));
        let consumer_edge = Arc::new(BrokerInstance::new(CONSUMER_EDGE, config.collision_policy));
        LocalBridge::link(&producer_edge, &consumer_edge);

        let gps = Arc::new(
            GpsStore::new(config.gps_history_capacity).context("invalid gps history capacity")?,
        );

        let streamer = bind(config.streamer_addr(), "streamer").await?;
        let viewer = bind(config.viewer_addr(), "viewer").await?;
        let gps_input = bind(config.gps_input_addr(), "gps input").await?;
        let gps_output = bind(config.gps_output_addr(), "gps output").await?;

        let addrs = BoundAddrs {
            streamer: streamer.local_addr()?,
            viewer: viewer.local_addr()?,
            gps_input: gps_input.local_addr()?,
            gps_output: gps_output.local_addr()?,
        };

        Ok(Self {
            producer_edge,
            consumer_edge,
            gps,
            listeners: [streamer, viewer, gps_input, gps_output],
            addrs,
            metrics,
        })
    }

    pub fn addrs(&self) -> BoundAddrs {
        self.addrs
    }

    pub fn producer_edge(&self) -> Arc<BrokerInstance> {
        self.producer_edge.clone()
    }

    pub fn consumer_edge(&self) -> Arc<BrokerInstance> {
        self.consumer_edge.clone()
    }

    /// Serve until `shutdown` resolves, then stop accepting on every listener.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            producer_edge,
            consumer_edge,
            gps,
            listeners: [streamer, viewer, gps_input, gps_output],
            addrs,
            metrics,
        } = self;

        let streamer_app = instance_router(InstanceState {
            broker: producer_edge.clone(),
            metrics: metrics.clone(),
        });
        let viewer_app = instance_router(InstanceState {
            broker: consumer_edge.clone(),
            metrics,
        });
        let gps_input_app = gps_input_router(GpsState {
            store: gps.clone(),
            port: addrs.gps_input.port(),
            label: "GPS Input Server",
        });
        let gps_output_app = gps_output_router(GpsState {
            store: gps,
            port: addrs.gps_output.port(),
            label: "GPS Output Server",
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = shutdown_tx.send(true);
        });

        info!(addr = %addrs.streamer, instance = PRODUCER_EDGE, "streamer listener ready");
        info!(addr = %addrs.viewer, instance = CONSUMER_EDGE, "viewer listener ready");
        info!(addr = %addrs.gps_input, "gps input listener ready");
        info!(addr = %addrs.gps_output, "gps output listener ready");

        tokio::try_join!(
            serve_one(streamer, streamer_app, shutdown_rx.clone(), "streamer"),
            serve_one(viewer, viewer_app, shutdown_rx.clone(), "viewer"),
            serve_one(gps_input, gps_input_app, shutdown_rx.clone(), "gps input"),
            serve_one(gps_output, gps_output_app, shutdown_rx, "gps output"),
        )?;

        producer_edge.detach_bridge();
        consumer_edge.detach_bridge();
        Ok(())
    }
}

async fn bind(addr: SocketAddr, name: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {name} listener on {addr}"))
}

async fn serve_one(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
    name: &'static str,
) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .with_context(|| format!("{name} listener shut down with error"))
}

/// Full server lifecycle for the binary: serve until ctrl-c, then linger for
/// the configured grace period.
pub async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let server = Server::bind(&config, Some(metrics)).await?;
    server.serve(shutdown_signal()).await?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

