use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub struct Telemetry {
    metrics_handle: PrometheusHandle,
}

impl Telemetry {
    /// Install the Prometheus recorder and the fmt subscriber. `RUST_LOG`
    /// overrides the default `info` filter.
    pub fn init() -> Result<Self> {
        let metrics_handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus metrics recorder")?;
        describe_metrics();

        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        Ok(Self { metrics_handle })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }
}

fn describe_metrics() {
    describe_counter!(
        "beach_ring_connections_total",
        "Websocket connections accepted"
    );
    describe_gauge!(
        "beach_ring_connections_active",
        "Websocket connections currently open"
    );
    describe_counter!(
        "beach_ring_registrations_total",
        "Successful register actions"
    );
    describe_counter!(
        "beach_ring_messages_routed_total",
        "Messages handed to a target connection"
    );
    describe_counter!(
        "beach_ring_routing_misses_total",
        "Messages addressed to an identity with no live connection"
    );
    describe_counter!(
        "beach_ring_decode_failures_total",
        "Sessions ended by an undecodable frame"
    );
    describe_counter!(
        "beach_ring_upgrade_failures_total",
        "Websocket upgrades that did not complete"
    );
}
