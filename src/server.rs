//! DNS server setup and lifecycle management.

use std::sync::Arc;
use std::time::Duration;

use hickory_server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::forwarder::Forwarder;
use crate::generator::RecordGenerator;
use crate::handler::DnsHandler;
use crate::metrics;
use crate::records::PublishedRecords;

/// Idle timeout for accepted TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval for emitting snapshot gauges.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Re-run the generator every refresh interval, publishing on success and
/// keeping the previous snapshot on failure. Generation is awaited inline,
/// so ticks never overlap; a tick delayed by a slow generation fires after
/// the previous one completes.
async fn refresh_loop(
    generator: RecordGenerator,
    config: Arc<DnsConfig>,
    records: PublishedRecords,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.refresh_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the startup generation already happened
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let timer = metrics::Timer::start();
                match generator.generate(None, &config).await {
                    Ok(_) if shutdown.is_cancelled() => {
                        debug!("discarding generation finished during shutdown");
                        return;
                    }
                    Ok(snapshot) => {
                        metrics::record_refresh(true, timer.elapsed());
                        metrics::record_snapshot_counts(
                            snapshot.a_count(),
                            snapshot.srv_count(),
                            snapshot.slave_count(),
                        );
                        records.publish(snapshot);
                        metrics::record_generation(records.generation());
                        debug!(generation = records.generation(), "published fresh records");
                    }
                    Err(e) => {
                        metrics::record_refresh(false, timer.elapsed());
                        error!("refresh failed, keeping previous records: {e}");
                    }
                }
            }
            _ = shutdown.cancelled() => {
                debug!("refresh loop shutting down");
                return;
            }
        }
    }
}

/// Periodically emit snapshot gauges.
async fn metrics_loop(records: PublishedRecords, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = records.load();
                metrics::record_snapshot_counts(
                    snapshot.a_count(),
                    snapshot.srv_count(),
                    snapshot.slave_count(),
                );
                metrics::record_generation(records.generation());
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// DNS server projecting Mesos cluster state into a zone.
pub struct DnsServer {
    config: Arc<DnsConfig>,
    records: PublishedRecords,
}

impl DnsServer {
    /// Create a new DNS server with the given (finalized) configuration.
    pub fn new(config: DnsConfig) -> Self {
        Self {
            config: Arc::new(config),
            records: PublishedRecords::new(),
        }
    }

    /// Handle to the published record snapshot.
    pub fn records(&self) -> &PublishedRecords {
        &self.records
    }

    /// Run the DNS server until the shutdown token fires.
    ///
    /// The first generation happens synchronously before any socket is
    /// bound; with no snapshot to serve, a failing first refresh is fatal.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        info!(
            domain = %self.config.domain,
            listener = %self.config.listener,
            port = self.config.port,
            masters = ?self.config.masters,
            "starting mesos-dns server"
        );

        let generator = RecordGenerator::new();
        let snapshot = generator.generate(None, &self.config).await?;
        metrics::record_snapshot_counts(
            snapshot.a_count(),
            snapshot.srv_count(),
            snapshot.slave_count(),
        );
        self.records.publish(snapshot);
        info!(generation = self.records.generation(), "initial records published");

        let forwarder = Forwarder::new(self.config.upstream_addrs());
        let handler = DnsHandler::new(self.config.clone(), self.records.clone(), forwarder)?;
        let mut server = ServerFuture::new(handler);

        let addr = self.config.listen_addr()?;
        let udp_socket = UdpSocket::bind(addr).await?;
        info!(%addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(addr).await?;
        info!(%addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        // child token so the loops also stop when the socket loop exits
        // on its own
        let loop_token = shutdown.child_token();
        let refresh_handle = tokio::spawn(refresh_loop(
            generator,
            self.config.clone(),
            self.records.clone(),
            loop_token.clone(),
        ));
        let metrics_handle = tokio::spawn(metrics_loop(self.records.clone(), loop_token.clone()));

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {e}");
                }
            }
        }

        loop_token.cancel();
        let _ = refresh_handle.await;
        let _ = metrics_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}
