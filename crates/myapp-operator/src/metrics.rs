use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::ErrorCategory;
use crate::store::ObjectKey;

/// Outcome label for the duration histogram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileResult {
    Success,
    Error,
}

impl ReconcileResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileResult::Success => "success",
            ReconcileResult::Error => "error",
        }
    }
}

/// Sink for the reconciler's metric series. Implementations must tolerate
/// concurrent calls from many reconciles.
pub trait ReconcileMetrics: Send + Sync {
    /// Record one finished invocation.
    fn observe_reconcile(&self, result: ReconcileResult, duration_secs: f64);

    /// A MyApp is held by our finalizer. Counting the same key twice is a no-op.
    fn instance_managed(&self, key: &ObjectKey);

    /// A MyApp has been released or is gone. Releasing an unknown key is a no-op.
    fn instance_released(&self, key: &ObjectKey);

    /// Count a failed store operation.
    fn record_error(&self, operation: &str, category: ErrorCategory);
}

/// Prometheus implementation over its own registry.
pub struct PrometheusMetrics {
    registry: Registry,
    reconcile_duration: HistogramVec,
    instances: IntGaugeVec,
    reconcile_errors: IntCounterVec,
    managed: Mutex<HashSet<ObjectKey>>,
}

impl PrometheusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "myapp_reconcile_duration_seconds",
                "Duration of the MyApp reconciliation loop",
            ),
            &["result"],
        )?;
        let instances = IntGaugeVec::new(
            Opts::new(
                "myapp_instances",
                "Number of MyApp instances currently managed by the controller",
            ),
            &["namespace"],
        )?;
        let reconcile_errors = IntCounterVec::new(
            Opts::new(
                "myapp_reconcile_errors_total",
                "Total number of errors encountered during reconciliation",
            ),
            &["kind", "category"],
        )?;

        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(instances.clone()))?;
        registry.register(Box::new(reconcile_errors.clone()))?;

        Ok(Self {
            registry,
            reconcile_duration,
            instances,
            reconcile_errors,
            managed: Mutex::new(HashSet::new()),
        })
    }

    /// Current value of the instance gauge for a namespace.
    pub fn instances(&self, namespace: &str) -> i64 {
        self.instances.with_label_values(&[namespace]).get()
    }

    pub fn error_count(&self, operation: &str, category: ErrorCategory) -> u64 {
        self.reconcile_errors
            .with_label_values(&[operation, category.as_str()])
            .get()
    }

    pub fn reconcile_count(&self, result: ReconcileResult) -> u64 {
        self.reconcile_duration
            .with_label_values(&[result.as_str()])
            .get_sample_count()
    }

    /// Encode all registered metrics as Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {e}"))?;
        Ok(buffer)
    }
}

impl ReconcileMetrics for PrometheusMetrics {
    fn observe_reconcile(&self, result: ReconcileResult, duration_secs: f64) {
        self.reconcile_duration
            .with_label_values(&[result.as_str()])
            .observe(duration_secs);
    }

    fn instance_managed(&self, key: &ObjectKey) {
        if self.managed.lock().insert(key.clone()) {
            self.instances.with_label_values(&[key.namespace.as_str()]).inc();
        }
    }

    fn instance_released(&self, key: &ObjectKey) {
        if self.managed.lock().remove(key) {
            self.instances.with_label_values(&[key.namespace.as_str()]).dec();
        }
    }

    fn record_error(&self, operation: &str, category: ErrorCategory) {
        self.reconcile_errors
            .with_label_values(&[operation, category.as_str()])
            .inc();
    }
}

/// Start the metrics and health HTTP server.
///
/// Serves:
/// - `GET /metrics`: Prometheus metrics
/// - `GET /healthz`: liveness probe (always 200)
/// - `GET /readyz`: readiness probe (always 200)
pub async fn serve(addr: String, metrics: Arc<PrometheusMetrics>) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {addr}");

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = match stream.read(&mut buf).await {
                        Ok(n) => n,
                        Err(_) => return,
                    };
                    let request = String::from_utf8_lossy(&buf[..n]);

                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/");

                    let (status, content_type, body) = route(path, &metrics);

                    let header = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );

                    let _ = stream.write_all(header.as_bytes()).await;
                    let _ = stream.write_all(&body).await;
                });
            }
            Err(e) => {
                error!("Failed to accept metrics connection: {e}");
            }
        }
    }
}

fn route(path: &str, metrics: &PrometheusMetrics) -> (&'static str, &'static str, Vec<u8>) {
    match path {
        "/metrics" => match metrics.encode() {
            Ok(data) => ("200 OK", "text/plain; version=0.0.4; charset=utf-8", data),
            Err(e) => ("500 Internal Server Error", "text/plain", e.into_bytes()),
        },
        "/healthz" | "/readyz" => ("200 OK", "text/plain", b"ok".to_vec()),
        _ => ("404 Not Found", "text/plain", b"not found".to_vec()),
    }
}
