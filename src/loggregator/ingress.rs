use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rustls_pemfile::Item;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tonic::codec::ProstCodec;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};

use crate::config::LoggregatorOptions;
use crate::errors::{AppError, AppResult};
use crate::loggregator::proto::{Envelope, EnvelopeBatch, SendResponse, INGRESS_SEND_PATH};

/// Small batches keep latency low; throughput is not the goal here.
pub const BATCH_MAX_SIZE: usize = 100;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// Envelopes buffered before new ones are dropped.
pub const BUFFER_CAPACITY: usize = 10_000;

/// Sink for finished envelopes. Emitting never blocks and never fails from
/// the caller's point of view.
pub trait EnvelopeEmitter: Send + Sync {
    fn emit(&self, envelope: Envelope);
}

/// Delivers one batch to the ingestion endpoint.
#[async_trait]
pub trait BatchTransport: Send + 'static {
    async fn send(&mut self, batch: Vec<Envelope>) -> Result<(), tonic::Status>;
}

/// `loggregator.v2.Ingress/Send` over a tonic channel.
pub struct GrpcTransport {
    grpc: tonic::client::Grpc<Channel>,
}

impl GrpcTransport {
    pub fn new(channel: Channel) -> Self {
        Self {
            grpc: tonic::client::Grpc::new(channel),
        }
    }
}

#[async_trait]
impl BatchTransport for GrpcTransport {
    async fn send(&mut self, batch: Vec<Envelope>) -> Result<(), tonic::Status> {
        self.grpc
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("ingress not ready: {e}")))?;

        let codec: ProstCodec<EnvelopeBatch, SendResponse> = ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(INGRESS_SEND_PATH);

        self.grpc
            .unary(tonic::Request::new(EnvelopeBatch { batch }), path, codec)
            .await?;
        Ok(())
    }
}

/// Batching client shared by every tailer.
pub struct IngressClient {
    tx: mpsc::Sender<Envelope>,
    dropped: AtomicU64,
    stop: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl IngressClient {
    /// Sets up mutual TLS from the configured PEM files and starts the
    /// flusher. The channel connects lazily on the first batch.
    pub fn connect(opts: &LoggregatorOptions) -> AppResult<Self> {
        let tls = load_tls_config(opts)?;
        let uri = endpoint_uri(&opts.endpoint);

        let endpoint = Channel::from_shared(uri).map_err(|e| AppError::InvalidEndpoint {
            endpoint: opts.endpoint.clone(),
            reason: e.to_string(),
        })?;
        let channel = endpoint.tls_config(tls)?.connect_lazy();

        tracing::info!(endpoint = %opts.endpoint, "loggregator ingress client ready");

        Ok(Self::with_transport(
            GrpcTransport::new(channel),
            BATCH_MAX_SIZE,
            FLUSH_INTERVAL,
        ))
    }

    /// Starts a client over any transport; used directly by tests.
    pub fn with_transport<T: BatchTransport>(
        transport: T,
        batch_max_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(BUFFER_CAPACITY);
        let stop = CancellationToken::new();

        let flusher = tokio::spawn(run_flusher(
            rx,
            transport,
            batch_max_size.max(1),
            flush_interval,
            stop.clone(),
        ));

        Self {
            tx,
            dropped: AtomicU64::new(0),
            stop,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    /// Envelopes dropped because the buffer was full or the client stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Flushes everything buffered and stops the flusher.
    pub async fn shutdown(&self) {
        self.stop.cancel();

        let handle = self
            .flusher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "ingress flusher task failed");
            }
        }
    }
}

impl EnvelopeEmitter for IngressClient {
    fn emit(&self, envelope: Envelope) {
        if self.tx.try_send(envelope).is_err() {
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if n.is_power_of_two() {
                tracing::warn!(dropped = n, "ingress buffer full or closed; dropping envelopes");
            }
        }
    }
}

async fn run_flusher<T: BatchTransport>(
    mut rx: mpsc::Receiver<Envelope>,
    mut transport: T,
    batch_max_size: usize,
    flush_interval: Duration,
    stop: CancellationToken,
) {
    let mut batch: Vec<Envelope> = Vec::with_capacity(batch_max_size);
    let mut ticker = time::interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(env) => {
                    batch.push(env);
                    if batch.len() >= batch_max_size {
                        flush(&mut transport, &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&mut transport, &mut batch).await;
                }
            }
        }
    }

    rx.close();
    while let Ok(env) = rx.try_recv() {
        batch.push(env);
        if batch.len() >= batch_max_size {
            flush(&mut transport, &mut batch).await;
        }
    }
    if !batch.is_empty() {
        flush(&mut transport, &mut batch).await;
    }
}

async fn flush<T: BatchTransport>(transport: &mut T, batch: &mut Vec<Envelope>) {
    let n = batch.len();
    let out = std::mem::replace(batch, Vec::with_capacity(n));

    if let Err(status) = transport.send(out).await {
        tracing::warn!(
            envelopes = n,
            code = ?status.code(),
            error = %status.message(),
            "failed to send envelope batch; dropping"
        );
    }
}

/// Loggregator addresses are usually bare `host:port`.
fn endpoint_uri(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

fn load_tls_config(opts: &LoggregatorOptions) -> AppResult<ClientTlsConfig> {
    let ca = read_pem(&opts.ca_path, "CA certificate", is_certificate)?;
    let cert = read_pem(&opts.cert_path, "client certificate", is_certificate)?;
    let key = read_pem(&opts.key_path, "client key", is_private_key)?;

    Ok(ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(ca))
        .identity(Identity::from_pem(cert, key))
        .domain_name(opts.server_name.clone()))
}

/// Reads a PEM file and checks it holds at least one item of the wanted kind.
fn read_pem(path: &Path, what: &str, wanted: fn(&Item) -> bool) -> AppResult<Vec<u8>> {
    let bytes = fs::read(path)
        .map_err(|e| AppError::Tls(format!("cannot read {what} {}: {e}", path.display())))?;

    let items = rustls_pemfile::read_all(&mut BufReader::new(bytes.as_slice()))
        .map_err(|e| AppError::Tls(format!("malformed {what} {}: {e}", path.display())))?;

    if !items.iter().any(wanted) {
        return Err(AppError::Tls(format!(
            "no {what} found in {}",
            path.display()
        )));
    }

    Ok(bytes)
}

fn is_certificate(item: &Item) -> bool {
    matches!(item, Item::X509Certificate(_))
}

fn is_private_key(item: &Item) -> bool {
    matches!(item, Item::RSAKey(_) | Item::PKCS8Key(_) | Item::ECKey(_))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::loggregator::envelope::LoggregatorAppMeta;

    #[derive(Clone, Default)]
    struct RecordingTransport {
        batches: Arc<Mutex<Vec<Vec<Envelope>>>>,
    }

    #[async_trait]
    impl BatchTransport for RecordingTransport {
        async fn send(&mut self, batch: Vec<Envelope>) -> Result<(), tonic::Status> {
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn line(n: usize) -> Envelope {
        LoggregatorAppMeta::default().envelope(format!("line {n}").as_bytes())
    }

    #[tokio::test]
    async fn batches_are_capped_and_flushed_on_shutdown() {
        let transport = RecordingTransport::default();
        let batches = transport.batches.clone();
        let client = IngressClient::with_transport(transport, 100, Duration::from_secs(3600));

        for n in 0..250 {
            client.emit(line(n));
        }
        client.shutdown().await;

        let batches = batches.lock().unwrap();
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 250);
        assert!(batches.iter().all(|b| b.len() <= 100));
        assert_eq!(batches[0][0].log_payload(), Some(&b"line 0"[..]));
        assert_eq!(client.dropped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_is_flushed_by_interval() {
        let transport = RecordingTransport::default();
        let batches = transport.batches.clone();
        let client = IngressClient::with_transport(transport, 100, Duration::from_secs(1));

        client.emit(line(1));
        client.emit(line(2));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        {
            let batches = batches.lock().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), 2);
        }
        client.shutdown().await;
    }

    #[tokio::test]
    async fn emit_after_shutdown_is_dropped() {
        let client = IngressClient::with_transport(
            RecordingTransport::default(),
            10,
            Duration::from_secs(1),
        );
        client.shutdown().await;

        client.emit(line(1));
        assert_eq!(client.dropped(), 1);
    }

    #[test]
    fn bare_endpoint_gets_https_scheme() {
        assert_eq!(endpoint_uri("doppler:8082"), "https://doppler:8082");
        assert_eq!(endpoint_uri("http://local:1"), "http://local:1");
    }

    struct TlsFiles {
        _dir: tempfile::TempDir,
        opts: LoggregatorOptions,
    }

    fn tls_files(key_pem: Option<&str>) -> TlsFiles {
        let dir = tempfile::tempdir().unwrap();
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["metron".to_string()]).unwrap();

        let write = |name: &str, body: &str| -> PathBuf {
            let p = dir.path().join(name);
            fs::write(&p, body).unwrap();
            p
        };
        let key = key_pair.serialize_pem();

        let opts = LoggregatorOptions {
            endpoint: "localhost:3458".to_string(),
            ca_path: write("ca.crt", &cert.pem()),
            cert_path: write("tls.crt", &cert.pem()),
            key_path: write("tls.key", key_pem.unwrap_or(&key)),
            server_name: "metron".to_string(),
        };
        TlsFiles { _dir: dir, opts }
    }

    #[tokio::test]
    async fn connect_accepts_valid_material() {
        let files = tls_files(None);

        let client = IngressClient::connect(&files.opts).expect("valid TLS material");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn connect_rejects_malformed_key() {
        let files = tls_files(Some("not a key"));

        let err = IngressClient::connect(&files.opts).err().expect("must fail");
        assert!(matches!(err, AppError::Tls(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn connect_rejects_missing_ca() {
        let mut files = tls_files(None);
        files.opts.ca_path = files.opts.ca_path.with_file_name("missing.crt");

        let err = IngressClient::connect(&files.opts).err().expect("must fail");
        assert!(matches!(err, AppError::Tls(_)), "got {err:?}");
    }
}
