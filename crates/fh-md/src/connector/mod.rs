//! Connector jobs: one physical connection's life, from connect to teardown.
//!
//! A [`ConnectorJob`] is the single concrete driver for every transport. It
//! runs as a tokio task that:
//! 1. Prepares and establishes the transport (`Connecting`).
//! 2. Reports `connected()` and reads chunks, bounded by the transport's
//!    heartbeat timeout (`Connected`).
//! 3. Tokenizes the bytes with a per-connection [`RecordStream`] and hands
//!    each record to the callback, inline or through a pipeline thread.
//! 4. On poison, end of input or any I/O failure, ends the transport exactly
//!    once and reports `disconnected()` (`Terminated`).
//!
//! There is no retry inside a job. The owner decides whether to build a new
//! one from the [`ConnectorJobFactory`].
//!
//! ```text
//! Transport::read ──► buf ──► RecordStream::decode ──► callback.received
//!                                                  └─► pipeline ──► callback.received
//! ```

pub mod file_replay;
pub mod network;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fh_core::config::TransportConfig;
use fh_core::record::{RecordStream, RecordStreamFactory};
use fh_core::{ConnectionState, FeedError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use self::file_replay::FileReplayTransport;
use self::network::NetworkTransport;

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 8192;

/// Receives the events of one connector job.
///
/// `received` runs on the connector task (or the pipeline thread when
/// pipelining is on), so implementations should hand off anything slow.
pub trait ConnectorCallback<T>: Send + Sync {
    fn connected(&self);
    fn received(&self, record: T);
    fn disconnected(&self);
}

/// Transport specifics plugged into the generic job driver.
#[async_trait]
pub trait Transport: Send {
    /// Human-readable endpoint (e.g. `"127.0.0.1:9000"` or a file path).
    fn describe(&self) -> String;

    /// Allocate resources ahead of connecting.
    async fn prepare(&mut self) -> Result<(), FeedError> {
        Ok(())
    }

    /// Open the connection. After this, `read` may be called.
    async fn establish(&mut self) -> Result<(), FeedError>;

    /// Read the next chunk. `Ok(0)` means end of input.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FeedError>;

    /// Upper bound on a single read before the peer is considered dead.
    fn read_timeout(&self) -> Option<Duration> {
        None
    }

    /// Release the connection. Close-time errors are logged, never returned.
    async fn end(&mut self);
}

/// Builds a fresh transport for each job.
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Builds a fresh record stream for each job.
pub type StreamFactory<T> = Arc<dyn Fn() -> Box<dyn RecordStream<Record = T>> + Send + Sync>;

/// Build a [`TransportFactory`] from configuration.
pub fn transport_factory(config: &TransportConfig) -> TransportFactory {
    let config = config.clone();
    Arc::new(move || -> Box<dyn Transport> {
        match &config {
            TransportConfig::Network { host, port, .. } => Box::new(NetworkTransport::new(
                host.clone(),
                *port,
                config.connect_timeout(),
                config.heartbeat_timeout(),
            )),
            TransportConfig::File { path, bytes_per_sec } => {
                Box::new(FileReplayTransport::new(path.clone(), *bytes_per_sec))
            }
        }
    })
}

/// Adapt a typed [`RecordStreamFactory`] into a boxed [`StreamFactory`].
pub fn stream_factory<F>(factory: F) -> StreamFactory<<F::Stream as RecordStream>::Record>
where
    F: RecordStreamFactory,
    F::Stream: 'static,
{
    Arc::new(move || -> Box<dyn RecordStream<Record = <F::Stream as RecordStream>::Record>> {
        Box::new(factory.new_stream())
    })
}

/// Pipelined delivery: records cross a bounded channel to a dedicated thread.
///
/// The connector task only tokenizes; record interpretation runs on the
/// pipeline thread, in arrival order. A full channel applies backpressure to
/// the reader rather than dropping records.
#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    pub capacity: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self { capacity: 8192 }
    }
}

// ---------------------------------------------------------------------------
// ConnectorJobFactory
// ---------------------------------------------------------------------------

/// Creates connector jobs bound to one transport configuration and framing.
pub struct ConnectorJobFactory<T> {
    label: String,
    transports: TransportFactory,
    streams: StreamFactory<T>,
}

impl<T> Clone for ConnectorJobFactory<T> {
    fn clone(&self) -> Self {
        Self { label: self.label.clone(), transports: self.transports.clone(), streams: self.streams.clone() }
    }
}

impl<T: Send + 'static> ConnectorJobFactory<T> {
    pub fn new(label: impl Into<String>, transports: TransportFactory, streams: StreamFactory<T>) -> Self {
        Self { label: label.into(), transports, streams }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Create a job and the handle used to supervise it. Nothing runs until
    /// the job is spawned.
    pub fn new_instance(
        &self,
        callback: Arc<dyn ConnectorCallback<T>>,
        pipeline: Option<Pipeline>,
    ) -> (ConnectorJob<T>, ConnectorJobHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let job = ConnectorJob {
            label: self.label.clone(),
            transport: (self.transports)(),
            stream: (self.streams)(),
            callback,
            pipeline,
            shutdown_rx,
            state_tx,
        };
        let handle = ConnectorJobHandle { label: self.label.clone(), shutdown_tx, state_rx };
        (job, handle)
    }
}

// ---------------------------------------------------------------------------
// ConnectorJobHandle
// ---------------------------------------------------------------------------

/// Owner-side control of a running job. Dropping it poisons the job.
pub struct ConnectorJobHandle {
    label: String,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectorJobHandle {
    /// Request cooperative termination. Idempotent.
    pub fn poison(&self) {
        debug!("[{}] poison requested", self.label);
        self.shutdown_tx.send_replace(true);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// A receiver that observes every state transition of the job.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the job has ended its connection and reported `disconnected()`.
    pub async fn join(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|s| s.is_terminal()).await;
    }
}

// ---------------------------------------------------------------------------
// ConnectorJob
// ---------------------------------------------------------------------------

/// Why the read loop stopped.
enum Exit {
    Poisoned,
    EndOfInput,
    Failed(FeedError),
}

/// Where decoded records go.
enum Delivery<T> {
    Inline(Arc<dyn ConnectorCallback<T>>),
    Pipelined { tx: mpsc::Sender<T>, worker: std::thread::JoinHandle<()> },
}

impl<T: Send + 'static> Delivery<T> {
    fn new(
        label: &str,
        callback: &Arc<dyn ConnectorCallback<T>>,
        pipeline: Option<Pipeline>,
    ) -> Result<Self, FeedError> {
        let Some(pipeline) = pipeline else {
            return Ok(Delivery::Inline(callback.clone()));
        };
        let (tx, mut rx) = mpsc::channel::<T>(pipeline.capacity.max(1));
        let callback = callback.clone();
        let worker_label = label.to_string();
        let worker = std::thread::Builder::new().name(format!("{label}-pipeline")).spawn(move || {
            debug!("[{worker_label}] pipeline worker started");
            while let Some(record) = rx.blocking_recv() {
                callback.received(record);
            }
            debug!("[{worker_label}] pipeline worker exited");
        })?;
        Ok(Delivery::Pipelined { tx, worker })
    }

    async fn deliver(&self, record: T) -> Result<(), FeedError> {
        match self {
            Delivery::Inline(cb) => {
                cb.received(record);
                Ok(())
            }
            Delivery::Pipelined { tx, .. } => {
                tx.send(record).await.map_err(|_| FeedError::PipelineClosed)
            }
        }
    }

    /// Let the pipeline drain, then wait for its worker to exit.
    async fn finish(self, label: &str) {
        if let Delivery::Pipelined { tx, worker } = self {
            drop(tx);
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => {}
                _ => error!("[{label}] pipeline worker panicked"),
            }
        }
    }
}

/// One connection's lifecycle, driven by [`ConnectorJob::run`].
pub struct ConnectorJob<T> {
    label: String,
    transport: Box<dyn Transport>,
    stream: Box<dyn RecordStream<Record = T>>,
    callback: Arc<dyn ConnectorCallback<T>>,
    pipeline: Option<Pipeline>,
    shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<T: Send + 'static> ConnectorJob<T> {
    /// Drive the connection to termination. Spawn this on the runtime.
    pub async fn run(self) {
        let ConnectorJob { label, mut transport, mut stream, callback, pipeline, mut shutdown_rx, state_tx } = self;
        let target = transport.describe();

        state_tx.send_replace(ConnectionState::Connecting);
        info!("[{label}] connecting to {target}");

        let established = tokio::select! {
            biased;
            _ = poisoned(&mut shutdown_rx) => Err(None),
            r = open(&mut *transport) => r.map_err(Some),
        };

        let exit = match established {
            Err(None) => Exit::Poisoned,
            Err(Some(e)) => Exit::Failed(e),
            Ok(()) => match Delivery::new(&label, &callback, pipeline) {
                Err(e) => Exit::Failed(e),
                Ok(delivery) => {
                    state_tx.send_replace(ConnectionState::Connected);
                    info!("[{label}] connected to {target}");
                    callback.connected();
                    let exit = read_loop(&label, &mut *transport, &mut *stream, &delivery, &mut shutdown_rx).await;
                    transport.end().await;
                    delivery.finish(&label).await;
                    finish(&label, &target, &exit, &*callback, &state_tx);
                    return;
                }
            },
        };

        transport.end().await;
        finish(&label, &target, &exit, &*callback, &state_tx);
    }
}

async fn open(transport: &mut dyn Transport) -> Result<(), FeedError> {
    transport.prepare().await?;
    transport.establish().await
}

/// Resolves once the job is poisoned or its handle is dropped.
async fn poisoned(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|p| *p).await;
}

async fn read_chunk(transport: &mut dyn Transport, chunk: &mut [u8]) -> Result<usize, FeedError> {
    match transport.read_timeout() {
        Some(timeout) => {
            let read = tokio::time::timeout(timeout, transport.read(chunk)).await;
            match read {
                Ok(r) => r,
                Err(_) => Err(FeedError::ReadTimeout { target: transport.describe(), timeout }),
            }
        }
        None => transport.read(chunk).await,
    }
}

async fn read_loop<T: Send + 'static>(
    label: &str,
    transport: &mut dyn Transport,
    stream: &mut dyn RecordStream<Record = T>,
    delivery: &Delivery<T>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Exit {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut records: u64 = 0;

    loop {
        let read = tokio::select! {
            biased;
            _ = poisoned(shutdown_rx) => return Exit::Poisoned,
            r = read_chunk(transport, &mut chunk) => r,
        };

        match read {
            Ok(0) => {
                loop {
                    match stream.decode_eof(&mut buf) {
                        Ok(Some(record)) => {
                            if let Err(e) = delivery.deliver(record).await {
                                return Exit::Failed(e);
                            }
                            records += 1;
                        }
                        Ok(None) => break,
                        Err(e) => return Exit::Failed(e),
                    }
                }
                debug!("[{label}] end of input after {records} records");
                return Exit::EndOfInput;
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match stream.decode(&mut buf) {
                        Ok(Some(record)) => {
                            if let Err(e) = delivery.deliver(record).await {
                                return Exit::Failed(e);
                            }
                            records += 1;
                        }
                        Ok(None) => break,
                        Err(e) => return Exit::Failed(e),
                    }
                }
            }
            Err(e) => return Exit::Failed(e),
        }
    }
}

fn finish<T>(
    label: &str,
    target: &str,
    exit: &Exit,
    callback: &dyn ConnectorCallback<T>,
    state_tx: &watch::Sender<ConnectionState>,
) {
    match exit {
        Exit::Poisoned => info!("[{label}] poisoned, connection to {target} closed"),
        Exit::EndOfInput => warn!("[{label}] {target} ended the stream"),
        Exit::Failed(e) if e.is_transport() => error!("[{label}] connection to {target} failed: {e}"),
        Exit::Failed(e) => error!("[{label}] job for {target} aborted: {e}"),
    }
    callback.disconnected();
    state_tx.send_replace(ConnectionState::Terminated);
}
