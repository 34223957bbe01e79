//! Device state machine and public operations

use cncd_core::{keys, Error, HookRegistry, OperationConflict, Result, StatusStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use super::job::{self, JobCtx};
use super::routines::{self, ReceiverCtx, SenderCtx};
use super::{raised, Counters, DeviceConfig, DeviceState, LineCounters, LineQueue};
use crate::firmware::FirmwareDialect;
use crate::transport::{Connection, Connector, LinkReporter, LinkSink, INBOUND_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Aborting,
}

/// Everything that lives exactly as long as one connection
struct Link {
    id: u64,
    connection: Connection,
    outbound: Arc<LineQueue>,
    pending: Arc<LineQueue>,
    closed: watch::Sender<bool>,
    routines: Vec<AbortHandle>,
}

/// Handles to a live link usable without holding the link lock
struct LiveLink {
    id: u64,
    outbound: Arc<LineQueue>,
    pending: Arc<LineQueue>,
    closed: watch::Receiver<bool>,
}

struct JobHandle {
    id: u64,
    cancel: watch::Sender<bool>,
    done: watch::Receiver<bool>,
}

struct DeviceInner {
    handle: String,
    port: String,
    dialect: FirmwareDialect,
    connector: Arc<dyn Connector>,
    hooks: Arc<HookRegistry>,
    status: Arc<dyn StatusStore>,
    gate: watch::Sender<bool>,
    panic: watch::Sender<bool>,
    link: tokio::sync::Mutex<Option<Link>>,
    job: parking_lot::Mutex<Option<JobHandle>>,
    selected: parking_lot::Mutex<Option<String>>,
    phase: parking_lot::Mutex<Phase>,
    counters: Arc<Counters>,
    next_id: AtomicU64,
}

/// A configured machine and its communication engine.
///
/// Cheap to clone; clones share the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(
        config: DeviceConfig,
        connector: Arc<dyn Connector>,
        hooks: Arc<HookRegistry>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        let dialect = FirmwareDialect::resolve(&config.firmware);
        Self::with_dialect(config, dialect, connector, hooks, status)
    }

    /// Create a device with an explicit dialect, ignoring `config.firmware`
    pub fn with_dialect(
        config: DeviceConfig,
        dialect: FirmwareDialect,
        connector: Arc<dyn Connector>,
        hooks: Arc<HookRegistry>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        let (gate, _) = watch::channel(true);
        let (panic, _) = watch::channel(false);

        status.update(&config.handle, keys::CONNECTED, false.into());
        status.update(&config.handle, keys::IDLE, true.into());
        status.update(&config.handle, keys::PAUSED, false.into());
        tracing::info!(
            "Added device '{}' on {} ({} firmware)",
            config.handle,
            config.port,
            dialect.kind()
        );

        Self {
            inner: Arc::new(DeviceInner {
                handle: config.handle,
                port: config.port,
                dialect,
                connector,
                hooks,
                status,
                gate,
                panic,
                link: tokio::sync::Mutex::new(None),
                job: parking_lot::Mutex::new(None),
                selected: parking_lot::Mutex::new(None),
                phase: parking_lot::Mutex::new(Phase::Disconnected),
                counters: Arc::new(Counters::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn handle(&self) -> &str {
        &self.inner.handle
    }

    pub fn port(&self) -> &str {
        &self.inner.port
    }

    pub fn dialect(&self) -> &FirmwareDialect {
        &self.inner.dialect
    }

    pub fn state(&self) -> DeviceState {
        match *self.inner.phase.lock() {
            Phase::Disconnected => DeviceState::Disconnected,
            Phase::Connecting => DeviceState::Connecting,
            Phase::Aborting => DeviceState::Aborting,
            Phase::Connected if !self.is_printing() => DeviceState::Idle,
            Phase::Connected if *self.inner.gate.borrow() => DeviceState::Running,
            Phase::Connected => DeviceState::Paused,
        }
    }

    pub fn is_printing(&self) -> bool {
        self.inner.job.lock().is_some()
    }

    /// Counters of the current (or last) connection
    pub fn counters(&self) -> LineCounters {
        self.inner.counters.snapshot()
    }

    /// The staged filename, if any
    pub fn selected(&self) -> Option<String> {
        self.inner.selected.lock().clone()
    }

    /// Open the transport and start the sender and receiver routines.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let mut slot = inner.link.lock().await;
        if slot.is_some() {
            return Err(OperationConflict::AlreadyConnected {
                device: inner.handle.clone(),
            }
            .into());
        }
        self.set_phase(Phase::Connecting);

        let (reporter, lost) = LinkReporter::new();
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let sink = LinkSink {
            inbound: inbound_tx,
            reporter: reporter.clone(),
        };
        let connection = match inner.connector.open(&inner.port, sink).await {
            Ok(connection) => connection,
            Err(e) => {
                self.set_phase(Phase::Disconnected);
                tracing::error!(device = %inner.handle, "Unable to open {}: {}", inner.port, e);
                return Err(e.into());
            }
        };

        inner.counters.reset();
        inner.panic.send_replace(false);
        inner.gate.send_replace(true);

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let outbound = Arc::new(LineQueue::new(1));
        let pending = Arc::new(LineQueue::new(inner.dialect.buffer_depth()));
        let (alive, alive_rx) = watch::channel(false);
        let (closed, _) = watch::channel(false);

        let sender = routines::spawn_routine(
            "sender",
            inner.handle.clone(),
            reporter.clone(),
            routines::sender(SenderCtx {
                device: inner.handle.clone(),
                outbound: outbound.clone(),
                pending: pending.clone(),
                writer: connection.writer(),
                gate: inner.gate.subscribe(),
                panic: inner.panic.subscribe(),
                alive: alive_rx,
                counters: inner.counters.clone(),
            }),
        );
        let receiver = routines::spawn_routine(
            "receiver",
            inner.handle.clone(),
            reporter.clone(),
            routines::receiver(ReceiverCtx {
                device: inner.handle.clone(),
                dialect: inner.dialect.clone(),
                inbound,
                pending: pending.clone(),
                alive,
                hooks: inner.hooks.clone(),
                counters: inner.counters.clone(),
            }),
        );

        tracing::info!(device = %inner.handle, "Connected via {}", connection.description());
        *slot = Some(Link {
            id,
            connection,
            outbound,
            pending,
            closed,
            routines: vec![sender, receiver],
        });
        drop(slot);

        self.watch_link(id, lost);
        self.set_phase(Phase::Connected);
        inner.status.update(&inner.handle, keys::CONNECTED, true.into());
        inner
            .status
            .update(&inner.handle, keys::IDLE, (!self.is_printing()).into());
        inner.status.update(&inner.handle, keys::PAUSED, false.into());
        inner.hooks.connect_done(&inner.handle).await;
        Ok(())
    }

    /// Stop the routines and close the transport.
    pub async fn disconnect(&self) -> Result<()> {
        self.teardown(None, "disconnect requested").await
    }

    /// Stage a file for a later `start_selected`
    pub fn select(&self, filename: &str) {
        *self.inner.selected.lock() = Some(filename.to_string());
        self.inner
            .status
            .update(&self.inner.handle, keys::SELECTED, filename.into());
        tracing::info!(device = %self.inner.handle, "Selected {}", filename);
    }

    /// Stream `filename` to the device.
    pub async fn start(&self, filename: &str) -> Result<()> {
        let inner = &self.inner;
        // Held until the job is registered so a teardown either precedes
        // the start or finds the job and cancels it
        let link = inner.link.lock().await;
        let live = self.live_from(&link)?;

        let mut slot = inner.job.lock();
        if slot.is_some() {
            return Err(OperationConflict::JobActive {
                device: inner.handle.clone(),
            }
            .into());
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancel_rx) = watch::channel(false);
        let (done_tx, done) = watch::channel(false);
        *slot = Some(JobHandle { id, cancel, done });
        inner.status.update(&inner.handle, keys::IDLE, false.into());

        let reporter = self.reporter_for(live.id);
        let ctx = JobCtx {
            device: inner.handle.clone(),
            filename: filename.to_string(),
            outbound: live.outbound,
            cancel: cancel_rx,
            closed: live.closed,
            hooks: inner.hooks.clone(),
            reporter,
        };
        drop(slot);
        drop(link);
        let device = self.clone();
        tokio::spawn(async move {
            job::run(ctx).await;
            device.finish_job(id);
            done_tx.send_replace(true);
        });
        Ok(())
    }

    /// Stream the staged file.
    pub async fn start_selected(&self) -> Result<()> {
        let filename = self.selected().ok_or_else(|| OperationConflict::NoFileSelected {
            device: self.inner.handle.clone(),
        })?;
        self.start(&filename).await
    }

    /// Graceful halt: discard queued file lines, end the job, send the
    /// firmware's stop commands.
    pub async fn stop(&self) -> Result<()> {
        let mut live = self.live().await?;

        self.stop_job().await;
        let discarded = live.outbound.drain();
        self.open_gate();
        tracing::info!(
            device = %self.inner.handle,
            "Stopping, {} queued line(s) discarded",
            discarded.len()
        );

        for command in self.inner.dialect.stop_commands() {
            tokio::select! {
                _ = raised(&mut live.closed) => return Err(self.not_connected()),
                _ = live.outbound.push(command.clone()) => {}
            }
        }
        Ok(())
    }

    /// Emergency halt: flush everything, push the abort commands past the
    /// flow control, then disconnect.
    pub async fn abort(&self) -> Result<()> {
        let mut live = self.live().await?;
        let inner = &self.inner;
        tracing::warn!(device = %inner.handle, "Abort requested");
        self.set_phase(Phase::Aborting);

        // The job goes first so it cannot refill the queues once drained
        self.stop_job().await;
        live.outbound.drain();
        live.pending.drain();

        inner.panic.send_replace(true);
        self.open_gate();

        let outbound = live.outbound.clone();
        let commands = inner.dialect.abort_commands().to_vec();
        let delivered = async move {
            for command in commands {
                outbound.push(command).await;
            }
            outbound.join().await;
        };
        tokio::select! {
            _ = delivered => {}
            _ = raised(&mut live.closed) => {
                tracing::warn!(device = %inner.handle, "Link lost while aborting");
            }
        }
        inner.panic.send_replace(false);

        match self.teardown(Some(live.id), "aborted").await {
            Ok(()) => Ok(()),
            // Already torn down by a concurrent disconnect
            Err(Error::Conflict(OperationConflict::NotConnected { .. })) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Close the resume gate. Takes effect before the next line.
    pub async fn pause(&self) -> Result<()> {
        self.live().await?;
        self.inner.gate.send_replace(false);
        self.inner
            .status
            .update(&self.inner.handle, keys::PAUSED, true.into());
        tracing::info!(device = %self.inner.handle, "Paused");
        Ok(())
    }

    /// Open the resume gate.
    pub async fn resume(&self) -> Result<()> {
        self.live().await?;
        self.open_gate();
        tracing::info!(device = %self.inner.handle, "Resumed");
        Ok(())
    }

    /// Queue one line outside a file job, with the same flow control.
    pub async fn inject(&self, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Err(Error::other("Empty G-code line"));
        }
        let mut live = self.live().await?;
        tokio::select! {
            _ = raised(&mut live.closed) => Err(self.not_connected()),
            _ = live.outbound.push(line.to_string()) => Ok(()),
        }
    }

    fn set_phase(&self, phase: Phase) {
        *self.inner.phase.lock() = phase;
    }

    fn open_gate(&self) {
        self.inner.gate.send_replace(true);
        self.inner
            .status
            .update(&self.inner.handle, keys::PAUSED, false.into());
    }

    fn not_connected(&self) -> Error {
        OperationConflict::NotConnected {
            device: self.inner.handle.clone(),
        }
        .into()
    }

    async fn live(&self) -> Result<LiveLink> {
        let slot = self.inner.link.lock().await;
        self.live_from(&slot)
    }

    fn live_from(&self, slot: &Option<Link>) -> Result<LiveLink> {
        match slot.as_ref() {
            Some(link) => Ok(LiveLink {
                id: link.id,
                outbound: link.outbound.clone(),
                pending: link.pending.clone(),
                closed: link.closed.subscribe(),
            }),
            None => Err(self.not_connected()),
        }
    }

    /// Reporter that tears down link `id` when a job fails
    fn reporter_for(&self, id: u64) -> LinkReporter {
        let (reporter, lost) = LinkReporter::new();
        self.watch_link(id, lost);
        reporter
    }

    /// Tear down link `id` when `lost` fires
    fn watch_link(&self, id: u64, lost: tokio::sync::oneshot::Receiver<String>) {
        let device: Weak<DeviceInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            // Err means the reporter was silenced or dropped
            let Ok(cause) = lost.await else { return };
            let Some(inner) = device.upgrade() else { return };
            let device = Device { inner };
            tracing::warn!(device = %device.inner.handle, "Link lost: {}", cause);
            // Stale reports for an older link are ignored
            let _ = device.teardown(Some(id), &cause).await;
        });
    }

    /// Cancel the active job and wait until it has run its done hook
    async fn stop_job(&self) {
        let mut done = {
            let slot = self.inner.job.lock();
            match slot.as_ref() {
                Some(job) => {
                    job.cancel.send_replace(true);
                    job.done.clone()
                }
                None => return,
            }
        };
        raised(&mut done).await;
    }

    fn finish_job(&self, id: u64) {
        let mut slot = self.inner.job.lock();
        if slot.as_ref().is_some_and(|job| job.id == id) {
            *slot = None;
        }
        drop(slot);
        self.inner
            .status
            .update(&self.inner.handle, keys::IDLE, true.into());
    }

    async fn teardown(&self, expected: Option<u64>, cause: &str) -> Result<()> {
        let inner = &self.inner;
        let link = {
            let mut slot = inner.link.lock().await;
            match slot.as_ref() {
                Some(link) if expected.map_or(true, |id| id == link.id) => slot.take(),
                _ => None,
            }
        };
        let Some(mut link) = link else {
            return Err(self.not_connected());
        };

        // Unblock anything parked on the gate or the queues
        self.open_gate();
        link.closed.send_replace(true);
        self.stop_job().await;

        for routine in link.routines.drain(..) {
            routine.abort();
        }
        link.connection.close();
        inner.panic.send_replace(false);

        self.set_phase(Phase::Disconnected);
        inner.status.update(&inner.handle, keys::CONNECTED, false.into());
        tracing::info!(device = %inner.handle, "Disconnected: {}", cause);
        inner.hooks.disconnect_done(&inner.handle, cause).await;
        Ok(())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.inner.handle)
            .field("port", &self.inner.port)
            .field("firmware", &self.inner.dialect.kind())
            .field("state", &self.state())
            .finish()
    }
}
