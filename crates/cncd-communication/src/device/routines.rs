//! Sender and receiver routines of a live connection

use cncd_core::{Error, HookRegistry, ProtocolError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use super::{raised, Counters, LineQueue};
use crate::firmware::FirmwareDialect;
use crate::transport::{LineWriter, LinkReporter};

/// Spawn a routine whose failure is fatal to the connection.
///
/// An error or panic is logged and reported as loss of link; cancellation
/// through the returned handle is silent.
pub(crate) fn spawn_routine<F>(
    name: &'static str,
    device: String,
    reporter: LinkReporter,
    routine: F,
) -> AbortHandle
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let task = tokio::spawn(routine);
    let abort = task.abort_handle();
    tokio::spawn(async move {
        let cause = match task.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{} routine failed: {}", name, e),
            Err(e) if e.is_cancelled() => return,
            Err(e) => format!("{} routine panicked: {}", name, e),
        };
        if !reporter.is_armed() {
            // Link already closing
            tracing::debug!(device = %device, "{}", cause);
            return;
        }
        tracing::error!(device = %device, "{}", cause);
        reporter.report(cause);
    });
    abort
}

pub(crate) struct SenderCtx {
    pub device: String,
    pub outbound: Arc<LineQueue>,
    pub pending: Arc<LineQueue>,
    pub writer: LineWriter,
    pub gate: watch::Receiver<bool>,
    pub panic: watch::Receiver<bool>,
    pub alive: watch::Receiver<bool>,
    pub counters: Arc<Counters>,
}

/// Move lines from the outbound queue to the wire, one at a time.
///
/// A line flushed by `stop` or `abort` while held here is dropped.
pub(crate) async fn sender(mut ctx: SenderCtx) -> Result<()> {
    loop {
        let (line, epoch) = ctx.outbound.pop_tagged().await;
        let flushed = |ctx: &SenderCtx| ctx.outbound.epoch() != epoch;

        // Checked once per line: pausing never splits a line
        if !raised(&mut ctx.gate).await {
            return Err(Error::other("resume gate dropped"));
        }

        if !*ctx.panic.borrow() {
            // Hold the first send until the device has said something
            tokio::select! {
                alive = raised(&mut ctx.alive) => {
                    if !alive {
                        return Err(Error::other("alive signal dropped"));
                    }
                }
                _ = raised(&mut ctx.panic) => {}
            }
        }

        let mut windowed = false;
        if !flushed(&ctx) && !*ctx.panic.borrow() {
            // Blocks while the firmware buffer is full, unless an abort
            // takes the window out of play
            tokio::select! {
                biased;
                _ = raised(&mut ctx.panic) => {}
                _ = ctx.pending.push(line.clone()) => windowed = true,
            }
        }

        if flushed(&ctx) {
            if windowed {
                ctx.pending.try_pop();
            }
            tracing::debug!(device = %ctx.device, "Dropped flushed line: {}", line);
            ctx.outbound.task_done();
            continue;
        }

        if !ctx.writer.write(format!("{}\n", line)) {
            return Err(Error::other("transport writer closed"));
        }
        ctx.counters.sent();
        tracing::debug!(device = %ctx.device, "TX: {}", line);
        ctx.outbound.task_done();
    }
}

pub(crate) struct ReceiverCtx {
    pub device: String,
    pub dialect: FirmwareDialect,
    pub inbound: mpsc::Receiver<String>,
    pub pending: Arc<LineQueue>,
    pub alive: watch::Sender<bool>,
    pub hooks: Arc<HookRegistry>,
    pub counters: Arc<Counters>,
}

/// Classify received lines and release flow-control slots.
pub(crate) async fn receiver(mut ctx: ReceiverCtx) -> Result<()> {
    while let Some(raw) = ctx.inbound.recv().await {
        ctx.alive.send_replace(true);

        let line = ctx.dialect.strip_prompt(&raw).trim();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(device = %ctx.device, "RX: {}", line);
        ctx.hooks.rx(&ctx.device, line).await;

        if ctx.dialect.is_ack(line) {
            ctx.counters.acknowledged();
            if ctx.pending.try_pop().is_none() {
                let err = ProtocolError::UnsolicitedAck {
                    line: line.to_string(),
                };
                tracing::debug!(device = %ctx.device, "{}", err);
            }
        } else if ctx.dialect.is_error(line) {
            ctx.counters.error();
            let err = ProtocolError::FirmwareError {
                line: line.to_string(),
            };
            tracing::warn!(device = %ctx.device, "{}", err);
            // No retransmission; the slot is freed so streaming continues
            ctx.pending.try_pop();
        } else {
            tracing::info!(device = %ctx.device, "{}", line);
        }
    }
    Err(Error::other("inbound line channel closed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Harness {
        outbound: Arc<LineQueue>,
        pending: Arc<LineQueue>,
        written: mpsc::UnboundedReceiver<String>,
        gate: watch::Sender<bool>,
        panic: watch::Sender<bool>,
        alive: watch::Sender<bool>,
    }

    fn spawn_sender(depth: usize) -> Harness {
        let (tx, written) = mpsc::unbounded_channel();
        let (gate, gate_rx) = watch::channel(true);
        let (panic, panic_rx) = watch::channel(false);
        let (alive, alive_rx) = watch::channel(false);
        let outbound = Arc::new(LineQueue::new(1));
        let pending = Arc::new(LineQueue::new(depth));
        tokio::spawn(sender(SenderCtx {
            device: "test".to_string(),
            outbound: outbound.clone(),
            pending: pending.clone(),
            writer: LineWriter::new(tx),
            gate: gate_rx,
            panic: panic_rx,
            alive: alive_rx,
            counters: Arc::new(Counters::default()),
        }));
        Harness {
            outbound,
            pending,
            written,
            gate,
            panic,
            alive,
        }
    }

    async fn quiet(written: &mut mpsc::UnboundedReceiver<String>) -> bool {
        tokio::time::timeout(Duration::from_millis(30), written.recv())
            .await
            .is_err()
    }

    #[tokio::test]
    async fn test_sender_waits_for_alive() {
        let mut h = spawn_sender(1);
        h.outbound.push("G28".to_string()).await;
        assert!(quiet(&mut h.written).await);

        h.alive.send_replace(true);
        assert_eq!(h.written.recv().await.unwrap(), "G28\n");
        assert_eq!(h.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_sender_respects_window() {
        let mut h = spawn_sender(2);
        h.alive.send_replace(true);
        for line in ["G1 X1", "G1 X2", "G1 X3"] {
            h.outbound.push(line.to_string()).await;
        }
        assert_eq!(h.written.recv().await.unwrap(), "G1 X1\n");
        assert_eq!(h.written.recv().await.unwrap(), "G1 X2\n");
        assert!(quiet(&mut h.written).await);

        h.pending.try_pop();
        assert_eq!(h.written.recv().await.unwrap(), "G1 X3\n");
    }

    #[tokio::test]
    async fn test_sender_holds_at_gate() {
        let mut h = spawn_sender(1);
        h.alive.send_replace(true);
        h.gate.send_replace(false);
        h.outbound.push("G28".to_string()).await;
        assert!(quiet(&mut h.written).await);

        h.gate.send_replace(true);
        assert_eq!(h.written.recv().await.unwrap(), "G28\n");
    }

    #[tokio::test]
    async fn test_panic_bypasses_window_and_alive() {
        let mut h = spawn_sender(1);
        h.panic.send_replace(true);
        h.outbound.push("M112".to_string()).await;
        assert_eq!(h.written.recv().await.unwrap(), "M112\n");
        assert!(h.pending.is_empty());
        h.outbound.join().await;
    }

    #[tokio::test]
    async fn test_flushed_line_is_dropped() {
        let mut h = spawn_sender(1);
        h.alive.send_replace(true);
        h.outbound.push("G1 X1".to_string()).await;
        assert_eq!(h.written.recv().await.unwrap(), "G1 X1\n");

        // Held by the sender behind the full window
        h.outbound.push("G1 X2".to_string()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.outbound.drain();
        h.outbound.push("M104 S0".to_string()).await;

        h.pending.try_pop();
        assert_eq!(h.written.recv().await.unwrap(), "M104 S0\n");
        assert_eq!(h.pending.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panic_releases_line_behind_full_window() {
        let mut h = spawn_sender(1);
        h.alive.send_replace(true);
        h.outbound.push("G1 X1".to_string()).await;
        assert_eq!(h.written.recv().await.unwrap(), "G1 X1\n");

        // Parked in the window push, which is never acknowledged
        h.outbound.push("G1 X2".to_string()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.outbound.drain();
        h.panic.send_replace(true);
        h.outbound.push("M112".to_string()).await;

        assert_eq!(h.written.recv().await.unwrap(), "M112\n");
        tokio::time::timeout(Duration::from_secs(1), h.outbound.join())
            .await
            .unwrap();
        assert_eq!(h.pending.drain(), vec!["G1 X1".to_string()]);
    }

    #[tokio::test]
    async fn test_receiver_frees_slots() {
        let (inbound_tx, inbound) = mpsc::channel(8);
        let (alive, mut alive_rx) = watch::channel(false);
        let pending = Arc::new(LineQueue::new(10));
        let counters = Arc::new(Counters::default());
        for line in ["a", "b", "c"] {
            pending.push(line.to_string()).await;
        }

        let task = tokio::spawn(receiver(ReceiverCtx {
            device: "test".to_string(),
            dialect: FirmwareDialect::smoothie(),
            inbound,
            pending: pending.clone(),
            alive,
            hooks: Arc::new(HookRegistry::new()),
            counters: counters.clone(),
        }));

        for line in ["Smoothie command shell", "> ok", "!! halted", "ok"] {
            inbound_tx.send(line.to_string()).await.unwrap();
        }
        drop(inbound_tx);

        assert!(task.await.unwrap().is_err());
        assert!(*alive_rx.borrow_and_update());
        assert!(pending.is_empty());
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.acknowledged, 2);
        assert_eq!(snapshot.errors, 1);
    }
}
