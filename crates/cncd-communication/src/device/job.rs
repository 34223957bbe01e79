//! File streaming job

use cncd_core::{Error, HookRegistry, Result};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use super::{raised, LineQueue};
use crate::transport::LinkReporter;

/// Strip a trailing `;` comment and surrounding whitespace.
/// Returns `None` when nothing is left to send.
pub fn strip_comment(line: &str) -> Option<&str> {
    let code = match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let code = code.trim();
    (!code.is_empty()).then_some(code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobEnd {
    Finished(u64),
    Cancelled(u64),
}

pub(crate) struct JobCtx {
    pub device: String,
    pub filename: String,
    pub outbound: Arc<LineQueue>,
    pub cancel: watch::Receiver<bool>,
    /// Raised when the link the job feeds is torn down
    pub closed: watch::Receiver<bool>,
    pub hooks: Arc<HookRegistry>,
    pub reporter: LinkReporter,
}

/// Run a file job to completion or cancellation.
///
/// The done hook always runs. A file that cannot be opened ends the job;
/// any other failure is fatal to the connection.
pub(crate) async fn run(ctx: JobCtx) {
    let JobCtx {
        device,
        filename,
        outbound,
        cancel,
        closed,
        hooks,
        reporter,
    } = ctx;

    let filename = hooks.gcode_open(&device, filename).await;
    match File::open(&filename).await {
        Ok(file) => {
            tracing::info!(device = %device, "Streaming {}", filename);
            let streaming = tokio::spawn(stream(
                device.clone(),
                file,
                outbound,
                cancel,
                closed,
                hooks.clone(),
            ));
            match streaming.await {
                Ok(Ok(JobEnd::Finished(lines))) => {
                    tracing::info!(device = %device, "Finished {} ({} lines)", filename, lines)
                }
                Ok(Ok(JobEnd::Cancelled(lines))) => {
                    tracing::info!(device = %device, "Cancelled {} after {} lines", filename, lines)
                }
                Ok(Err(e)) => {
                    tracing::error!(device = %device, "Job on {} failed: {}", filename, e);
                    reporter.report(format!("job failed: {}", e));
                }
                Err(e) => {
                    tracing::error!(device = %device, "Job on {} crashed: {}", filename, e);
                    reporter.report(format!("job crashed: {}", e));
                }
            }
        }
        Err(e) => {
            tracing::error!(device = %device, "Cannot open {}: {}", filename, e);
        }
    }

    hooks.gcode_done(&device).await;
}

async fn stream(
    device: String,
    file: File,
    outbound: Arc<LineQueue>,
    mut cancel: watch::Receiver<bool>,
    mut closed: watch::Receiver<bool>,
    hooks: Arc<HookRegistry>,
) -> Result<JobEnd> {
    let mut lines = BufReader::new(file).lines();
    let mut sent = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = raised(&mut cancel) => return Ok(JobEnd::Cancelled(sent)),
            next = lines.next_line() => next.map_err(Error::from)?,
        };
        let Some(raw) = next else {
            return Ok(JobEnd::Finished(sent));
        };
        let Some(code) = strip_comment(&raw) else {
            continue;
        };

        let code = hooks.gcode_readline(&device, code.to_string()).await;
        tokio::select! {
            biased;
            _ = raised(&mut cancel) => return Ok(JobEnd::Cancelled(sent)),
            _ = raised(&mut closed) => return Ok(JobEnd::Cancelled(sent)),
            _ = outbound.push(code) => {}
        }
        sent += 1;
    }
}
