//! RX, TX and decode worker loops
//!
//! Each loop runs on a blocking thread until the shared running flag is
//! cleared. Every iteration runs under `catch_unwind`: errors and panics
//! alike go to the error reporter and the loop carries on. Only a transport
//! that reports itself closed ends a loop early.

use crate::error::LinkError;
use crate::report::ErrorReporter;
use crate::stats::LinkStats;
use crate::transport::Transport;
use frame_bus::FrameBus;
use frame_protocol::FrameDecoder;
use ring_buffer::RingBuffer;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

pub(crate) const RX_WORKER: &str = "rx";
pub(crate) const TX_WORKER: &str = "tx";
pub(crate) const DECODE_WORKER: &str = "decode";

pub(crate) type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

pub(crate) fn lock_transport(transport: &SharedTransport) -> MutexGuard<'_, Box<dyn Transport>> {
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a loop does after one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Everything a worker loop needs, cloned once per worker
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub running: Arc<AtomicBool>,
    pub transport: SharedTransport,
    pub rx_buffer: Arc<RingBuffer<u8>>,
    pub tx_buffer: Arc<RingBuffer<u8>>,
    pub bus: Arc<FrameBus>,
    pub reporter: ErrorReporter,
    pub stats: Arc<LinkStats>,
    pub idle_poll: Duration,
    pub error_backoff: Duration,
    pub tx_chunk_size: usize,
}

impl WorkerContext {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run an operation on the transport if it is still open
    fn with_transport<R>(
        &self,
        op: impl FnOnce(&mut dyn Transport) -> Result<R, LinkError>,
    ) -> Result<R, LinkError> {
        let mut transport = lock_transport(&self.transport);
        if !transport.is_open() {
            return Err(LinkError::TransportClosed);
        }
        op(&mut **transport)
    }

    /// Report an I/O failure and back off; a closed transport stops the loop
    fn handle_io_error(&self, worker: &'static str, error: LinkError) -> Flow {
        let closed = matches!(error, LinkError::TransportClosed);
        self.reporter.report(worker, error);
        if closed {
            return Flow::Stop;
        }
        thread::sleep(self.error_backoff);
        Flow::Continue
    }

    /// Drive `step` until the link stops or it asks to stop
    ///
    /// A panicking step is reported as [`LinkError::WorkerPanicked`] and
    /// retried after the error backoff.
    fn run(&self, worker: &'static str, mut step: impl FnMut() -> Flow) {
        debug!(worker, "Worker started");

        while self.is_running() {
            match panic::catch_unwind(AssertUnwindSafe(&mut step)) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(payload) => {
                    let reason = panic_reason(payload.as_ref());
                    self.reporter
                        .report(worker, LinkError::WorkerPanicked { worker, reason });
                    thread::sleep(self.error_backoff);
                }
            }
        }

        debug!(worker, "Worker stopped");
    }
}

/// Move transport bytes into the inbound buffer
pub(crate) fn rx_loop(ctx: WorkerContext) {
    ctx.run(RX_WORKER, || match ctx.with_transport(|t| t.read_available()) {
        Ok(bytes) if bytes.is_empty() => {
            thread::sleep(ctx.idle_poll);
            Flow::Continue
        }
        Ok(bytes) => {
            let accepted = ctx.rx_buffer.write(&bytes);
            let dropped = bytes.len() - accepted;
            ctx.stats.add_rx(accepted, dropped);
            if dropped > 0 {
                debug!(dropped, "Inbound buffer full, bytes dropped");
            }
            Flow::Continue
        }
        Err(error) => ctx.handle_io_error(RX_WORKER, error),
    });
}

/// Drain the outbound buffer to the transport
pub(crate) fn tx_loop(ctx: WorkerContext) {
    ctx.run(TX_WORKER, || {
        let chunk = ctx.tx_buffer.read(ctx.tx_chunk_size);
        if chunk.is_empty() {
            thread::sleep(ctx.idle_poll);
            return Flow::Continue;
        }

        match ctx.with_transport(|t| t.write(&chunk)) {
            Ok(()) => {
                ctx.stats.add_tx(chunk.len());
                trace!(bytes = chunk.len(), "Chunk transmitted");
                Flow::Continue
            }
            Err(error) => ctx.handle_io_error(TX_WORKER, error),
        }
    });
}

/// Decode inbound bytes and publish every frame on the bus
pub(crate) fn decode_loop(ctx: WorkerContext) {
    let mut decoder = FrameDecoder::new();

    ctx.run(DECODE_WORKER, || {
        match decoder.decode_next(&ctx.rx_buffer) {
            Some(Ok(frame)) => {
                ctx.stats.record_frame(&frame);
                let delivered = ctx.bus.publish(&frame);
                trace!(delivered, frame = %frame, "Frame published");
            }
            Some(Err(error)) => ctx.reporter.report(DECODE_WORKER, error.into()),
            None => thread::sleep(ctx.idle_poll),
        }
        Flow::Continue
    });
}
