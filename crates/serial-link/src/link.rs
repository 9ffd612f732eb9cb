//! Serial link lifecycle

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::report::ErrorReporter;
use crate::stats::{LinkStats, StatsSnapshot};
use crate::transport::{SerialTransport, Transport};
use crate::worker::{
    decode_loop, lock_transport, rx_loop, tx_loop, WorkerContext, DECODE_WORKER, RX_WORKER,
    TX_WORKER,
};
use frame_bus::FrameBus;
use frame_protocol::CommandFrame;
use ring_buffer::RingBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A running connection to the sensor board
///
/// Owns the transport, both byte buffers and the three workers. Decoded
/// frames go to the [`FrameBus`] passed in at start; subscribe buffers to
/// it to receive them.
pub struct SerialLink {
    config: LinkConfig,
    running: Arc<AtomicBool>,
    transport: crate::worker::SharedTransport,
    rx_buffer: Arc<RingBuffer<u8>>,
    tx_buffer: Arc<RingBuffer<u8>>,
    bus: Arc<FrameBus>,
    stats: Arc<LinkStats>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    errors: Option<mpsc::Receiver<LinkError>>,
}

impl SerialLink {
    /// Open the configured serial port and start the workers
    pub fn open(config: LinkConfig, bus: Arc<FrameBus>) -> Result<Self, LinkError> {
        let transport = SerialTransport::open(&config)?;
        Self::start(transport, config, bus)
    }

    /// Start the workers on an already open transport
    ///
    /// Must be called from within a Tokio runtime; workers run on its
    /// blocking pool.
    pub fn start<T>(transport: T, config: LinkConfig, bus: Arc<FrameBus>) -> Result<Self, LinkError>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| LinkError::Runtime(e.to_string()))?;
        if !transport.is_open() {
            return Err(LinkError::TransportClosed);
        }

        let stats = Arc::new(LinkStats::default());
        let (reporter, errors) =
            ErrorReporter::channel(config.error_channel_capacity, Arc::clone(&stats));

        let ctx = WorkerContext {
            running: Arc::new(AtomicBool::new(true)),
            transport: Arc::new(Mutex::new(Box::new(transport) as Box<dyn Transport>)),
            rx_buffer: Arc::new(RingBuffer::new(config.rx_capacity)?),
            tx_buffer: Arc::new(RingBuffer::new(config.tx_capacity)?),
            bus,
            reporter,
            stats,
            idle_poll: config.idle_poll(),
            error_backoff: config.error_backoff(),
            tx_chunk_size: config.tx_chunk_size,
        };

        let loops: [(&'static str, fn(WorkerContext)); 3] = [
            (RX_WORKER, rx_loop),
            (TX_WORKER, tx_loop),
            (DECODE_WORKER, decode_loop),
        ];
        let workers = loops
            .into_iter()
            .map(|(name, run)| {
                let ctx = ctx.clone();
                (name, runtime.spawn_blocking(move || run(ctx)))
            })
            .collect();

        info!(
            port = %config.port,
            baud = config.baud_rate,
            rx_capacity = config.rx_capacity,
            tx_capacity = config.tx_capacity,
            "Serial link started"
        );

        Ok(Self {
            config,
            running: ctx.running,
            transport: ctx.transport,
            rx_buffer: ctx.rx_buffer,
            tx_buffer: ctx.tx_buffer,
            bus: ctx.bus,
            stats: ctx.stats,
            workers,
            errors: Some(errors),
        })
    }

    /// Queue raw bytes for transmission
    ///
    /// Returns how many bytes were queued; fewer than `data.len()` means
    /// the outbound buffer filled up and the rest was dropped.
    pub fn send(&self, data: &[u8]) -> Result<usize, LinkError> {
        if !self.is_running() {
            return Err(LinkError::NotRunning);
        }
        let queued = self.tx_buffer.write(data);
        if queued < data.len() {
            debug!(queued, requested = data.len(), "Outbound buffer full, send truncated");
        }
        Ok(queued)
    }

    /// Queue a command frame, whole or not at all
    pub fn send_command(&self, command: &CommandFrame) -> Result<(), LinkError> {
        if !self.is_running() {
            return Err(LinkError::NotRunning);
        }
        let bytes = command.to_bytes();
        if !self.tx_buffer.try_write_all(&bytes) {
            return Err(LinkError::OutboundFull {
                needed: bytes.len(),
                free: self.tx_buffer.free_space(),
            });
        }
        debug!(command = ?command.command_type, bytes = bytes.len(), "Command queued");
        Ok(())
    }

    /// True while the workers run and the transport is open
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && lock_transport(&self.transport).is_open()
    }

    pub fn bus(&self) -> &Arc<FrameBus> {
        &self.bus
    }

    pub fn rx_buffer(&self) -> &Arc<RingBuffer<u8>> {
        &self.rx_buffer
    }

    pub fn tx_buffer(&self) -> &Arc<RingBuffer<u8>> {
        &self.tx_buffer
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Take the receiving end of the error channel
    ///
    /// Only the first call returns it.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<LinkError>> {
        self.errors.take()
    }

    /// Stop the workers, close the transport and clear both buffers
    ///
    /// Each worker gets the configured shutdown timeout to finish. The
    /// transport is closed and the buffers cleared even if one does not,
    /// in which case the first such failure is returned.
    pub async fn shutdown(mut self) -> Result<(), LinkError> {
        info!("Shutting down serial link");
        self.running.store(false, Ordering::Release);

        let timeout = self.config.shutdown_timeout();
        let mut first_error = None;
        for (worker, handle) in self.workers.drain(..) {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => debug!(worker, "Worker stopped"),
                Ok(Err(join_error)) => {
                    warn!(worker, error = %join_error, "Worker panicked");
                    first_error.get_or_insert(LinkError::WorkerPanicked {
                        worker,
                        reason: join_error.to_string(),
                    });
                }
                Err(_) => {
                    warn!(worker, timeout_ms = self.config.shutdown_timeout_ms, "Worker did not stop in time");
                    first_error.get_or_insert(LinkError::ShutdownTimeout {
                        worker,
                        timeout_ms: self.config.shutdown_timeout_ms,
                    });
                }
            }
        }

        lock_transport(&self.transport).close();
        self.rx_buffer.clear();
        self.tx_buffer.clear();

        let stats = self.stats.snapshot();
        info!(
            rx_bytes = stats.rx_bytes,
            tx_bytes = stats.tx_bytes,
            frames = stats.frames_decoded(),
            errors = stats.errors(),
            "Serial link stopped"
        );

        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        // Workers notice within one poll interval and release their clones
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockHandle, MockTransport};
    use frame_bus::FrameBuffer;
    use frame_protocol::{AckFrame, ChannelData, ControlParams, DataFrame, Frame, FrameError};
    use std::time::Duration;

    fn test_config() -> LinkConfig {
        LinkConfig {
            idle_poll_us: 200,
            error_backoff_ms: 5,
            shutdown_timeout_ms: 2000,
            ..LinkConfig::default()
        }
    }

    fn data_frame(seq: u16) -> DataFrame {
        DataFrame {
            channels: [ChannelData::new(seq as i16, 1000, -1000, 50, 60); 4],
            master_seq: seq,
            slave_seq: seq.wrapping_add(1),
            device_state: 1,
        }
    }

    fn start_link() -> (SerialLink, MockHandle, Arc<FrameBuffer>) {
        let (transport, handle) = MockTransport::new();
        let bus = Arc::new(FrameBus::new());
        let frames = Arc::new(RingBuffer::new(64).unwrap());
        bus.subscribe(&frames);
        let link = SerialLink::start(transport, test_config(), bus).unwrap();
        (link, handle, frames)
    }

    async fn wait_until(condition: impl Fn() -> bool) -> bool {
        for _ in 0..400 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    async fn collect_frames(frames: &FrameBuffer, count: usize) -> Vec<Frame> {
        let mut received = Vec::new();
        for _ in 0..400 {
            received.extend(frames.read_all());
            if received.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        received
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frames_reach_subscribers_in_order() {
        let (link, handle, frames) = start_link();

        let ack = AckFrame::new(0x01, vec![0x10, 0x20]).unwrap();
        let mut stream = vec![0x00, 0x42];
        stream.extend(data_frame(1).to_bytes());
        stream.extend(ack.to_bytes());
        stream.extend(data_frame(2).to_bytes());
        for chunk in stream.chunks(7) {
            handle.inject(chunk);
        }

        let received = collect_frames(&frames, 3).await;
        assert_eq!(
            received,
            vec![
                Frame::Data(data_frame(1)),
                Frame::Ack(ack),
                Frame::Data(data_frame(2)),
            ]
        );

        let stats = link.stats();
        assert_eq!(stats.rx_bytes, stream.len() as u64);
        assert_eq!(stats.data_frames, 2);
        assert_eq!(stats.ack_frames, 1);
        link.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_framing_error_reported_and_decoding_continues() {
        let (mut link, handle, frames) = start_link();
        let mut errors = link.take_errors().unwrap();
        assert!(link.take_errors().is_none());

        let mut corrupt = data_frame(1).to_bytes();
        *corrupt.last_mut().unwrap() = 0x34;
        handle.inject(&corrupt);
        handle.inject(&data_frame(2).to_bytes());

        let received = collect_frames(&frames, 1).await;
        assert_eq!(received, vec![Frame::Data(data_frame(2))]);

        let error = tokio::time::timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            error,
            LinkError::Framing(FrameError::BadTail { actual: 0x34, .. })
        ));
        assert_eq!(link.stats().framing_errors, 1);
        link.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_commands_reach_transport() {
        let (link, handle, _frames) = start_link();

        let first = CommandFrame::read_status();
        let second = CommandFrame::set_upload_interval(5);
        link.send_command(&first).unwrap();
        link.send_command(&second).unwrap();

        let mut expected = first.to_bytes();
        expected.extend(second.to_bytes());
        assert!(wait_until(|| handle.written().len() >= expected.len()).await);
        assert_eq!(handle.written(), expected);
        assert_eq!(link.stats().tx_bytes, expected.len() as u64);
        link.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_command_rejected_when_outbound_full() {
        let (transport, _handle) = MockTransport::new();
        let config = LinkConfig {
            tx_capacity: 4,
            ..test_config()
        };
        let link = SerialLink::start(transport, config, Arc::new(FrameBus::new())).unwrap();

        let command = CommandFrame::batch_write(&ControlParams::default());
        assert!(command.to_bytes().len() > 4);
        assert!(link.tx_buffer().is_empty());
        assert!(matches!(
            link.send_command(&command),
            Err(LinkError::OutboundFull { .. })
        ));
        link.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_failures_do_not_stop_the_link() {
        let (mut link, handle, frames) = start_link();
        let mut errors = link.take_errors().unwrap();

        handle.fail_reads(true);
        let error = tokio::time::timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(error, LinkError::ReadFailed(_)));
        assert!(link.is_running());

        handle.fail_reads(false);
        handle.inject(&data_frame(9).to_bytes());
        let received = collect_frames(&frames, 1).await;
        assert_eq!(received, vec![Frame::Data(data_frame(9))]);
        assert!(link.stats().io_errors >= 1);
        link.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_panic_is_reported_and_link_keeps_running() {
        let (mut link, handle, frames) = start_link();
        let mut errors = link.take_errors().unwrap();

        handle.panic_on_next_read();
        handle.inject(&data_frame(4).to_bytes());

        let error = tokio::time::timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(error, LinkError::WorkerPanicked { worker: "rx", .. }));

        let received = collect_frames(&frames, 1).await;
        assert_eq!(received, vec![Frame::Data(data_frame(4))]);
        assert!(link.is_running());
        assert_eq!(handle.pending_inbound(), 0);
        link.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_stops_reading() {
        let (mut link, handle, _frames) = start_link();
        let mut errors = link.take_errors().unwrap();

        handle.disconnect();
        assert!(!link.is_running());
        assert!(matches!(link.send(&[1]), Err(LinkError::NotRunning)));

        let error = tokio::time::timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(error, LinkError::TransportClosed));

        // The RX worker has exited, so nothing is reported again
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(errors.try_recv().is_err());
        assert_eq!(link.stats().io_errors, 1);
        link.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_closes_transport_and_clears_buffers() {
        let (link, handle, _frames) = start_link();
        let rx_buffer = Arc::clone(link.rx_buffer());

        // A frame start with a partial body stays in the inbound buffer
        let partial = data_frame(1).to_bytes();
        handle.inject(&partial[..12]);
        assert!(wait_until(|| rx_buffer.available() == 10).await);

        link.shutdown().await.unwrap();
        assert!(!handle.is_open());
        assert!(rx_buffer.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_rejects_closed_transport() {
        let (transport, handle) = MockTransport::new();
        handle.disconnect();
        let result = SerialLink::start(transport, test_config(), Arc::new(FrameBus::new()));
        assert!(matches!(result, Err(LinkError::TransportClosed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_rejects_invalid_config() {
        let (transport, _handle) = MockTransport::new();
        let config = LinkConfig {
            tx_chunk_size: 0,
            ..test_config()
        };
        let result = SerialLink::start(transport, config, Arc::new(FrameBus::new()));
        assert!(matches!(result, Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn test_open_reports_missing_device() {
        let config = LinkConfig::new("/dev/sensor-link-missing", 115_200);
        let result = SerialLink::open(config, Arc::new(FrameBus::new()));
        assert!(matches!(result, Err(LinkError::SerialError(_))));
    }

    #[test]
    fn test_start_requires_runtime() {
        let (transport, _handle) = MockTransport::new();
        let result = SerialLink::start(transport, test_config(), Arc::new(FrameBus::new()));
        assert!(matches!(result, Err(LinkError::Runtime(_))));
    }
}
