//! Link counters

use crate::error::LinkError;
use frame_protocol::Frame;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the workers
#[derive(Debug, Default)]
pub(crate) struct LinkStats {
    rx_bytes: AtomicU64,
    rx_dropped: AtomicU64,
    tx_bytes: AtomicU64,
    data_frames: AtomicU64,
    ack_frames: AtomicU64,
    framing_errors: AtomicU64,
    io_errors: AtomicU64,
}

impl LinkStats {
    pub(crate) fn add_rx(&self, accepted: usize, dropped: usize) {
        self.rx_bytes.fetch_add(accepted as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.rx_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_tx(&self, bytes: usize) {
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_frame(&self, frame: &Frame) {
        let counter = match frame {
            Frame::Data(_) => &self.data_frames,
            Frame::Ack(_) => &self.ack_frames,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, error: &LinkError) {
        let counter = if error.is_framing() {
            &self.framing_errors
        } else {
            &self.io_errors
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            data_frames: self.data_frames.load(Ordering::Relaxed),
            ack_frames: self.ack_frames.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Bytes accepted into the inbound buffer
    pub rx_bytes: u64,
    /// Bytes lost because the inbound buffer was full
    pub rx_dropped: u64,
    /// Bytes written to the transport
    pub tx_bytes: u64,
    pub data_frames: u64,
    pub ack_frames: u64,
    pub framing_errors: u64,
    pub io_errors: u64,
}

impl StatsSnapshot {
    pub fn frames_decoded(&self) -> u64 {
        self.data_frames + self.ack_frames
    }

    pub fn errors(&self) -> u64 {
        self.framing_errors + self.io_errors
    }
}
