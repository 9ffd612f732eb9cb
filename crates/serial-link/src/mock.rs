//! In-memory transport for tests and bench rigs

use crate::error::LinkError;
use crate::transport::Transport;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Bytes handed out per read, roughly one UART FIFO's worth
const MOCK_READ_CHUNK: usize = 64;

#[derive(Debug)]
struct MockState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    open: bool,
    fail_reads: bool,
    fail_writes: bool,
    panic_next_read: bool,
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport backed by in-memory queues
pub struct MockTransport {
    state: SharedState,
}

/// Test-side control of a [`MockTransport`] after it moved into a link
#[derive(Clone)]
pub struct MockHandle {
    state: SharedState,
}

impl MockTransport {
    /// Create an open mock transport and its control handle
    pub fn new() -> (Self, MockHandle) {
        info!("Creating mock transport for testing");
        let state = Arc::new(Mutex::new(MockState {
            inbound: VecDeque::new(),
            written: Vec::new(),
            open: true,
            fail_reads: false,
            fail_writes: false,
            panic_next_read: false,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    /// Queue bytes as if the board had sent them
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.state).inbound.extend(bytes.iter().copied());
    }

    /// Everything written to the transport so far
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    /// Drain the written bytes
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.state).written)
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Make the next read panic, as a faulty driver would
    pub fn panic_on_next_read(&self) {
        lock(&self.state).panic_next_read = true;
    }

    /// Simulate the device going away
    pub fn disconnect(&self) {
        lock(&self.state).open = false;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Injected bytes not yet read by the link
    pub fn pending_inbound(&self) -> usize {
        lock(&self.state).inbound.len()
    }
}

impl Transport for MockTransport {
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        let mut state = lock(&self.state);
        if std::mem::take(&mut state.panic_next_read) {
            drop(state);
            panic!("injected transport fault");
        }
        if !state.open {
            return Err(LinkError::TransportClosed);
        }
        if state.fail_reads {
            return Err(LinkError::ReadFailed("injected read failure".into()));
        }
        let count = state.inbound.len().min(MOCK_READ_CHUNK);
        Ok(state.inbound.drain(..count).collect())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(LinkError::TransportClosed);
        }
        if state.fail_writes {
            return Err(LinkError::WriteFailed("injected write failure".into()));
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn bytes_waiting(&mut self) -> Result<usize, LinkError> {
        let state = lock(&self.state);
        if !state.open {
            return Err(LinkError::TransportClosed);
        }
        Ok(state.inbound.len())
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn close(&mut self) {
        lock(&self.state).open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_in_fifo_sized_chunks() {
        let (mut transport, handle) = MockTransport::new();
        handle.inject(&[7u8; 100]);

        assert_eq!(transport.bytes_waiting().unwrap(), 100);
        assert_eq!(transport.read_available().unwrap().len(), MOCK_READ_CHUNK);
        assert_eq!(transport.read_available().unwrap().len(), 100 - MOCK_READ_CHUNK);
        assert!(transport.read_available().unwrap().is_empty());
    }

    #[test]
    fn test_injected_failures_and_close() {
        let (mut transport, handle) = MockTransport::new();

        handle.fail_writes(true);
        assert!(matches!(transport.write(&[1]), Err(LinkError::WriteFailed(_))));
        handle.fail_writes(false);
        transport.write(&[1, 2]).unwrap();
        assert_eq!(handle.take_written(), vec![1, 2]);
        assert!(handle.written().is_empty());

        transport.close();
        assert!(!handle.is_open());
        assert!(matches!(transport.read_available(), Err(LinkError::TransportClosed)));
    }
}
