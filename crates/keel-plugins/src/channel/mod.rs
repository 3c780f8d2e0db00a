//! Bounded byte channels carrying the helper protocol.
//!
//! A [`ByteChannel`] is a FIFO byte buffer with a fixed capacity. Writers
//! either take as many bytes as currently fit ([`ByteChannel::try_write`])
//! or wait for space ([`ByteChannel::write_all`]); readers either take what
//! is buffered or wait for data. Closing a channel wakes every waiter:
//! writers fail, readers drain what is left and then observe end of stream.
//!
//! A [`DuplexBuffer`] pairs two channels, one per direction.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Capacity of each direction of a helper channel.
pub const HELPER_CHANNEL_CAPACITY: usize = 1024 * 1024;

/// Returned when writing to a closed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel is closed")]
pub struct ChannelClosed;

#[derive(Debug, Default)]
struct ChannelState {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// Bounded FIFO byte buffer shared between threads.
#[derive(Debug)]
pub struct ByteChannel {
    capacity: usize,
    state: Mutex<ChannelState>,
    readable: Condvar,
    writable: Condvar,
}

impl ByteChannel {
    /// Creates an empty channel holding at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(ChannelState::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Maximum number of buffered bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().bytes.len()
    }

    /// Returns `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().bytes.is_empty()
    }

    /// Returns `true` once the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Buffers as much of `data` as fits without waiting.
    ///
    /// Returns the number of bytes accepted, which may be zero when full.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] once the channel has been closed.
    pub fn try_write(&self, data: &[u8]) -> Result<usize, ChannelClosed> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelClosed);
        }
        let accepted = self.push(&mut state, data);
        if accepted > 0 {
            self.readable.notify_all();
        }
        Ok(accepted)
    }

    /// Buffers all of `data`, waiting for readers to make room as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] if the channel is closed before every byte
    /// has been buffered.
    pub fn write_all(&self, mut data: &[u8]) -> Result<(), ChannelClosed> {
        let mut state = self.state.lock();
        while !data.is_empty() {
            if state.closed {
                return Err(ChannelClosed);
            }
            let accepted = self.push(&mut state, data);
            if accepted == 0 {
                self.writable.wait(&mut state);
                continue;
            }
            self.readable.notify_all();
            data = data.get(accepted..).unwrap_or_default();
        }
        Ok(())
    }

    fn push(&self, state: &mut ChannelState, data: &[u8]) -> usize {
        let free = self.capacity.saturating_sub(state.bytes.len());
        let accepted = free.min(data.len());
        state.bytes.extend(data.iter().take(accepted));
        accepted
    }

    /// Takes up to `max` buffered bytes without waiting.
    pub fn try_read(&self, max: usize) -> Vec<u8> {
        let mut state = self.state.lock();
        self.pop(&mut state, max)
    }

    /// Takes up to `max` bytes, waiting until data arrives.
    ///
    /// Returns `None` once the channel is closed and drained.
    pub fn read(&self, max: usize) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        while state.bytes.is_empty() {
            if state.closed {
                return None;
            }
            self.readable.wait(&mut state);
        }
        Some(self.pop(&mut state, max))
    }

    /// Takes up to `max` bytes, waiting at most `timeout` for data.
    ///
    /// Returns an empty vector on timeout or when the channel is closed and
    /// drained.
    pub fn read_timeout(&self, max: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.bytes.is_empty() && !state.closed {
            if self.readable.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        self.pop(&mut state, max)
    }

    fn pop(&self, state: &mut ChannelState, max: usize) -> Vec<u8> {
        let taken = max.min(state.bytes.len());
        let bytes: Vec<u8> = state.bytes.drain(..taken).collect();
        if taken > 0 {
            self.writable.notify_all();
        }
        bytes
    }

    /// Closes the channel and wakes all waiting readers and writers.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// A pair of bounded channels, one per direction.
#[derive(Debug)]
pub struct DuplexBuffer {
    outbound: Arc<ByteChannel>,
    inbound: Arc<ByteChannel>,
}

impl DuplexBuffer {
    /// Allocates both directions with the given capacities.
    #[must_use]
    pub fn new(outbound_capacity: usize, inbound_capacity: usize) -> Self {
        Self {
            outbound: Arc::new(ByteChannel::new(outbound_capacity)),
            inbound: Arc::new(ByteChannel::new(inbound_capacity)),
        }
    }

    /// Host-to-child direction.
    #[must_use]
    pub const fn outbound(&self) -> &Arc<ByteChannel> {
        &self.outbound
    }

    /// Child-to-host direction.
    #[must_use]
    pub const fn inbound(&self) -> &Arc<ByteChannel> {
        &self.inbound
    }

    /// Closes both directions.
    pub fn close(&self) {
        self.outbound.close();
        self.inbound.close();
    }
}
