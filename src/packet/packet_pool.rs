use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{log::log_sink::LogSink, sink_debug, sink_info, sink_trace};

use super::rtp_packet::RtpPacket;

/// A checked-out packet that several owners share (send queue, send-result
/// subscribers). The last clone to go returns the packet to its pool.
pub type SharedPacket = Arc<PooledPacket>;

struct PoolState {
    /// Arena of preallocated packets; a checked-out slot holds an empty
    /// placeholder until the packet comes back.
    slots: Vec<RtpPacket>,
    /// Indices of slots currently available.
    free: Vec<usize>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    capacity: usize,
    buffer_capacity: usize,
    logger: Arc<dyn LogSink>,
}

impl PoolInner {
    fn release(&self, index: usize, mut packet: RtpPacket) {
        packet.reset();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(
            !state.free.contains(&index),
            "packet slot {index} returned twice"
        );
        state.slots[index] = packet;
        state.free.push(index);
        sink_trace!(
            self.logger,
            "[PacketPool] slot {} returned, {} available",
            index,
            state.free.len()
        );
    }
}

/// Fixed set of preallocated RTP packets handed out without blocking.
///
/// Nothing is allocated after [`PacketPool::create`]: `acquire` moves a
/// packet out of its slot and the handle moves it back on drop. The pool never
/// grows; when every packet is out `acquire` returns `None` and the caller
/// skips that packet.
#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

impl PacketPool {
    pub fn create(pool_size: usize, buffer_capacity: usize, logger: Arc<dyn LogSink>) -> Self {
        let slots = (0..pool_size)
            .map(|_| RtpPacket::with_capacity(buffer_capacity))
            .collect();
        // Reversed so the first acquire hands out slot 0.
        let free = (0..pool_size).rev().collect();

        sink_info!(
            logger,
            "[PacketPool] created {} packets of {} bytes",
            pool_size,
            buffer_capacity
        );

        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState { slots, free }),
                capacity: pool_size,
                buffer_capacity,
                logger,
            }),
        }
    }

    /// Checks out a packet, or `None` if the pool is exhausted.
    pub fn acquire(&self) -> Option<PooledPacket> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(index) = state.free.pop() else {
            sink_debug!(
                self.inner.logger,
                "[PacketPool] exhausted ({} packets outstanding)",
                self.inner.capacity
            );
            return None;
        };

        let packet = std::mem::take(&mut state.slots[index]);
        Some(PooledPacket {
            packet,
            index,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Total number of packets owned by the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Byte capacity of every packet buffer.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.inner.buffer_capacity
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .free
            .len()
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.capacity() - self.available()
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("buffer_capacity", &self.inner.buffer_capacity)
            .finish()
    }
}

/// Exclusive handle to a pooled packet. Derefs to [`RtpPacket`]; dropping it
/// returns the packet to the pool. Call [`PooledPacket::share`] once the
/// packet is filled in to hand it to the send queue.
pub struct PooledPacket {
    packet: RtpPacket,
    index: usize,
    pool: Arc<PoolInner>,
}

impl PooledPacket {
    /// Slot index inside the pool.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn share(self) -> SharedPacket {
        Arc::new(self)
    }
}

impl Deref for PooledPacket {
    type Target = RtpPacket;

    fn deref(&self) -> &RtpPacket {
        &self.packet
    }
}

impl DerefMut for PooledPacket {
    fn deref_mut(&mut self) -> &mut RtpPacket {
        &mut self.packet
    }
}

impl Drop for PooledPacket {
    fn drop(&mut self) {
        let packet = std::mem::take(&mut self.packet);
        self.pool.release(self.index, packet);
    }
}

impl fmt::Debug for PooledPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledPacket")
            .field("slot", &self.index)
            .field("header_size", &self.packet.header_size())
            .field("payload_size", &self.packet.payload_size())
            .field("params", self.packet.params())
            .finish()
    }
}
