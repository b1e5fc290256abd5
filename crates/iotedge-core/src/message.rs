//! Inbound messages and the explicit ownership handoff between the network
//! layer and per-session queues.
//!
//! The network layer owns the buffer a message was decoded from. Anything that
//! keeps a message beyond the handler call (a session queue, for instance)
//! becomes a co-owner by calling [`Releasable::retain`] and must give that
//! reference back exactly once through [`Releasable::release`]. `release`
//! consumes the message, so a second release of the same value does not
//! type-check.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use crate::types::Timestamp;

/// A value whose backing resource is reference counted outside Rust's
/// ownership model.
pub trait Releasable: Send {
    /// Take an additional reference on behalf of a new co-owner
    fn retain(&self);

    /// Give back the reference taken with [`retain`](Self::retain)
    fn release(self);
}

/// Reference count shared with the transport's buffer pool
#[derive(Debug, Clone)]
pub struct BufferLease {
    refs: Arc<AtomicUsize>,
}

impl BufferLease {
    /// New lease holding the transport's own reference
    #[must_use]
    pub fn new() -> Self {
        Self {
            refs: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Add a reference
    pub fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop a reference, returning `true` when the count reached zero.
    ///
    /// Never underflows: releasing an already-freed lease is a no-op.
    pub fn release(&self) -> bool {
        let mut current = self.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.refs.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current == 1,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current number of outstanding references
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl Default for BufferLease {
    fn default() -> Self {
        Self::new()
    }
}

/// A publish-style message received from a device
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Topic the device published on
    pub topic: String,
    /// Packet identifier, absent for QoS 0
    pub packet_id: Option<u16>,
    /// Requested QoS level
    pub qos: u8,
    /// Raw payload bytes
    pub payload: Bytes,
    /// Reception time
    pub received_at: Timestamp,
    lease: BufferLease,
}

impl InboundMessage {
    /// Create a message backed by `lease`
    pub fn new(topic: impl Into<String>, payload: Bytes, lease: BufferLease) -> Self {
        Self {
            topic: topic.into(),
            packet_id: None,
            qos: 0,
            payload,
            received_at: Timestamp::now(),
            lease,
        }
    }

    /// Set the packet id and QoS
    #[must_use]
    pub fn with_packet(mut self, packet_id: u16, qos: u8) -> Self {
        self.packet_id = Some(packet_id);
        self.qos = qos;
        self
    }

    /// Lease backing this message
    #[must_use]
    pub fn lease(&self) -> &BufferLease {
        &self.lease
    }
}

impl Releasable for InboundMessage {
    fn retain(&self) {
        self.lease.retain();
    }

    fn release(self) {
        self.lease.release();
    }
}
