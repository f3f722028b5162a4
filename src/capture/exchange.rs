//! Buffer pool and the hand-off queue between the firmware and the consumer.
//!
//! Buffers move in one direction around a loop:
//!
//! ```text
//! pool ──seed──▶ port ──callback──▶ queue ──wait_next──▶ consumer
//!   ▲                ▲                                      │
//!   └────(refused)───┴──────────────recycle─────────────────┘
//! ```
//!
//! Every arrow is a move of a [`FrameBuffer`], so no buffer is ever
//! reachable from two owners.

use crate::error::CaptureError;
use crate::firmware::{
    BufferCallback, BufferRequirements, CameraComponent, FirmwareError, FrameBuffer, OutputPort,
    SendBufferError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::Arc;

/// A port that accepts empty buffers for filling.
pub trait BufferPort {
    fn send_buffer(&self, buffer: FrameBuffer) -> Result<(), SendBufferError>;

    fn is_enabled(&self) -> bool;
}

/// One output port of a camera component.
pub struct ComponentPort<'a> {
    pub component: &'a dyn CameraComponent,
    pub port: OutputPort,
}

impl BufferPort for ComponentPort<'_> {
    fn send_buffer(&self, buffer: FrameBuffer) -> Result<(), SendBufferError> {
        self.component.send_buffer(self.port, buffer)
    }

    fn is_enabled(&self) -> bool {
        self.component.is_port_enabled(self.port)
    }
}

/// Fixed set of pre-allocated buffers.
pub struct BufferPool {
    free: VecDeque<FrameBuffer>,
    capacity: usize,
    buffer_size: usize,
}

impl BufferPool {
    /// Allocates `count` buffers of `size` bytes each.
    pub fn new(count: usize, size: usize) -> Result<Self, CaptureError> {
        if count == 0 || size == 0 {
            return Err(CaptureError::resource(format!(
                "buffer pool of {count} x {size} bytes"
            )));
        }

        let mut free = VecDeque::new();
        free.try_reserve_exact(count)
            .map_err(|e| CaptureError::resource(format!("buffer pool headers: {e}")))?;
        for id in 0..count {
            let mut storage = Vec::new();
            storage
                .try_reserve_exact(size)
                .map_err(|e| CaptureError::resource(format!("buffer {id} of {size} bytes: {e}")))?;
            storage.resize(size, 0);
            free.push_back(FrameBuffer::new(id, storage));
        }

        tracing::debug!(count, size, "Buffer pool created");
        Ok(Self {
            free,
            capacity: count,
            buffer_size: size,
        })
    }

    pub fn take(&mut self) -> Option<FrameBuffer> {
        self.free.pop_front()
    }

    /// Returns a buffer to the free list.
    pub fn put(&mut self, mut buffer: FrameBuffer) {
        buffer.reset();
        self.free.push_back(buffer);
    }

    /// Buffers currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Buffers the pool was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Creates the hand-off queue, split into its producer and consumer ends.
pub fn buffer_queue() -> (QueueProducer, BufferQueue) {
    let (tx, rx) = mpsc::channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        QueueProducer {
            tx,
            depth: Arc::clone(&depth),
        },
        BufferQueue { rx, depth },
    )
}

/// Producer end of the queue, owned by the port callback.
///
/// Pushing never blocks and never allocates beyond the channel node.
pub struct QueueProducer {
    tx: Sender<FrameBuffer>,
    depth: Arc<AtomicUsize>,
}

impl QueueProducer {
    pub fn push(&self, buffer: FrameBuffer) {
        self.depth.fetch_add(1, Ordering::AcqRel);
        if let Err(SendError(buffer)) = self.tx.send(buffer) {
            // Consumer gone: the session is being torn down and the buffer
            // is freed here.
            self.depth.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!(buffer = buffer.id(), "Queue closed, dropping buffer");
        }
    }

    /// Wraps the producer as a port callback.
    ///
    /// When the firmware releases the callback the producer goes with it,
    /// which disconnects the queue and wakes a blocked consumer.
    pub fn into_callback(self) -> BufferCallback {
        Box::new(move |buffer| self.push(buffer))
    }
}

/// Consumer end of the queue.
pub struct BufferQueue {
    rx: Receiver<FrameBuffer>,
    depth: Arc<AtomicUsize>,
}

impl BufferQueue {
    /// Blocks until a buffer arrives; `None` once the producer is gone and
    /// the queue is drained.
    pub fn wait(&self) -> Option<FrameBuffer> {
        let buffer = self.rx.recv().ok()?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(buffer)
    }

    pub fn try_next(&self) -> Option<FrameBuffer> {
        let buffer = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(buffer)
    }

    /// Buffers waiting for the consumer.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened to a buffer handed back by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleOutcome {
    /// Sent straight back to the port.
    Resubmitted,
    /// The port is disabled; the buffer went to the pool.
    Parked,
    /// The port refused the buffer; it went to the pool.
    Refused,
}

/// Where the session's buffers are right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferCensus {
    pub total: usize,
    pub pooled: usize,
    pub queued: usize,
}

impl BufferCensus {
    /// Buffers held by the port or the consumer.
    pub fn outstanding(&self) -> usize {
        self.total.saturating_sub(self.pooled + self.queued)
    }
}

/// Buffer pool plus hand-off queue for one capture session.
pub struct BufferExchange {
    // Field order is drop order: the queue goes before the pool.
    queue: BufferQueue,
    pool: BufferPool,
}

impl BufferExchange {
    /// Allocates a pool matching `requirements` and a fresh queue.
    pub fn create(requirements: BufferRequirements) -> Result<(Self, QueueProducer), CaptureError> {
        let pool = BufferPool::new(requirements.count, requirements.size)?;
        let (producer, queue) = buffer_queue();
        Ok((Self { queue, pool }, producer))
    }

    /// Sends every free buffer to `port`, returning how many were accepted.
    ///
    /// Stopping short is not fatal; the port simply has fewer buffers to
    /// fill.
    pub fn seed(&mut self, port: &dyn BufferPort) -> usize {
        let free = self.pool.available();
        let (sent, refusal) = self.drain_pool_into(port);
        if let Some(err) = refusal {
            tracing::warn!(
                sent,
                free,
                error = %err,
                "Partial seeding, capture capacity reduced"
            );
        } else {
            tracing::debug!(sent, "Seeded capture port");
        }
        sent
    }

    /// Blocks until the next completed buffer; `None` once the port has
    /// released its callback and everything it delivered has been taken.
    pub fn wait_next(&self) -> Option<FrameBuffer> {
        self.queue.wait()
    }

    pub fn try_next(&self) -> Option<FrameBuffer> {
        self.queue.try_next()
    }

    /// Hands a consumed buffer back, preferring the port over the pool.
    ///
    /// After a successful resubmit any buffers parked in the pool by earlier
    /// refusals are offered to the port again.
    pub fn recycle(&mut self, mut buffer: FrameBuffer, port: &dyn BufferPort) -> RecycleOutcome {
        buffer.reset();
        if !port.is_enabled() {
            self.pool.put(buffer);
            return RecycleOutcome::Parked;
        }

        match port.send_buffer(buffer) {
            Ok(()) => {
                if self.pool.available() > 0 {
                    let (sent, _) = self.drain_pool_into(port);
                    if sent > 0 {
                        tracing::debug!(sent, "Returned parked buffers to capture port");
                    }
                }
                RecycleOutcome::Resubmitted
            }
            Err(SendBufferError { buffer, source }) => {
                tracing::warn!(
                    buffer = buffer.id(),
                    error = %source,
                    "Unable to return a buffer to the capture port"
                );
                self.pool.put(buffer);
                RecycleOutcome::Refused
            }
        }
    }

    pub fn census(&self) -> BufferCensus {
        BufferCensus {
            total: self.pool.capacity(),
            pooled: self.pool.available(),
            queued: self.queue.len(),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.pool.buffer_size()
    }

    fn drain_pool_into(&mut self, port: &dyn BufferPort) -> (usize, Option<FirmwareError>) {
        let mut sent = 0;
        while let Some(buffer) = self.pool.take() {
            if let Err(SendBufferError { buffer, source }) = port.send_buffer(buffer) {
                self.pool.put(buffer);
                return (sent, Some(source));
            }
            sent += 1;
        }
        (sent, None)
    }
}
