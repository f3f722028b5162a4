//! Buffer headers exchanged between the firmware ports and the host.
//!
//! A [`FrameBuffer`] is deliberately neither `Clone` nor `Copy`: moving it is
//! the only way to hand it to another owner, so at any instant exactly one of
//! the port, the pool, the queue or the consumer holds it.

use std::fmt;

/// Buffer header flags set by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags set.
    pub const EMPTY: Self = Self(0);
    /// The buffer contains the last bytes of a frame.
    pub const FRAME_END: Self = Self(1 << 2);
    /// The buffer data is corrupted.
    pub const CORRUPTED: Self = Self(1 << 9);

    /// Returns the raw flag bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `other` is also set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Control event carried by a buffer instead of image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCode {
    /// A port parameter changed (expected on the control port).
    ParameterChanged,
    /// The firmware reported an asynchronous error.
    Error,
    /// End of stream.
    EndOfStream,
    /// The output format changed.
    FormatChanged,
    /// Any other four-character event code.
    Other(u32),
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterChanged => f.write_str("parameter-changed"),
            Self::Error => f.write_str("error"),
            Self::EndOfStream => f.write_str("end-of-stream"),
            Self::FormatChanged => f.write_str("format-changed"),
            Self::Other(code) => write!(f, "0x{code:08x}"),
        }
    }
}

/// Fixed-capacity memory plus the metadata describing its contents.
pub struct FrameBuffer {
    id: usize,
    data: Box<[u8]>,
    length: usize,
    flags: BufferFlags,
    event: Option<EventCode>,
}

impl FrameBuffer {
    /// Wraps pre-allocated storage as an empty data buffer.
    pub fn new(id: usize, storage: Vec<u8>) -> Self {
        Self {
            id,
            data: storage.into_boxed_slice(),
            length: 0,
            flags: BufferFlags::EMPTY,
            event: None,
        }
    }

    /// Pool-assigned identity, stable for the lifetime of the buffer.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Allocated size in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid payload bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if the buffer carries no payload.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// The control event carried by this buffer, or `None` for a data buffer.
    #[inline]
    pub fn event(&self) -> Option<EventCode> {
        self.event
    }

    /// Returns true if this is a data buffer holding the end of a frame.
    pub fn is_frame_end(&self) -> bool {
        self.event.is_none() && self.flags.contains(BufferFlags::FRAME_END)
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Copies `bytes` into the buffer as a data payload.
    ///
    /// Bytes beyond the capacity are dropped; the returned count is what was
    /// actually stored.
    pub fn fill(&mut self, bytes: &[u8], flags: BufferFlags) -> usize {
        let count = bytes.len().min(self.data.len());
        self.data[..count].copy_from_slice(&bytes[..count]);
        self.length = count;
        self.flags = flags;
        self.event = None;
        count
    }

    /// Fills the buffer in place through `write`, which returns the byte count.
    pub fn fill_with(&mut self, flags: BufferFlags, write: impl FnOnce(&mut [u8]) -> usize) {
        let count = write(&mut self.data).min(self.data.len());
        self.length = count;
        self.flags = flags;
        self.event = None;
    }

    /// Turns the buffer into a control event with no payload.
    pub fn mark_event(&mut self, event: EventCode) {
        self.length = 0;
        self.flags = BufferFlags::EMPTY;
        self.event = Some(event);
    }

    /// Clears metadata so the buffer can be handed back to a port.
    pub fn reset(&mut self) {
        self.length = 0;
        self.flags = BufferFlags::EMPTY;
        self.event = None;
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("length", &self.length)
            .field("capacity", &self.data.len())
            .field("flags", &format_args!("{:08x}", self.flags.bits()))
            .field("event", &self.event)
            .finish()
    }
}
