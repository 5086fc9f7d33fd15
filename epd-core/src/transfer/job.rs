//! Transfer jobs and the acknowledgement schedule.

use bytes::Bytes;

use crate::error::EpdError;
use crate::link::WriteKind;
use crate::protocol::Opcode;
use crate::raster::{EncodedPlane, Plane};

/// How each chunk of a job is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// `[opcode] ++ chunk` for every chunk.
    Command(u8),
    /// `[WRITE_IMG, marker] ++ chunk`, marker derived from the plane and
    /// the chunk position.
    ImagePlane(Plane),
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(op) => match Opcode::try_from(*op) {
                Ok(op) => write!(f, "{op}"),
                Err(_) => write!(f, "0x{op:02x}"),
            },
            Self::ImagePlane(plane) => write!(f, "{} {plane}", Opcode::WriteImg),
        }
    }
}

// ── TransferJob ──────────────────────────────────────────────────

/// One payload to deliver in chunks.
///
/// Consumed by a single engine run; never shared between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    kind: JobKind,
    payload: Bytes,
    chunk_size: usize,
    ack_every: usize,
}

impl TransferJob {
    pub fn bulk(
        opcode: impl Into<u8>,
        payload: Bytes,
        chunk_size: usize,
        ack_every: usize,
    ) -> Result<Self, EpdError> {
        Self::new(JobKind::Command(opcode.into()), payload, chunk_size, ack_every)
    }

    pub fn image_plane(
        plane: &EncodedPlane,
        chunk_size: usize,
        ack_every: usize,
    ) -> Result<Self, EpdError> {
        Self::new(
            JobKind::ImagePlane(plane.plane),
            plane.bytes.clone(),
            chunk_size,
            ack_every,
        )
    }

    fn new(
        kind: JobKind,
        payload: Bytes,
        chunk_size: usize,
        ack_every: usize,
    ) -> Result<Self, EpdError> {
        if chunk_size == 0 {
            return Err(EpdError::InvalidArgument("chunk size must be at least 1"));
        }
        if ack_every == 0 {
            return Err(EpdError::InvalidArgument(
                "acknowledge interval must be at least 1",
            ));
        }
        Ok(Self {
            kind,
            payload,
            chunk_size,
            ack_every,
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn ack_every(&self) -> usize {
        self.ack_every
    }

    pub fn chunk_count(&self) -> usize {
        self.payload.len().div_ceil(self.chunk_size)
    }

    /// Zero-copy slices of the payload; the last may be short.
    pub fn chunks(&self) -> impl Iterator<Item = Bytes> + '_ {
        (0..self.payload.len())
            .step_by(self.chunk_size)
            .map(move |start| {
                let end = (start + self.chunk_size).min(self.payload.len());
                self.payload.slice(start..end)
            })
    }

    pub fn schedule(&self) -> AckSchedule {
        AckSchedule::new(self.chunk_count(), self.ack_every)
    }
}

// ── AckSchedule ──────────────────────────────────────────────────

/// Decides which chunks go out as acknowledged writes.
///
/// Chunk `i` is acknowledged when it is the last chunk, or when
/// `i - acked_through >= ack_every - 1`, where `acked_through` is one
/// past the previous acknowledged chunk. Everything else is
/// unacknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckSchedule {
    total: usize,
    ack_every: usize,
    acked_through: usize,
}

impl AckSchedule {
    pub fn new(total: usize, ack_every: usize) -> Self {
        Self {
            total,
            ack_every: ack_every.max(1),
            acked_through: 0,
        }
    }

    /// Write kind for chunk `index`. Call once per chunk, in order.
    pub fn next_kind(&mut self, index: usize) -> WriteKind {
        let last = index + 1 == self.total;
        let due = index.saturating_sub(self.acked_through) >= self.ack_every - 1;
        if last || due {
            self.acked_through = index + 1;
            WriteKind::Acknowledged
        } else {
            WriteKind::Unacknowledged
        }
    }

    /// Number of acknowledged writes a full run performs.
    pub fn acknowledged_total(total: usize, ack_every: usize) -> usize {
        total.div_ceil(ack_every.max(1))
    }
}
