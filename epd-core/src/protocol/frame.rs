//! Command framing.
//!
//! A frame is the opcode byte followed by its payload. There is no length
//! prefix: every frame travels as exactly one BLE write, so the write
//! itself delimits it.
//!
//! ## Wire format
//!
//! ```text
//! opcode:   u8    (1)
//! payload:  [u8]  (0 ..= mtu − 1)
//! ```
//!
//! `WRITE_IMG` payloads start with a [`ChunkMarker`] byte:
//!
//! ```text
//! bits 0xF0:  0x0 on the first chunk of a plane, 0xF on continuations
//! bits 0x0F:  0xF for the bw plane, 0x0 for the red plane
//! ```

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

use crate::error::EpdError;
use crate::raster::Plane;

/// Opcode byte.
pub const OPCODE_SIZE: usize = 1;

/// Smallest MTU that can carry a `WRITE_IMG` chunk with one data byte.
pub const MIN_MTU: usize = 3;

/// Largest MTU the firmware accepts for a single write.
pub const MAX_MTU: usize = 255;

// ── Frame ────────────────────────────────────────────────────────

/// One command on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: impl Into<u8>, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: opcode.into(),
            payload: payload.into(),
        }
    }

    /// A frame with no payload.
    pub fn bare(opcode: impl Into<u8>) -> Self {
        Self::new(opcode, Bytes::new())
    }

    pub fn encoded_len(&self) -> usize {
        OPCODE_SIZE + self.payload.len()
    }
}

// ── ChunkMarker ──────────────────────────────────────────────────

bitflags! {
    /// Leading byte of every `WRITE_IMG` payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChunkMarker: u8 {
        /// Set on every chunk except the first of a plane.
        const CONTINUATION = 0xF0;
        /// Set for the bw plane, clear for the red plane.
        const MONOCHROME = 0x0F;
    }
}

impl ChunkMarker {
    pub fn new(plane: Plane, first: bool) -> Self {
        let mut marker = ChunkMarker::empty();
        if !first {
            marker |= ChunkMarker::CONTINUATION;
        }
        if plane == Plane::Bw {
            marker |= ChunkMarker::MONOCHROME;
        }
        marker
    }

    pub fn plane(self) -> Plane {
        if self.contains(ChunkMarker::MONOCHROME) {
            Plane::Bw
        } else {
            Plane::Red
        }
    }

    pub fn is_first(self) -> bool {
        !self.contains(ChunkMarker::CONTINUATION)
    }
}

// ── Framer ───────────────────────────────────────────────────────

/// Builds frames bounded by the negotiated MTU.
///
/// Oversized frames are rejected with [`EpdError::OversizedFrame`]; the
/// framer never truncates. Callers split large payloads beforehand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framer {
    mtu: usize,
}

impl Framer {
    pub fn new(mtu: usize) -> Result<Self, EpdError> {
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(EpdError::InvalidArgument("mtu must be within 3..=255"));
        }
        Ok(Self { mtu })
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Largest payload that fits in one frame.
    pub fn max_payload(&self) -> usize {
        self.mtu - OPCODE_SIZE
    }

    /// Encode `[opcode] ++ payload` into a single write buffer.
    pub fn frame(&mut self, opcode: impl Into<u8>, payload: &[u8]) -> Result<Bytes, EpdError> {
        let mut dst = BytesMut::with_capacity(OPCODE_SIZE + payload.len());
        self.encode(Frame::new(opcode, Bytes::copy_from_slice(payload)), &mut dst)?;
        Ok(dst.freeze())
    }

    /// Encode an image chunk: `[WRITE_IMG, marker] ++ data`.
    pub fn image_chunk(
        &mut self,
        marker: ChunkMarker,
        data: &[u8],
    ) -> Result<Bytes, EpdError> {
        let size = OPCODE_SIZE + 1 + data.len();
        if size > self.mtu {
            return Err(EpdError::OversizedFrame {
                size,
                mtu: self.mtu,
            });
        }
        let mut dst = BytesMut::with_capacity(size);
        dst.put_u8(crate::protocol::Opcode::WriteImg.as_u8());
        dst.put_u8(marker.bits());
        dst.extend_from_slice(data);
        Ok(dst.freeze())
    }
}

impl Encoder<Frame> for Framer {
    type Error = EpdError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = item.encoded_len();
        if size > self.mtu {
            return Err(EpdError::OversizedFrame {
                size,
                mtu: self.mtu,
            });
        }
        dst.reserve(size);
        dst.put_u8(item.opcode);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Opcode;

    #[test]
    fn frame_is_opcode_then_payload() {
        let mut framer = Framer::new(20).unwrap();
        let bytes = framer.frame(Opcode::SetTime, &[1, 2, 3]).unwrap();
        assert_eq!(bytes.as_ref(), &[0x20, 1, 2, 3]);
        assert_eq!(framer.frame(Opcode::Clear, &[]).unwrap().as_ref(), &[0x02]);
    }

    #[test]
    fn payload_filling_mtu_is_accepted() {
        let mut framer = Framer::new(20).unwrap();
        assert!(framer.frame(Opcode::SendData, &[0u8; 19]).is_ok());
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut framer = Framer::new(20).unwrap();
        let err = framer.frame(Opcode::SendData, &[0u8; 20]).unwrap_err();
        assert!(matches!(err, EpdError::OversizedFrame { size: 21, mtu: 20 }));
    }

    #[test]
    fn oversized_image_chunk_rejected() {
        let mut framer = Framer::new(20).unwrap();
        let marker = ChunkMarker::new(Plane::Bw, true);
        assert!(framer.image_chunk(marker, &[0u8; 18]).is_ok());
        assert!(matches!(
            framer.image_chunk(marker, &[0u8; 19]),
            Err(EpdError::OversizedFrame { size: 21, .. })
        ));
    }

    #[test]
    fn mtu_bounds() {
        assert!(Framer::new(2).is_err());
        assert!(Framer::new(256).is_err());
        assert_eq!(Framer::new(3).unwrap().max_payload(), 2);
    }

    #[test]
    fn chunk_marker_bits() {
        assert_eq!(ChunkMarker::new(Plane::Bw, true).bits(), 0x0F);
        assert_eq!(ChunkMarker::new(Plane::Bw, false).bits(), 0xFF);
        assert_eq!(ChunkMarker::new(Plane::Red, true).bits(), 0x00);
        assert_eq!(ChunkMarker::new(Plane::Red, false).bits(), 0xF0);

        let m = ChunkMarker::from_bits_truncate(0xF0);
        assert_eq!(m.plane(), Plane::Red);
        assert!(!m.is_first());
    }

    #[test]
    fn image_chunk_layout() {
        let mut framer = Framer::new(20).unwrap();
        let bytes = framer
            .image_chunk(ChunkMarker::new(Plane::Red, false), &[0xAA, 0xBB])
            .unwrap();
        assert_eq!(bytes.as_ref(), &[0x30, 0xF0, 0xAA, 0xBB]);
    }
}
