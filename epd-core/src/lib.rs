//! # epd-core
//!
//! Image encoding and BLE transfer for e-paper displays.
//!
//! This crate contains:
//! - **Raster**: `dither` and `pack`, turning RGBA pixels into 1-bpp planes
//! - **Protocol**: opcodes, the MTU-bounded `Framer`, `SET_TIME` and
//!   configuration payloads, and the per-driver capability table
//! - **Transfer**: `TransferEngine`, chunked delivery with interleaved
//!   acknowledged and unacknowledged writes
//! - **Link**: `LinkSession`, the connection state machine over an
//!   injected `GattTransport`
//! - **Emulator**: `SimulatedPeripheral`, the firmware side of the protocol
//! - **Error**: `EpdError` and `TransportError`, `thiserror`-based

pub mod emulator;
pub mod error;
pub mod link;
pub mod protocol;
pub mod raster;
pub mod transfer;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use emulator::SimulatedPeripheral;
pub use error::{EpdError, TransportError};
pub use link::{
    DeviceCapabilities, GattTransport, LinkOptions, LinkSession, LinkState, SessionEvent,
    WriteKind,
};
pub use protocol::{
    ChunkMarker, ClockMode, DeviceConfig, DriverProfile, Frame, Framer, Opcode, Payload, PinMap,
    TimeSync,
};
pub use raster::{
    DitherMode, EncodedImage, EncodedPlane, Palette, PixelBuffer, Plane, Rgb, dither,
    encode_image, encode_image_for, pack,
};
pub use transfer::{
    TransferControl, TransferEngine, TransferEvent, TransferJob, TransferOutcome,
    TransferProgress, TransferReport,
};
