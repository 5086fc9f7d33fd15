//! # protocol: the device's command language
//!
//! | Module          | Purpose                                         |
//! |-----------------|-------------------------------------------------|
//! | `opcode`        | One-byte command opcodes                        |
//! | `frame`         | `[opcode] ++ payload` framing, `WRITE_IMG` marker |
//! | `payload`       | Hex/bytes payload normalisation                 |
//! | `clock`         | `SET_TIME` payload                              |
//! | `device_config` | Configuration notification / `SET_CONFIG` body  |
//! | `driver`        | Per-driver capability table                     |

pub mod clock;
pub mod device_config;
pub mod driver;
pub mod frame;
pub mod opcode;
pub mod payload;

pub use clock::{ClockMode, TimeSync};
pub use device_config::{DeviceConfig, PinMap};
pub use driver::DriverProfile;
pub use frame::{ChunkMarker, Frame, Framer, MAX_MTU, MIN_MTU, OPCODE_SIZE};
pub use opcode::Opcode;
pub use payload::{Payload, parse_hex, to_hex};
