//! # link: BLE session with the display
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | `transport` | `GattTransport` seam, UUIDs, `WriteKind`             |
//! | `state`     | `LinkState` machine, `DeviceCapabilities`            |
//! | `events`    | Ordinal notification demux, `SessionEvent`           |
//! | `session`   | `LinkSession`, the connect pipeline and operations   |

pub mod events;
pub mod session;
pub mod state;
pub mod transport;

pub use events::{NotificationDemux, SessionEvent};
pub use session::{LinkOptions, LinkSession};
pub use state::{DEFAULT_PROTOCOL_VERSION, DeviceCapabilities, LinkState, WRITE_IMG_MIN_VERSION};
pub use transport::{
    COMMAND_CHAR_UUID, GattTransport, SERVICE_UUID, TransportEvent, TransportEvents,
    VERSION_CHAR_UUID, WriteKind,
};
