//! In-process stand-in for the display firmware.
//!
//! [`SimulatedPeripheral`] implements [`GattTransport`] and applies every
//! frame the way the firmware does: it sends its configuration struct
//! when notifications are enabled, stores pins and driver changes,
//! collects `SEND_CMD`/`SEND_DATA` traffic per controller register and
//! reassembles `WRITE_IMG` planes. Faults can be injected to exercise
//! the session's failure paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::link::{
    COMMAND_CHAR_UUID, GattTransport, SERVICE_UUID, TransportEvent, TransportEvents,
    VERSION_CHAR_UUID, WriteKind,
};
use crate::protocol::device_config::CONFIG_LEN;
use crate::protocol::{ChunkMarker, ClockMode, DeviceConfig, Opcode, PinMap, TimeSync};
use crate::raster::Plane;

/// Configuration a freshly flashed board reports: UC8176 panel, no
/// enable pin.
pub const DEFAULT_CONFIG: [u8; CONFIG_LEN] =
    [0x05, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x01, 0x07, 0xFF, 0xFF];

pub const DEFAULT_VERSION: u8 = 0x16;

const REFRESH_DONE: &str = "Refresh done";

#[derive(Debug)]
struct Inner {
    config: [u8; CONFIG_LEN],
    version: Option<u8>,
    has_service: bool,
    has_command_char: bool,

    connected: bool,
    notifying: bool,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    connects: usize,

    // Faults
    refuse_connects: usize,
    fail_writes: HashSet<usize>,
    disconnect_after: Option<usize>,
    write_delay: Option<Duration>,

    // Observations
    attempts: usize,
    writes: Vec<(Bytes, WriteKind)>,
    register: Option<u8>,
    registers: BTreeMap<u8, Vec<u8>>,
    planes: BTreeMap<u8, Vec<u8>>,
    refreshes: usize,
    clock: Option<TimeSync>,
}

impl Inner {
    fn notify(&self, value: Bytes) {
        if let (true, Some(tx)) = (self.notifying, &self.events) {
            let _ = tx.send(TransportEvent::Notification(value));
        }
    }

    /// Drop the connection from the device side.
    fn hang_up(&mut self) {
        if let Some(tx) = self.events.take() {
            let _ = tx.send(TransportEvent::Disconnected);
        }
        self.connected = false;
        self.notifying = false;
    }

    fn apply(&mut self, frame: &[u8]) {
        let Some((&opcode, data)) = frame.split_first() else {
            return;
        };
        let Ok(opcode) = Opcode::try_from(opcode) else {
            tracing::debug!(opcode, "simulator ignoring unknown opcode");
            return;
        };
        match opcode {
            Opcode::SetPins => {
                if let Ok(pins) = PinMap::from_bytes(&data[..data.len().min(8)]) {
                    let raw = pins.to_bytes();
                    self.config[..7].copy_from_slice(&raw[..7]);
                    if let Some(en) = pins.en {
                        self.config[10] = en;
                    }
                }
            }
            Opcode::Init => {
                if let Some(&driver) = data.first() {
                    self.config[7] = driver;
                }
            }
            Opcode::Clear => {
                self.registers.clear();
                self.planes.clear();
            }
            Opcode::SendCmd => {
                if let Some(&cmd) = data.first() {
                    self.register = Some(cmd);
                    self.registers.insert(cmd, Vec::new());
                }
            }
            Opcode::SendData => {
                if let Some(cmd) = self.register {
                    self.registers.entry(cmd).or_default().extend_from_slice(data);
                }
            }
            Opcode::Refresh => {
                self.refreshes += 1;
                self.notify(Bytes::from_static(REFRESH_DONE.as_bytes()));
            }
            Opcode::Sleep => {}
            Opcode::SetTime => {
                if let &[a, b, c, d, offset, mode, ..] = data {
                    self.clock = Some(TimeSync {
                        timestamp: u32::from_be_bytes([a, b, c, d]),
                        utc_offset_hours: offset as i8,
                        mode: ClockMode::try_from(mode).unwrap_or_default(),
                    });
                }
            }
            Opcode::WriteImg => {
                if let Some((&marker, chunk)) = data.split_first() {
                    let marker = ChunkMarker::from_bits_truncate(marker);
                    let plane = self.planes.entry(plane_key(marker.plane())).or_default();
                    if marker.is_first() {
                        plane.clear();
                    }
                    plane.extend_from_slice(chunk);
                }
            }
            Opcode::SetConfig => {
                let n = data.len().min(CONFIG_LEN);
                self.config[..n].copy_from_slice(&data[..n]);
            }
            Opcode::SysReset | Opcode::SysSleep => self.hang_up(),
            Opcode::CfgErase => {
                self.config = [0xFF; CONFIG_LEN];
                self.hang_up();
            }
        }
    }
}

fn plane_key(plane: Plane) -> u8 {
    match plane {
        Plane::Bw => 0,
        Plane::Red => 1,
    }
}

// ── SimulatedPeripheral ──────────────────────────────────────────

#[derive(Debug)]
pub struct SimulatedPeripheral {
    inner: Mutex<Inner>,
}

impl Default for SimulatedPeripheral {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPeripheral {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                config: DEFAULT_CONFIG,
                version: Some(DEFAULT_VERSION),
                has_service: true,
                has_command_char: true,
                connected: false,
                notifying: false,
                events: None,
                connects: 0,
                refuse_connects: 0,
                fail_writes: HashSet::new(),
                disconnect_after: None,
                write_delay: None,
                attempts: 0,
                writes: Vec::new(),
                register: None,
                registers: BTreeMap::new(),
                planes: BTreeMap::new(),
                refreshes: 0,
                clock: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Builder ──────────────────────────────────────────────────

    pub fn with_config(self, config: [u8; CONFIG_LEN]) -> Self {
        self.lock().config = config;
        self
    }

    /// `None` removes the version characteristic.
    pub fn with_version(self, version: Option<u8>) -> Self {
        self.lock().version = version;
        self
    }

    pub fn without_service(self) -> Self {
        self.lock().has_service = false;
        self
    }

    pub fn without_command_characteristic(self) -> Self {
        self.lock().has_command_char = false;
        self
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_connects(self, n: usize) -> Self {
        self.lock().refuse_connects = n;
        self
    }

    /// Fail the write attempt with 0-based index `index`, counted over
    /// the peripheral's lifetime.
    pub fn fail_write_at(self, index: usize) -> Self {
        self.lock().fail_writes.insert(index);
        self
    }

    /// Hang up right after the `n`-th write attempt.
    pub fn disconnect_after_writes(self, n: usize) -> Self {
        self.lock().disconnect_after = Some(n);
        self
    }

    /// Delay every write, so an operation stays in flight for a while.
    pub fn with_write_delay(self, delay: Duration) -> Self {
        self.lock().write_delay = Some(delay);
        self
    }

    // ── Runtime control ──────────────────────────────────────────

    /// Emit a device log notification.
    pub fn notify_log(&self, text: &str) {
        self.lock().notify(Bytes::copy_from_slice(text.as_bytes()));
    }

    /// Drop the connection from the peripheral's side.
    pub fn hang_up(&self) {
        self.lock().hang_up();
    }

    // ── Observations ─────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn config(&self) -> Option<DeviceConfig> {
        DeviceConfig::decode(&self.lock().config).ok()
    }

    /// Every write that reached the device, in order.
    pub fn writes(&self) -> Vec<(Bytes, WriteKind)> {
        self.lock().writes.clone()
    }

    pub fn write_attempts(&self) -> usize {
        self.lock().attempts
    }

    pub fn acknowledged_writes(&self) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|(_, k)| k.is_acknowledged())
            .count()
    }

    /// Opcodes of every write that reached the device, in order.
    pub fn opcodes(&self) -> Vec<u8> {
        self.lock()
            .writes
            .iter()
            .filter_map(|(f, _)| f.first().copied())
            .collect()
    }

    /// Bytes sent with `SEND_DATA` after `SEND_CMD cmd`.
    pub fn register(&self, cmd: u8) -> Option<Vec<u8>> {
        self.lock().registers.get(&cmd).cloned()
    }

    /// Plane reassembled from `WRITE_IMG` chunks.
    pub fn plane(&self, plane: Plane) -> Option<Vec<u8>> {
        self.lock().planes.get(&plane_key(plane)).cloned()
    }

    pub fn refreshes(&self) -> usize {
        self.lock().refreshes
    }

    pub fn clock(&self) -> Option<TimeSync> {
        self.lock().clock
    }
}

#[async_trait]
impl GattTransport for SimulatedPeripheral {
    async fn connect(&self) -> Result<TransportEvents, TransportError> {
        let mut inner = self.lock();
        if inner.refuse_connects > 0 {
            inner.refuse_connects -= 1;
            return Err(TransportError::Io("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.events = Some(tx);
        inner.connected = true;
        inner.notifying = false;
        inner.connects += 1;
        Ok(rx)
    }

    async fn resolve_service(&self, service: &str) -> Result<(), TransportError> {
        let inner = self.lock();
        if !inner.connected {
            return Err(TransportError::Disconnected);
        }
        if service == SERVICE_UUID && inner.has_service {
            Ok(())
        } else {
            Err(TransportError::NotFound(service.to_owned()))
        }
    }

    async fn resolve_characteristic(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<(), TransportError> {
        let inner = self.lock();
        if !inner.connected {
            return Err(TransportError::Disconnected);
        }
        let present = service == SERVICE_UUID
            && inner.has_service
            && match characteristic {
                COMMAND_CHAR_UUID => inner.has_command_char,
                VERSION_CHAR_UUID => inner.version.is_some(),
                _ => false,
            };
        if present {
            Ok(())
        } else {
            Err(TransportError::NotFound(characteristic.to_owned()))
        }
    }

    async fn read(&self, characteristic: &str) -> Result<Bytes, TransportError> {
        let inner = self.lock();
        if !inner.connected {
            return Err(TransportError::Disconnected);
        }
        match (characteristic, inner.version) {
            (VERSION_CHAR_UUID, Some(v)) => Ok(Bytes::copy_from_slice(&[v])),
            _ => Err(TransportError::NotFound(characteristic.to_owned())),
        }
    }

    async fn subscribe(&self, characteristic: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(TransportError::Disconnected);
        }
        if characteristic != COMMAND_CHAR_UUID || !inner.has_command_char {
            return Err(TransportError::NotFound(characteristic.to_owned()));
        }
        inner.notifying = true;
        let config = Bytes::copy_from_slice(&inner.config);
        inner.notify(config);
        Ok(())
    }

    async fn write(
        &self,
        characteristic: &str,
        data: Bytes,
        kind: WriteKind,
    ) -> Result<(), TransportError> {
        let delay = {
            let inner = self.lock();
            if !inner.connected {
                return Err(TransportError::Disconnected);
            }
            if characteristic != COMMAND_CHAR_UUID {
                return Err(TransportError::NotFound(characteristic.to_owned()));
            }
            inner.write_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if !inner.connected {
            return Err(TransportError::Disconnected);
        }
        let index = inner.attempts;
        inner.attempts += 1;

        let result = if inner.fail_writes.contains(&index) {
            Err(TransportError::Io(format!("injected failure at write {index}")))
        } else {
            inner.apply(&data);
            inner.writes.push((data, kind));
            Ok(())
        };

        if inner.disconnect_after == Some(inner.attempts) {
            inner.hang_up();
        }
        result
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(TransportError::Disconnected);
        }
        inner.events = None;
        inner.connected = false;
        inner.notifying = false;
        Ok(())
    }
}
