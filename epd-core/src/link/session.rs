//! One BLE link to one display.
//!
//! [`LinkSession`] runs the connect pipeline (discovery, capability
//! probe, notification subscribe, settle delay, `INIT`), then serialises
//! every write-bearing operation through the `Ready → Busy → Ready`
//! claim. A second operation while `Busy` fails with
//! [`EpdError::LinkBusy`].
//!
//! Each connection owns a notification pump task and a cancellation
//! token. The pump demultiplexes notifications into [`SessionEvent`]s;
//! when the transport reports a disconnect it cancels the token, which
//! fails whatever job is in flight with [`EpdError::PeerDisconnected`].
//!
//! The session never reconnects on its own. Callers watch
//! [`LinkSession::subscribe_state`] and call [`LinkSession::connect`]
//! again under their own retry policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{EpdError, TransportError};
use crate::link::events::{NotificationDemux, SessionEvent};
use crate::link::state::{DeviceCapabilities, LinkState};
use crate::link::transport::{
    COMMAND_CHAR_UUID, GattTransport, SERVICE_UUID, TransportEvent, TransportEvents,
    VERSION_CHAR_UUID, WriteKind,
};
use crate::protocol::{
    DeviceConfig, DriverProfile, Framer, Opcode, Payload, PinMap, TimeSync, parse_hex, to_hex,
};
use crate::raster::{EncodedImage, Plane};
use crate::transfer::{
    ChunkSink, TransferControl, TransferEngine, TransferJob, TransferOutcome, TransferReport,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// `WRITE_IMG` spends one byte on the opcode and one on the chunk marker.
const WRITE_IMG_OVERHEAD: usize = 2;

// ── LinkOptions ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Largest single write, opcode included.
    pub mtu: usize,
    /// Every n-th chunk of a transfer is an acknowledged write.
    pub ack_every: usize,
    /// Pause between subscribing and the first command.
    pub settle_delay: Duration,
    pub connect_timeout: Duration,
    /// Driver id sent with the initial `INIT`. `None` keeps the one the
    /// device has stored.
    pub driver: Option<u8>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            mtu: 20,
            ack_every: 20,
            settle_delay: Duration::from_millis(300),
            connect_timeout: Duration::from_secs(10),
            driver: None,
        }
    }
}

// ── Shared ───────────────────────────────────────────────────────

/// State shared with the notification pump.
struct Shared {
    state: watch::Sender<LinkState>,
    config: watch::Sender<Option<DeviceConfig>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    /// Apply a validated transition, publishing only on success.
    fn transition(
        &self,
        f: impl FnOnce(&mut LinkState) -> Result<(), EpdError>,
    ) -> Result<(), EpdError> {
        let mut result: Result<(), EpdError> = Ok(());
        self.state.send_if_modified(|state| {
            let from = state.to_string();
            result = f(state);
            if result.is_ok() {
                tracing::debug!(%from, to = %state, "link state");
            }
            result.is_ok()
        });
        result
    }

    fn force_disconnect(&self) {
        self.state.send_modify(LinkState::force_disconnect);
    }
}

/// Releases the `Busy` claim when an operation ends, however it ends.
struct BusyGuard<'a> {
    state: &'a watch::Sender<LinkState>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        // A disconnect may already have moved the state on.
        self.state.send_if_modified(|s| s.release().is_ok());
    }
}

/// Resources tied to one physical connection.
struct ActiveLink {
    token: CancellationToken,
    capabilities: DeviceCapabilities,
    pump: JoinHandle<()>,
}

impl Drop for ActiveLink {
    fn drop(&mut self) {
        self.token.cancel();
        self.pump.abort();
    }
}

/// Writes framed chunks to the command characteristic.
struct CommandWriter<'a, T: GattTransport> {
    transport: &'a T,
}

#[async_trait]
impl<'a, T: GattTransport> ChunkSink for CommandWriter<'a, T> {
    async fn write_chunk(&self, frame: Bytes, kind: WriteKind) -> Result<(), TransportError> {
        self.transport.write(COMMAND_CHAR_UUID, frame, kind).await
    }
}

// ── LinkSession ──────────────────────────────────────────────────

pub struct LinkSession<T: GattTransport> {
    transport: Arc<T>,
    options: LinkOptions,
    framer: Framer,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveLink>>,
    /// Token of the most recent connect attempt; `disconnect` cancels it.
    attempt: watch::Sender<CancellationToken>,
}

impl<T: GattTransport> LinkSession<T> {
    pub fn new(transport: Arc<T>, options: LinkOptions) -> Result<Self, EpdError> {
        let framer = Framer::new(options.mtu)?;
        if options.ack_every == 0 {
            return Err(EpdError::InvalidArgument(
                "acknowledge interval must be at least 1",
            ));
        }
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (config, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (attempt, _) = watch::channel(CancellationToken::new());
        Ok(Self {
            transport,
            options,
            framer,
            shared: Arc::new(Shared {
                state,
                config,
                events,
            }),
            active: Mutex::new(None),
            attempt,
        })
    }

    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Device notifications and peer disconnects.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Configuration from the most recent configuration notification.
    pub fn device_config(&self) -> Option<DeviceConfig> {
        *self.shared.config.borrow()
    }

    pub async fn capabilities(&self) -> Option<DeviceCapabilities> {
        self.active.lock().await.as_ref().map(|l| l.capabilities)
    }

    /// Profile for the driver this session talks to: the one it sent with
    /// `INIT`, else the one the device reported, else a generic profile.
    pub fn driver_profile(&self) -> DriverProfile {
        self.options
            .driver
            .or_else(|| self.device_config().map(|c| c.driver))
            .map(DriverProfile::lookup)
            .unwrap_or_else(|| DriverProfile::generic(0))
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Connect, probe and initialise the display.
    ///
    /// Valid only from `Disconnected`. On failure the state returns to
    /// `Disconnected` and the transport is asked to disconnect. A
    /// [`disconnect`](Self::disconnect) issued meanwhile aborts the attempt.
    pub async fn connect(&self) -> Result<DeviceCapabilities, EpdError> {
        let mut active = self.active.lock().await;
        self.shared.transition(LinkState::begin_connect)?;
        // A link lost to the peer still holds its pump.
        drop(active.take());

        let attempt = CancellationToken::new();
        self.attempt.send_replace(attempt.clone());

        tracing::info!("connecting");
        let result = tokio::select! {
            biased;
            _ = attempt.cancelled() => {
                Err(EpdError::LinkSetupFailed("connect aborted by disconnect".into()))
            }
            result = self.establish() => result,
        };
        match result {
            Ok(link) => {
                let caps = link.capabilities;
                *active = Some(link);
                tracing::info!(
                    version = format_args!("{:#04x}", caps.version),
                    write_img = caps.supports(Opcode::WriteImg),
                    "link ready"
                );
                Ok(caps)
            }
            Err(e) => {
                tracing::warn!("connect failed: {e}");
                self.shared.force_disconnect();
                if let Err(e) = self.transport.disconnect().await {
                    tracing::debug!("disconnect after failed connect: {e}");
                }
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<ActiveLink, EpdError> {
        let events = tokio::time::timeout(self.options.connect_timeout, self.transport.connect())
            .await
            .map_err(|_| EpdError::LinkSetupFailed("connect timed out".into()))?
            .map_err(|e| EpdError::LinkSetupFailed(format!("connect: {e}")))?;

        self.transport
            .resolve_service(SERVICE_UUID)
            .await
            .map_err(|e| EpdError::LinkSetupFailed(format!("service {SERVICE_UUID}: {e}")))?;
        self.transport
            .resolve_characteristic(SERVICE_UUID, COMMAND_CHAR_UUID)
            .await
            .map_err(|e| {
                EpdError::LinkSetupFailed(format!("characteristic {COMMAND_CHAR_UUID}: {e}"))
            })?;

        self.shared.transition(LinkState::begin_probe)?;
        let capabilities = self.probe_version().await;

        let token = CancellationToken::new();
        let link = ActiveLink {
            pump: tokio::spawn(pump(events, token.clone(), Arc::clone(&self.shared))),
            token,
            capabilities,
        };

        if let Err(e) = self.transport.subscribe(COMMAND_CHAR_UUID).await {
            tracing::warn!("notifications unavailable: {e}");
        }

        tokio::time::sleep(self.options.settle_delay).await;

        let sink = CommandWriter {
            transport: &*self.transport,
        };
        let mut engine = TransferEngine::new(&sink, self.framer, link.token.clone());
        let driver: Vec<u8> = self.options.driver.into_iter().collect();
        engine.command(Opcode::Init, &driver).await?;

        if link.token.is_cancelled() {
            return Err(EpdError::PeerDisconnected);
        }
        self.shared.transition(LinkState::mark_ready)?;
        Ok(link)
    }

    async fn probe_version(&self) -> DeviceCapabilities {
        let fallback = DeviceCapabilities::default();
        if let Err(e) = self
            .transport
            .resolve_characteristic(SERVICE_UUID, VERSION_CHAR_UUID)
            .await
        {
            tracing::info!(
                "version characteristic unavailable ({e}), assuming {:#04x}",
                fallback.version
            );
            return fallback;
        }
        match self.transport.read(VERSION_CHAR_UUID).await {
            Ok(value) => match value.first() {
                Some(&version) => DeviceCapabilities::from_version(version),
                None => {
                    tracing::warn!("empty version characteristic");
                    fallback
                }
            },
            Err(e) => {
                tracing::warn!("reading version failed: {e}");
                fallback
            }
        }
    }

    /// Tear the link down. Any in-flight job fails.
    ///
    /// Disconnecting an already disconnected session is a no-op.
    pub async fn disconnect(&self) -> Result<(), EpdError> {
        // A pending connect holds the lock until it gives up.
        self.attempt.borrow().cancel();
        let mut active = self.active.lock().await;
        if self.state().is_disconnected() {
            drop(active.take());
            return Ok(());
        }
        self.shared.transition(LinkState::begin_disconnect)?;
        drop(active.take());

        if let Err(e) = self.transport.disconnect().await {
            tracing::warn!("transport disconnect: {e}");
        }
        self.shared.transition(LinkState::finish_disconnect)?;
        tracing::info!("disconnected");
        Ok(())
    }

    // ── Operations ───────────────────────────────────────────────

    /// Claim the link and snapshot the current connection.
    async fn begin_operation(
        &self,
    ) -> Result<(BusyGuard<'_>, CancellationToken, DeviceCapabilities), EpdError> {
        self.shared.transition(LinkState::acquire)?;
        let guard = BusyGuard {
            state: &self.shared.state,
        };
        let active = self.active.lock().await;
        let link = active.as_ref().ok_or(EpdError::NotConnected)?;
        Ok((guard, link.token.clone(), link.capabilities))
    }

    /// Send one command as an acknowledged write.
    pub async fn send_command(
        &self,
        opcode: impl Into<u8>,
        payload: impl Into<Payload>,
    ) -> Result<(), EpdError> {
        let opcode = opcode.into();
        let payload = payload.into().into_bytes()?;
        let (_busy, token, _) = self.begin_operation().await?;

        tracing::debug!(
            opcode = format_args!("{opcode:#04x}"),
            payload = %to_hex(&payload),
            "command"
        );
        let sink = CommandWriter {
            transport: &*self.transport,
        };
        TransferEngine::new(&sink, self.framer, token)
            .command(opcode, &payload)
            .await
    }

    /// Send a hex string whose first byte is the opcode.
    pub async fn send_raw(&self, hex: &str) -> Result<(), EpdError> {
        let bytes = parse_hex(hex)?;
        let Some((&opcode, _)) = bytes.split_first() else {
            return Err(EpdError::InvalidArgument("raw command is empty"));
        };
        self.send_command(opcode, bytes.slice(1..)).await
    }

    /// Run a prepared job.
    pub async fn transfer(
        &self,
        job: &TransferJob,
        ctl: &TransferControl,
    ) -> Result<TransferOutcome, EpdError> {
        let (_busy, token, _) = self.begin_operation().await?;
        let sink = CommandWriter {
            transport: &*self.transport,
        };
        TransferEngine::new(&sink, self.framer, token)
            .run(job, ctl)
            .await
    }

    /// Chunk `payload` under `opcode` at the negotiated MTU.
    pub async fn send_bulk(
        &self,
        opcode: impl Into<u8>,
        payload: impl Into<Payload>,
        ctl: &TransferControl,
    ) -> Result<TransferOutcome, EpdError> {
        let job = TransferJob::bulk(
            opcode,
            payload.into().into_bytes()?,
            self.framer.max_payload(),
            self.options.ack_every,
        )?;
        self.transfer(&job, ctl).await
    }

    /// Stream an encoded image and refresh the panel.
    ///
    /// Firmware from [`WRITE_IMG_MIN_VERSION`](crate::link::WRITE_IMG_MIN_VERSION)
    /// on takes `WRITE_IMG` chunks; older firmware gets the driver's RAM
    /// command through `SEND_CMD` followed by `SEND_DATA` chunks. A
    /// completion event is emitted per plane.
    pub async fn send_image(
        &self,
        image: &EncodedImage,
        ctl: &TransferControl,
    ) -> Result<TransferOutcome, EpdError> {
        let profile = self.driver_profile();
        if !profile.supports(image.mode) {
            return Err(EpdError::InvalidArgument(
                "dither mode not supported by this panel driver",
            ));
        }
        let (_busy, token, caps) = self.begin_operation().await?;
        let sink = CommandWriter {
            transport: &*self.transport,
        };
        let mut engine = TransferEngine::new(&sink, self.framer, token);
        let mut total = TransferReport::default();

        tracing::info!(
            driver = %profile,
            mode = %image.mode,
            bytes = image.payload_len(),
            write_img = caps.supports(Opcode::WriteImg),
            "sending image"
        );

        for plane in image.planes() {
            let job = if caps.supports(Opcode::WriteImg) {
                TransferJob::image_plane(
                    plane,
                    self.framer.mtu() - WRITE_IMG_OVERHEAD,
                    self.options.ack_every,
                )?
            } else {
                let cmd = profile.ram_command(plane.plane, image.mode).ok_or(
                    EpdError::InvalidArgument("panel driver has no RAM command for this plane"),
                )?;
                let data = if plane.plane == Plane::Red && profile.invert_red {
                    plane.inverted().bytes
                } else {
                    plane.bytes.clone()
                };
                engine.command(Opcode::SendCmd, &[cmd]).await?;
                TransferJob::bulk(
                    Opcode::SendData,
                    data,
                    self.framer.max_payload(),
                    self.options.ack_every,
                )?
            };

            match engine.run(&job, ctl).await? {
                TransferOutcome::Completed(report) => total.absorb(&report),
                TransferOutcome::Cancelled(report) => {
                    total.absorb(&report);
                    return Ok(TransferOutcome::Cancelled(total));
                }
            }
        }

        engine
            .command(Opcode::Refresh, profile.refresh_param.as_slice())
            .await?;
        tracing::info!(
            elapsed_ms = total.elapsed.as_millis() as u64,
            chunks = total.chunks,
            "image sent"
        );
        Ok(TransferOutcome::Completed(total))
    }

    // ── Device commands ──────────────────────────────────────────

    pub async fn set_pins(&self, pins: &PinMap) -> Result<(), EpdError> {
        self.send_command(Opcode::SetPins, pins.to_bytes()).await
    }

    /// Initialise the panel, switching to `driver` when given.
    pub async fn init(&self, driver: Option<u8>) -> Result<(), EpdError> {
        let payload: Vec<u8> = driver.into_iter().collect();
        self.send_command(Opcode::Init, payload).await
    }

    pub async fn clear(&self) -> Result<(), EpdError> {
        self.send_command(Opcode::Clear, Bytes::new()).await
    }

    /// Refresh with the current driver's refresh parameter.
    pub async fn refresh(&self) -> Result<(), EpdError> {
        let param = self.driver_profile().refresh_param;
        self.send_command(Opcode::Refresh, param.as_slice()).await
    }

    pub async fn sleep(&self) -> Result<(), EpdError> {
        self.send_command(Opcode::Sleep, Bytes::new()).await
    }

    pub async fn sync_time(&self, time: TimeSync) -> Result<(), EpdError> {
        self.send_command(Opcode::SetTime, time.encode()).await
    }

    pub async fn set_config(&self, config: &DeviceConfig) -> Result<(), EpdError> {
        self.send_command(Opcode::SetConfig, config.to_bytes()).await
    }

    pub async fn sys_reset(&self) -> Result<(), EpdError> {
        self.send_command(Opcode::SysReset, Bytes::new()).await
    }

    pub async fn sys_sleep(&self) -> Result<(), EpdError> {
        self.send_command(Opcode::SysSleep, Bytes::new()).await
    }

    /// Erase the stored configuration. The device resets afterwards.
    pub async fn erase_config(&self) -> Result<(), EpdError> {
        self.send_command(Opcode::CfgErase, Bytes::new()).await
    }
}

// ── Notification pump ────────────────────────────────────────────

async fn pump(mut events: TransportEvents, token: CancellationToken, shared: Arc<Shared>) {
    let mut demux = NotificationDemux::new();
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(TransportEvent::Notification(value)) => {
                let event = demux.classify(value);
                if let SessionEvent::Config(config) = &event {
                    shared.config.send_replace(Some(*config));
                }
                let _ = shared.events.send(event);
            }
            Some(TransportEvent::Disconnected) | None => {
                tracing::warn!(notifications = demux.ordinal(), "peer disconnected");
                token.cancel();
                shared.force_disconnect();
                let _ = shared.events.send(SessionEvent::PeerDisconnected);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let o = LinkOptions::default();
        assert_eq!(o.mtu, 20);
        assert_eq!(o.ack_every, 20);
        assert_eq!(o.settle_delay, Duration::from_millis(300));
    }

    #[test]
    fn transition_publishes_only_on_success() {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (config, _) = watch::channel(None);
        let (events, _) = broadcast::channel(1);
        let shared = Shared {
            state,
            config,
            events,
        };
        let mut rx = shared.state.subscribe();

        assert!(shared.transition(LinkState::acquire).is_err());
        assert!(!rx.has_changed().unwrap());

        shared.transition(LinkState::begin_connect).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), LinkState::Connecting);
    }

    #[test]
    fn busy_guard_releases() {
        let (state, _) = watch::channel(LinkState::Busy);
        drop(BusyGuard { state: &state });
        assert!(state.borrow().is_ready());

        // Already disconnected: left alone.
        state.send_replace(LinkState::Disconnected);
        drop(BusyGuard { state: &state });
        assert!(state.borrow().is_disconnected());
    }
}
