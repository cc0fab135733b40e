//! # Link Session
//!
//! Reliability and state tracking on top of a [`Transport`].
//!
//! This module handles:
//! - Bring-up: probe the module until it reports ready, identity and status
//! - Command/ack tracking with retransmission ([`pending`])
//! - Pairing handshake
//! - Channel-data heartbeat while the radio link is synced
//!
//! ## Bring-up
//!
//! ```text
//! Probing(0) ──probe──▶ Probing(1) ── … ──▶ Probing(try_cnt) ──▶ Failed
//!      │                    │                       │
//!      └──── ready && product_id != 0 && status != Unknown ────▶ Initialized
//! ```
//!
//! All session state is owned by [`LinkSession`] and changed only through
//! `&mut self`, so sending, ack handling and timers run on one task.

pub mod pending;
pub mod protocol;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::codec::FrameCodec;
use crate::config::SessionConfig;
use crate::error::{LinkError, Result};
use crate::events::Event;
use crate::transport::{Address, ByteSink, Frame, Transport};

use pending::{CommandKind, PendingTable};
use protocol::{
    encode_channels, LinkStatus, ModuleInfo, PairingConfig, RfMode, CMD_CHANNEL_DATA, CMD_READY,
    CMD_SET_MODE, CMD_STATUS, CMD_STATUS_PUSH, CMD_VERSION,
};

/// Bring-up progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUp {
    /// Probe rounds sent so far
    Probing { attempt: u32 },
    Initialized,
    /// Gave up; only [`LinkSession::restart_bring_up`] leaves this state
    Failed { attempts: u32 },
}

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Frames addressed to this host
    pub frames_handled: u64,
    /// Commands resent after an ack timeout
    pub retransmissions: u64,
    /// Channel-data frames sent
    pub heartbeats: u64,
    /// Bring-up probe rounds sent
    pub probes: u64,
    /// Internal sends (acks, probes, retransmits, heartbeats) that failed
    pub send_failures: u64,
}

/// Session over one transport, driven by periodic [`poll`](Self::poll) calls
pub struct LinkSession<C, W, K> {
    transport: Transport<C, W>,
    clock: K,
    config: SessionConfig,
    address: Address,
    sequence: u8,

    bring_up: BringUp,
    next_probe_ms: Option<u64>,
    /// Failure held back so frames from the same cycle reach the caller
    unreported_failure: Option<u32>,

    ready: bool,
    status: LinkStatus,
    module_info: ModuleInfo,
    last_push_sequence: u8,

    pending: PendingTable,
    channel_payload: Vec<u8>,
    heartbeat_since_ms: Option<u64>,

    stats: SessionStats,
}

impl<C: FrameCodec, W: ByteSink, K: Clock> std::fmt::Debug for LinkSession<C, W, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSession")
            .field("bring_up", &self.bring_up)
            .field("ready", &self.ready)
            .field("status", &self.status)
            .field("module_info", &self.module_info)
            .field("awaiting_ack", &self.awaiting_ack())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<C: FrameCodec, W: ByteSink, K: Clock> LinkSession<C, W, K> {
    pub fn new(transport: Transport<C, W>, clock: K, config: SessionConfig) -> Self {
        let address = Address::new(config.host_address, config.module_address);

        Self {
            transport,
            clock,
            config,
            address,
            sequence: 0,
            bring_up: BringUp::Probing { attempt: 0 },
            next_probe_ms: None,
            unreported_failure: None,
            ready: false,
            status: LinkStatus::Unknown,
            module_info: ModuleInfo::default(),
            last_push_sequence: 0,
            pending: PendingTable::new(),
            channel_payload: vec![0],
            heartbeat_since_ms: None,
            stats: SessionStats::default(),
        }
    }

    pub fn transport(&self) -> &Transport<C, W> {
        &self.transport
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn bring_up(&self) -> BringUp {
        self.bring_up
    }

    pub fn is_initialized(&self) -> bool {
        self.bring_up == BringUp::Initialized
    }

    pub fn module_info(&self) -> ModuleInfo {
        self.module_info
    }

    /// True while `kind` is awaiting its ack
    pub fn is_pending(&self, kind: CommandKind) -> bool {
        self.pending.is_pending(kind)
    }

    /// True while any command is awaiting its ack
    pub fn awaiting_ack(&self) -> bool {
        !self.pending.is_idle()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Run one session cycle
    ///
    /// Decodes and handles received frames, retransmits overdue commands,
    /// advances bring-up and sends the heartbeat when due.
    ///
    /// # Returns
    ///
    /// * `Result<Vec<Frame>>` - Frames addressed to this host, in wire order
    ///
    /// # Errors
    ///
    /// Returns the transport error if the cycle could not run, or
    /// [`LinkError::BringUpFailed`] once when bring-up gives up. If that
    /// cycle also handled frames, they are returned and the failure is
    /// reported by the next poll instead, which then skips its cycle.
    pub fn poll(&mut self) -> Result<Vec<Frame>> {
        if let Some(attempts) = self.unreported_failure.take() {
            return Err(LinkError::BringUpFailed { attempts });
        }

        let frames = self.transport.poll()?;
        let now = self.clock.now_ms();

        let mut handled = Vec::with_capacity(frames.len());
        for frame in frames {
            if self.handle_frame(&frame) {
                handled.push(frame);
            }
        }

        self.service_pending(now);
        let bring_up = self.service_bring_up(now);
        self.service_heartbeat(now);

        match bring_up {
            Err(LinkError::BringUpFailed { attempts }) if !handled.is_empty() => {
                self.unreported_failure = Some(attempts);
                Ok(handled)
            }
            other => other.map(|_| handled),
        }
    }

    /// Send the pairing blob, then switch the module to pairing mode
    ///
    /// # Errors
    ///
    /// Returns error if the blob cannot be encoded or either send fails
    pub fn start_pairing(&mut self, config: &PairingConfig) -> Result<()> {
        let blob = config.encode()?;
        info!("Starting pairing (config version {})", config.version);

        self.send_tracked(CommandKind::Pairing, blob)?;
        self.send_tracked(CommandKind::Mode, RfMode::Pairing.payload())
    }

    pub fn set_mode(&mut self, mode: RfMode) -> Result<()> {
        debug!("Requesting mode {:?}", mode);
        self.send_tracked(CommandKind::Mode, mode.payload())
    }

    /// Start an RF test with opaque parameters
    pub fn start_rf_test(&mut self, params: &[u8]) -> Result<()> {
        self.send_tracked(CommandKind::RfTest, params.to_vec())
    }

    /// Send a vendor extension command with an opaque payload
    pub fn send_extended(&mut self, payload: &[u8]) -> Result<()> {
        self.send_tracked(CommandKind::Extended, payload.to_vec())
    }

    /// Replace the channel values carried by the heartbeat
    ///
    /// # Errors
    ///
    /// Returns error if more than 18 channels are given
    pub fn set_channels(&mut self, channels: &[i16]) -> Result<()> {
        self.channel_payload = encode_channels(channels)?;
        Ok(())
    }

    /// Forget everything learned from the module and probe again
    pub fn restart_bring_up(&mut self) {
        info!("Restarting bring-up");
        self.bring_up = BringUp::Probing { attempt: 0 };
        self.next_probe_ms = None;
        self.unreported_failure = None;
        self.ready = false;
        self.status = LinkStatus::Unknown;
        self.module_info = ModuleInfo::default();
        self.heartbeat_since_ms = None;
    }

    fn request(&mut self, command: u8, payload: Vec<u8>) -> Frame {
        let frame = Frame::new(command, payload);
        if !self.transport.codec().addressed() {
            return frame;
        }

        self.sequence = self.sequence.wrapping_add(1);
        frame.with_address(self.address).with_sequence(self.sequence)
    }

    fn send_tracked(&mut self, kind: CommandKind, payload: Vec<u8>) -> Result<()> {
        let frame = self.request(kind.command(), payload);
        self.transport.send(&frame)?;
        self.pending.arm(kind, frame, self.clock.now_ms());
        Ok(())
    }

    /// Send without surfacing errors; the periodic paths retry on their own
    fn send_quiet(&mut self, frame: &Frame, what: &str) {
        if let Err(e) = self.transport.send(frame) {
            self.stats.send_failures += 1;
            warn!("Failed to send {}: {}", what, e);
        }
    }

    /// Returns false for frames meant for another node
    fn handle_frame(&mut self, frame: &Frame) -> bool {
        if let Some(address) = frame.address {
            if address.destination != self.address.source {
                debug!(
                    "Ignoring frame cmd=0x{:02X} for node {}",
                    frame.command, address.destination
                );
                return false;
            }
        }

        self.stats.frames_handled += 1;

        match frame.command {
            CMD_READY => match frame.payload.first() {
                Some(&value) => self.set_ready(value != 0),
                None => debug!("Empty READY response"),
            },
            CMD_STATUS => match frame.payload.first() {
                Some(&value) => self.set_status(LinkStatus::from(value)),
                None => debug!("Empty STATUS response"),
            },
            CMD_STATUS_PUSH => {
                if let Some(&value) = frame.payload.first() {
                    self.set_status(LinkStatus::from(value));
                }
                self.last_push_sequence = frame.sequence.unwrap_or(0);
                self.ack_status_push();
            }
            CMD_VERSION => match ModuleInfo::decode(&frame.payload) {
                Ok(info) => {
                    if info != self.module_info {
                        info!(
                            "Module product 0x{:08X}, firmware {}, hardware {}",
                            info.product_id, info.firmware_version, info.hardware_version
                        );
                    }
                    self.module_info = info;
                }
                Err(e) => warn!("Bad VERSION response: {}", e),
            },
            CMD_CHANNEL_DATA => debug!("Ignoring CHANNEL_DATA from module"),
            command => match CommandKind::from_command(command) {
                Some(kind) => {
                    if self.pending.clear(kind).is_some() {
                        debug!("{:?} acknowledged", kind);
                    }
                }
                None => debug!("Unhandled command 0x{:02X}", command),
            },
        }

        true
    }

    fn set_ready(&mut self, ready: bool) {
        if ready != self.ready {
            info!("Module ready: {}", ready);
        }
        self.ready = ready;
    }

    fn set_status(&mut self, status: LinkStatus) {
        if status != self.status {
            info!("Link status {:?} -> {:?}", self.status, status);
        }
        self.status = status;

        // A module already pairing or synced has received the handshake
        if matches!(status, LinkStatus::Pairing | LinkStatus::Synced) {
            if self.pending.clear(CommandKind::Pairing).is_some() {
                debug!("Pairing config settled by status {:?}", status);
            }

            let pairing_mode = self
                .pending
                .get(CommandKind::Mode)
                .is_some_and(|p| p.frame.payload == RfMode::Pairing.payload());
            if pairing_mode {
                self.pending.clear(CommandKind::Mode);
                debug!("Pairing mode settled by status {:?}", status);
            }
        }
    }

    fn ack_status_push(&mut self) {
        let mut frame = Frame::new(CMD_STATUS_PUSH, Vec::new());
        if self.transport.codec().addressed() {
            frame = frame
                .with_address(self.address)
                .with_sequence(self.last_push_sequence);
        }
        self.send_quiet(&frame, "status push ack");
    }

    fn service_pending(&mut self, now: u64) {
        for (kind, pending) in self.pending.due(now, self.config.ack_timeout_ms) {
            self.stats.retransmissions += 1;
            warn!(
                "No ack for {:?} after {} ms, retransmitting (retry {})",
                kind, self.config.ack_timeout_ms, pending.retries
            );
            self.send_quiet(&pending.frame, "retransmission");
        }
    }

    fn service_bring_up(&mut self, now: u64) -> Result<()> {
        let attempt = match self.bring_up {
            BringUp::Probing { attempt } => attempt,
            _ => return Ok(()),
        };

        if self.ready && self.module_info.product_id != 0 && self.status != LinkStatus::Unknown {
            self.bring_up = BringUp::Initialized;
            info!(
                "Bring-up complete after {} probes (product 0x{:08X}, status {:?})",
                attempt, self.module_info.product_id, self.status
            );
            self.transport.events().publish(Event::InitComplete);
            return Ok(());
        }

        if self.next_probe_ms.is_some_and(|next| now < next) {
            return Ok(());
        }
        self.next_probe_ms = Some(now + self.config.probe_interval_ms);

        if attempt >= self.config.try_cnt {
            self.bring_up = BringUp::Failed { attempts: attempt };
            error!(
                "Bring-up failed after {} attempts (ready={}, product=0x{:08X}, status={:?})",
                attempt, self.ready, self.module_info.product_id, self.status
            );
            return Err(LinkError::BringUpFailed { attempts: attempt });
        }

        debug!("Bring-up probe {}/{}", attempt + 1, self.config.try_cnt);
        for command in [CMD_READY, CMD_STATUS, CMD_VERSION] {
            let frame = self.request(command, Vec::new());
            self.send_quiet(&frame, "probe");
        }
        self.ack_status_push();

        self.stats.probes += 1;
        self.bring_up = BringUp::Probing {
            attempt: attempt + 1,
        };

        Ok(())
    }

    fn service_heartbeat(&mut self, now: u64) {
        if self.status != LinkStatus::Synced || !self.ready {
            if self.heartbeat_since_ms.take().is_some() {
                debug!("Heartbeat stopped");
            }
            return;
        }

        match self.heartbeat_since_ms {
            None => {
                debug!("Heartbeat armed");
                self.heartbeat_since_ms = Some(now);
            }
            Some(since) if now.saturating_sub(since) >= self.config.heartbeat_interval_ms => {
                let frame = self.request(CMD_CHANNEL_DATA, self.channel_payload.clone());
                self.send_quiet(&frame, "heartbeat");
                self.stats.heartbeats += 1;
                self.heartbeat_since_ms = Some(now);
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::protocol::{decode_channels, CMD_EXTENDED, CMD_PAIRING_CONFIG, CMD_RF_TEST};
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::{LengthCrcCodec, SlipCodec};
    use crate::transport::sink::mocks::RecordingSink;
    use crate::transport::TransportConfig;

    const HOST: u8 = 0x1;
    const MODULE: u8 = 0x2;

    type SlipSession = LinkSession<SlipCodec, RecordingSink, ManualClock>;

    struct Harness {
        session: SlipSession,
        sink: RecordingSink,
        clock: ManualClock,
    }

    impl Harness {
        fn new(config: SessionConfig) -> Self {
            let codec = SlipCodec::new();
            let transport_config = TransportConfig::for_codec("test", &codec);
            let sink = RecordingSink::new();
            let transport = Transport::new(transport_config, codec, sink.clone()).unwrap();
            let clock = ManualClock::new();

            Self {
                session: LinkSession::new(transport, clock.clone(), config),
                sink,
                clock,
            }
        }

        /// Harness past its first poll with nothing recorded
        fn started(config: SessionConfig) -> Self {
            let mut harness = Self::new(config);
            harness.session.poll().unwrap();
            harness.sink.clear();
            harness
        }

        fn receive(&self, command: u8, sequence: u8, payload: Vec<u8>) {
            self.receive_from(Address::new(MODULE, HOST), command, sequence, payload);
        }

        fn receive_from(&self, address: Address, command: u8, sequence: u8, payload: Vec<u8>) {
            let frame = Frame::new(command, payload)
                .with_address(address)
                .with_sequence(sequence);
            let mut out = BytesMut::new();
            SlipCodec::new().pack(&frame, &mut out).unwrap();
            self.session.transport().read_hook(&out).unwrap();
        }

        fn poll_at(&mut self, ms: u64) -> Result<Vec<Frame>> {
            self.clock.set(ms);
            self.session.poll()
        }

        /// Everything the host wrote, decoded
        fn sent(&self) -> Vec<Frame> {
            let codec = SlipCodec::new();
            self.sink
                .writes()
                .iter()
                .map(|bytes| codec.unpack(bytes).unwrap().0)
                .collect()
        }

        fn sent_commands(&self, command: u8) -> Vec<Frame> {
            self.sent()
                .into_iter()
                .filter(|f| f.command == command)
                .collect()
        }

        fn make_synced(&mut self, ms: u64) {
            self.receive(CMD_READY, 1, vec![1]);
            self.receive(CMD_STATUS, 2, vec![u8::from(LinkStatus::Synced)]);
            self.poll_at(ms).unwrap();
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            try_cnt: 3,
            probe_interval_ms: 1000,
            ack_timeout_ms: 500,
            heartbeat_interval_ms: 50,
            host_address: HOST,
            module_address: MODULE,
        }
    }

    #[test]
    fn test_unacked_command_retransmits_identical_frame() {
        let mut h = Harness::started(config());
        h.session.set_mode(RfMode::Normal).unwrap();

        let mut ms = 0;
        while ms < 1500 {
            ms += 50;
            h.poll_at(ms).unwrap();
        }

        let sent = h.sent_commands(CMD_SET_MODE);
        assert!(sent.len() >= 4, "sent {} SET_MODE frames", sent.len());
        assert!(sent.iter().all(|f| *f == sent[0]));
        assert_eq!(h.session.stats().retransmissions, 3);
        assert!(h.session.is_pending(CommandKind::Mode));
    }

    #[test]
    fn test_ack_before_timeout_suppresses_retransmission() {
        let mut h = Harness::started(config());
        h.session.set_mode(RfMode::Standby).unwrap();
        assert!(h.session.awaiting_ack());

        h.receive(CMD_SET_MODE, 9, vec![]);
        h.poll_at(100).unwrap();
        assert!(!h.session.is_pending(CommandKind::Mode));
        assert!(!h.session.awaiting_ack());

        for ms in (150..=1200).step_by(50) {
            h.poll_at(ms).unwrap();
        }

        assert_eq!(h.sent_commands(CMD_SET_MODE).len(), 1);
        assert_eq!(h.session.stats().retransmissions, 0);
    }

    #[test]
    fn test_retransmissions_per_kind_are_independent() {
        let mut h = Harness::started(config());
        h.session.start_rf_test(&[0x10]).unwrap();
        h.clock.set(200);
        h.session.send_extended(&[0xAB, 0xCD]).unwrap();

        h.receive(CMD_RF_TEST, 3, vec![]);
        h.poll_at(250).unwrap();
        h.poll_at(700).unwrap();

        assert_eq!(h.sent_commands(CMD_RF_TEST).len(), 1);
        assert_eq!(h.sent_commands(CMD_EXTENDED).len(), 2);
    }

    #[test]
    fn test_requests_are_addressed_and_sequenced() {
        let mut h = Harness::started(config());
        h.session.set_mode(RfMode::Normal).unwrap();
        h.session.set_mode(RfMode::RfTest).unwrap();

        let sent = h.sent();
        assert_eq!(sent[0].address, Some(Address::new(HOST, MODULE)));
        assert_ne!(sent[0].sequence, sent[1].sequence);
        assert_eq!(sent[1].payload, vec![RfMode::RfTest as u8]);
    }

    #[test]
    fn test_bring_up_probes_then_initializes() {
        let mut h = Harness::new(config());
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        h.session.transport().events().subscribe(0, move |event| {
            if matches!(event, Event::InitComplete) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        h.poll_at(0).unwrap();
        let commands: Vec<u8> = h.sent().iter().map(|f| f.command).collect();
        assert_eq!(commands, vec![CMD_READY, CMD_STATUS, CMD_VERSION, CMD_STATUS_PUSH]);
        assert_eq!(h.session.bring_up(), BringUp::Probing { attempt: 1 });

        let info = ModuleInfo {
            product_id: 0xE1A5,
            firmware_version: 3,
            hardware_version: 1,
        };
        h.receive(CMD_READY, 1, vec![1]);
        h.receive(CMD_STATUS, 2, vec![u8::from(LinkStatus::Standby)]);
        h.receive(CMD_VERSION, 3, info.encode());

        let frames = h.poll_at(20).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(h.session.bring_up(), BringUp::Initialized);
        assert_eq!(h.session.module_info(), info);
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        // No more probing once initialized
        h.sink.clear();
        h.poll_at(5000).unwrap();
        assert!(h.sent_commands(CMD_READY).is_empty());
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bring_up_needs_all_three_conditions() {
        let mut h = Harness::new(config());
        h.poll_at(0).unwrap();

        // Ready and status but no product id
        h.receive(CMD_READY, 1, vec![1]);
        h.receive(CMD_STATUS, 2, vec![u8::from(LinkStatus::Standby)]);
        h.receive(CMD_VERSION, 3, ModuleInfo::default().encode());
        h.poll_at(10).unwrap();

        assert_eq!(h.session.bring_up(), BringUp::Probing { attempt: 1 });
    }

    #[test]
    fn test_bring_up_fails_after_try_cnt_plus_one_checks() {
        let mut h = Harness::new(config());
        let mut checks = 0;
        let mut ms = 0;

        let failure = loop {
            checks += 1;
            match h.poll_at(ms) {
                Ok(_) => {}
                Err(e) => break e,
            }
            // Polls between probe checks do not count
            h.poll_at(ms + 500).unwrap();
            ms += 1000;
            assert!(checks <= 10, "bring-up never failed");
        };

        assert!(matches!(failure, LinkError::BringUpFailed { attempts: 3 }));
        assert_eq!(checks, 3 + 1);
        assert_eq!(h.session.bring_up(), BringUp::Failed { attempts: 3 });
        assert_eq!(h.session.stats().probes, 3);

        // Terminal: reported once, no more probes
        h.sink.clear();
        assert!(h.poll_at(ms + 5000).is_ok());
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_frames_survive_bring_up_failure_poll() {
        let mut h = Harness::new(SessionConfig {
            try_cnt: 1,
            ..config()
        });
        h.poll_at(0).unwrap();

        h.receive(0x42, 9, vec![1, 2]);
        let frames = h.poll_at(1000).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x42);
        assert_eq!(h.session.bring_up(), BringUp::Failed { attempts: 1 });

        // Failure still reported exactly once, on the following poll
        assert!(matches!(
            h.poll_at(1001),
            Err(LinkError::BringUpFailed { attempts: 1 })
        ));
        assert!(h.poll_at(1002).unwrap().is_empty());
    }

    #[test]
    fn test_restart_bring_up_probes_again() {
        let mut h = Harness::new(SessionConfig {
            try_cnt: 1,
            ..config()
        });
        h.poll_at(0).unwrap();
        assert!(h.poll_at(1000).is_err());

        h.session.restart_bring_up();
        h.sink.clear();
        h.poll_at(1001).unwrap();

        assert_eq!(h.session.bring_up(), BringUp::Probing { attempt: 1 });
        assert_eq!(h.sent_commands(CMD_READY).len(), 1);
    }

    #[test]
    fn test_status_push_is_acked_with_echoed_sequence() {
        let mut h = Harness::started(config());
        h.receive(CMD_STATUS_PUSH, 42, vec![u8::from(LinkStatus::Syncing)]);
        h.poll_at(10).unwrap();

        assert_eq!(h.session.status(), LinkStatus::Syncing);
        let acks = h.sent_commands(CMD_STATUS_PUSH);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].sequence, Some(42));
        assert!(acks[0].payload.is_empty());
        assert_eq!(acks[0].address, Some(Address::new(HOST, MODULE)));
    }

    #[test]
    fn test_frames_for_other_nodes_are_ignored() {
        let mut h = Harness::started(config());
        h.receive_from(Address::new(MODULE, 0x5), CMD_READY, 1, vec![1]);

        let frames = h.poll_at(10).unwrap();

        assert!(frames.is_empty());
        assert!(!h.session.is_ready());
        assert_eq!(h.session.stats().frames_handled, 0);
    }

    #[test]
    fn test_pairing_cleared_by_status() {
        let mut h = Harness::started(config());
        let pairing = PairingConfig {
            version: 1,
            failsafe: vec![0, 0, -1000, 0],
            port_types: vec![],
            pwm_frequencies: vec![],
        };

        h.session.start_pairing(&pairing).unwrap();
        let sent = h.sent();
        assert_eq!(sent[0].command, CMD_PAIRING_CONFIG);
        assert_eq!(sent[0].payload, pairing.encode().unwrap());
        assert_eq!(sent[1].command, CMD_SET_MODE);
        assert_eq!(sent[1].payload, RfMode::Pairing.payload());
        assert!(h.session.is_pending(CommandKind::Pairing));
        assert!(h.session.is_pending(CommandKind::Mode));

        h.receive(CMD_STATUS_PUSH, 7, vec![u8::from(LinkStatus::Pairing)]);
        h.poll_at(100).unwrap();

        assert!(!h.session.is_pending(CommandKind::Pairing));
        assert!(!h.session.is_pending(CommandKind::Mode));

        h.sink.clear();
        h.poll_at(700).unwrap();
        assert!(h.sent_commands(CMD_PAIRING_CONFIG).is_empty());
        assert!(h.sent_commands(CMD_SET_MODE).is_empty());
    }

    #[test]
    fn test_synced_status_keeps_other_mode_pending() {
        let mut h = Harness::started(config());
        h.session.set_mode(RfMode::Standby).unwrap();

        h.receive(CMD_STATUS, 1, vec![u8::from(LinkStatus::Synced)]);
        h.poll_at(100).unwrap();

        assert!(h.session.is_pending(CommandKind::Mode));
    }

    #[test]
    fn test_heartbeat_waits_one_interval_after_sync() {
        let mut h = Harness::started(config());
        h.session.set_channels(&[1500, -1500, 0]).unwrap();

        h.make_synced(10);
        assert!(h.sent_commands(CMD_CHANNEL_DATA).is_empty());

        h.poll_at(59).unwrap();
        assert!(h.sent_commands(CMD_CHANNEL_DATA).is_empty());

        h.poll_at(60).unwrap();
        let beats = h.sent_commands(CMD_CHANNEL_DATA);
        assert_eq!(beats.len(), 1);
        assert_eq!(decode_channels(&beats[0].payload).unwrap(), vec![1500, -1500, 0]);

        h.poll_at(110).unwrap();
        assert_eq!(h.sent_commands(CMD_CHANNEL_DATA).len(), 2);
        assert_eq!(h.session.stats().heartbeats, 2);
    }

    #[test]
    fn test_heartbeat_resets_after_desync() {
        let mut h = Harness::started(config());
        h.make_synced(0);
        h.poll_at(50).unwrap();
        assert_eq!(h.sent_commands(CMD_CHANNEL_DATA).len(), 1);

        h.receive(CMD_STATUS, 3, vec![u8::from(LinkStatus::Syncing)]);
        h.poll_at(60).unwrap();
        h.poll_at(200).unwrap();
        assert_eq!(h.sent_commands(CMD_CHANNEL_DATA).len(), 1);

        // Recovery arms the timer instead of firing at once
        h.receive(CMD_STATUS, 4, vec![u8::from(LinkStatus::Synced)]);
        h.poll_at(300).unwrap();
        h.poll_at(349).unwrap();
        assert_eq!(h.sent_commands(CMD_CHANNEL_DATA).len(), 1);

        h.poll_at(350).unwrap();
        assert_eq!(h.sent_commands(CMD_CHANNEL_DATA).len(), 2);
    }

    #[test]
    fn test_heartbeat_requires_ready() {
        let mut h = Harness::started(config());
        h.receive(CMD_STATUS, 1, vec![u8::from(LinkStatus::Synced)]);
        h.poll_at(0).unwrap();
        h.poll_at(100).unwrap();

        assert!(h.sent_commands(CMD_CHANNEL_DATA).is_empty());
    }

    #[test]
    fn test_set_channels_limit() {
        let mut h = Harness::started(config());
        assert!(h.session.set_channels(&[0; 19]).is_err());
    }

    #[test]
    fn test_deferred_transport_error_surfaces() {
        let mut h = Harness::started(config());
        h.session
            .transport()
            .ingress()
            .defer_error(LinkError::SinkClosed);

        assert!(matches!(h.poll_at(10), Err(LinkError::Deferred(_))));
        assert!(h.poll_at(20).is_ok());
    }

    #[test]
    fn test_session_over_unaddressed_codec() {
        let codec = LengthCrcCodec::new();
        let transport_config = TransportConfig::for_codec("crc", &codec);
        let sink = RecordingSink::new();
        let transport = Transport::new(transport_config, codec, sink.clone()).unwrap();
        let clock = ManualClock::new();
        let mut session = LinkSession::new(transport, clock.clone(), config());

        session.poll().unwrap();
        assert_eq!(sink.writes().len(), 4);

        let mut out = BytesMut::new();
        LengthCrcCodec::new()
            .pack(&Frame::new(CMD_READY, vec![1]), &mut out)
            .unwrap();
        session.transport().read_hook(&out).unwrap();
        clock.set(10);
        session.poll().unwrap();

        assert!(session.is_ready());
        session.set_mode(RfMode::Normal).unwrap();
        assert!(session.is_pending(CommandKind::Mode));
    }
}
