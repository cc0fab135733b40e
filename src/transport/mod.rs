//! # Frame Transport
//!
//! Turns a lossy byte stream into frames and frames back into bytes.
//!
//! This module handles:
//! - Ingestion of raw chunks into a [`ByteRing`] (all-or-nothing admission)
//! - Resynchronizing scan-and-decode on every [`Transport::poll`]
//! - Serialized pack+write on [`Transport::send`]
//! - Decode and drop counters ([`TransportStats`])
//!
//! ## Poll cycle
//!
//! ```text
//! peek ≤ frame_max ─▶ drop bytes before first sync ─▶ for each sync at i:
//!     remaining < frame_min  → stop, wait for more bytes
//!     unpack(window[i..])    → None: false sync, try i+1
//!                            → Some(frame, L): discard through i+L, emit frame
//! ```

pub mod ring;
pub mod sink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use bytes::BytesMut;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::codec::FrameCodec;
use crate::error::{LinkError, Result};
use crate::events::{Event, EventBus};

pub use ring::ByteRing;
pub use sink::{ByteSink, ChannelSink};

/// Source and destination node ids (4 bits each on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Address {
    pub source: u8,
    pub destination: u8,
}

impl Address {
    pub fn new(source: u8, destination: u8) -> Self {
        Self {
            source: source & 0x0F,
            destination: destination & 0x0F,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        Self::new(byte >> 4, byte & 0x0F)
    }

    pub fn to_byte(self) -> u8 {
        (self.source << 4) | (self.destination & 0x0F)
    }

    /// Same link, opposite direction
    pub fn reversed(self) -> Self {
        Self::new(self.destination, self.source)
    }
}

/// One logical protocol message, independent of wire encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command identifier
    pub command: u8,

    /// Routing, for codecs that carry it
    pub address: Option<Address>,

    /// Sequence number, for codecs that carry it
    pub sequence: Option<u8>,

    /// Payload data
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self {
            command,
            address: None,
            sequence: None,
            payload,
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Per-transport settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Name used in logs and traces
    pub name: String,

    /// Ring slots (stores one byte less)
    pub ring_capacity: usize,

    /// Shortest frame worth trying to decode
    pub frame_min: usize,

    /// Longest frame; also the per-poll peek window
    pub frame_max: usize,

    /// Byte that starts every frame
    pub sync_byte: u8,
}

impl TransportConfig {
    /// Settings matching `codec`, with room for four maximum-size frames
    pub fn for_codec<C: FrameCodec>(name: impl Into<String>, codec: &C) -> Self {
        Self {
            name: name.into(),
            ring_capacity: codec.frame_max() * 4 + 1,
            frame_min: codec.frame_min(),
            frame_max: codec.frame_max(),
            sync_byte: codec.sync_byte(),
        }
    }

    pub fn with_ring_capacity(mut self, ring_capacity: usize) -> Self {
        self.ring_capacity = ring_capacity;
        self
    }

    /// Check size bounds against each other
    ///
    /// # Errors
    ///
    /// Returns error if `frame_min` is zero, exceeds `frame_max`, or the
    /// ring cannot hold one maximum-size frame
    pub fn validate(&self) -> Result<()> {
        if self.frame_min == 0 {
            return Err(LinkError::InvalidConfig(
                "frame_min must be greater than 0".to_string(),
            ));
        }

        if self.frame_min > self.frame_max {
            return Err(LinkError::InvalidConfig(format!(
                "frame_min {} exceeds frame_max {}",
                self.frame_min, self.frame_max
            )));
        }

        if self.ring_capacity <= self.frame_max {
            return Err(LinkError::InvalidConfig(format!(
                "ring_capacity {} must exceed frame_max {}",
                self.ring_capacity, self.frame_max
            )));
        }

        Ok(())
    }
}

/// Live counters, shared with every [`Ingress`] handle
#[derive(Debug, Default)]
pub struct TransportStats {
    bytes_ingested: AtomicU64,
    chunks_dropped: AtomicU64,
    frames_decoded: AtomicU64,
    decode_rejects: AtomicU64,
    bytes_resynced: AtomicU64,
    stall_discards: AtomicU64,
    frames_sent: AtomicU64,
    send_rejected: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStatsSnapshot {
    /// Bytes admitted into the ring
    pub bytes_ingested: u64,
    /// Chunks refused by `read_hook`
    pub chunks_dropped: u64,
    /// Frames decoded and emitted
    pub frames_decoded: u64,
    /// Sync candidates `unpack` refused (corrupt, or not complete yet)
    pub decode_rejects: u64,
    /// Bytes thrown away while looking for a frame start
    pub bytes_resynced: u64,
    /// Leading sync bytes dropped because a full window held no frame
    pub stall_discards: u64,
    /// Frames handed to the sink
    pub frames_sent: u64,
    /// Frames refused on the send path
    pub send_rejected: u64,
}

impl TransportStats {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            bytes_ingested: self.bytes_ingested.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_rejects: self.decode_rejects.load(Ordering::Relaxed),
            bytes_resynced: self.bytes_resynced.load(Ordering::Relaxed),
            stall_discards: self.stall_discards.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_rejected: self.send_rejected.load(Ordering::Relaxed),
        }
    }
}

/// State reachable from both the producer and the poll loop
#[derive(Debug)]
struct Shared {
    name: String,
    ring: ByteRing,
    deferred: Mutex<Option<LinkError>>,
    stats: TransportStats,
}

impl Shared {
    fn read_hook(&self, bytes: &[u8]) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }

        match self.ring.admit(bytes) {
            Ok(n) => {
                TransportStats::bump(&self.stats.bytes_ingested, n as u64);
                trace!("[{}] rx chunk {:02X?}", self.name, bytes);
                Ok(n)
            }
            Err(e @ LinkError::Busy(_)) => {
                trace!("[{}] Ring busy for {}-byte chunk", self.name, bytes.len());
                Err(e)
            }
            Err(e) => {
                TransportStats::bump(&self.stats.chunks_dropped, 1);
                warn!("[{}] Dropped {}-byte chunk: {}", self.name, bytes.len(), e);
                Err(e)
            }
        }
    }

    fn take_deferred(&self) -> Option<LinkError> {
        self.deferred
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Producer-side handle: feed bytes, report asynchronous failures
///
/// Cheap to clone and safe to move into a reader task or interrupt
/// callback while the [`Transport`] stays with the poll loop.
#[derive(Debug, Clone)]
pub struct Ingress {
    shared: Arc<Shared>,
}

impl Ingress {
    /// Admit a chunk of received bytes
    ///
    /// The chunk is stored whole or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Backpressure`] if the ring lacks space for the
    /// whole chunk (counted as dropped), or [`LinkError::Busy`] if the ring
    /// lock was held, in which case the caller should offer the chunk again
    pub fn read_hook(&self, bytes: &[u8]) -> Result<usize> {
        self.shared.read_hook(bytes)
    }

    /// Hold the ring lock until the guard drops
    #[cfg(test)]
    pub(crate) fn hold_ring(&self) -> impl Sized + '_ {
        self.shared.ring.hold()
    }

    /// Record an error to be reported by the next poll
    ///
    /// Only the first error is kept until a poll reports it.
    pub fn defer_error(&self, error: LinkError) {
        let mut slot = self
            .shared
            .deferred
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Bytes waiting to be decoded
    pub fn buffered(&self) -> usize {
        self.shared.ring.data_size()
    }
}

struct SendPath<W> {
    buf: BytesMut,
    sink: W,
}

/// Byte-stream framer/deframer over one codec and one sink
pub struct Transport<C, W> {
    config: TransportConfig,
    codec: C,
    shared: Arc<Shared>,
    send_path: Mutex<SendPath<W>>,
    events: Arc<EventBus>,
    running: bool,
}

impl<C, W> std::fmt::Debug for Transport<C, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .field("running", &self.running)
            .field("buffered", &self.shared.ring.data_size())
            .finish_non_exhaustive()
    }
}

impl<C: FrameCodec, W: ByteSink> Transport<C, W> {
    /// Create a transport with its own ring and event bus
    ///
    /// # Errors
    ///
    /// Returns error if the configuration bounds are inconsistent
    ///
    /// # Examples
    ///
    /// ```
    /// use rc_link::codec::SlipCodec;
    /// use rc_link::transport::{ChannelSink, Transport, TransportConfig};
    ///
    /// let codec = SlipCodec::new();
    /// let config = TransportConfig::for_codec("rf", &codec);
    /// let (sink, _rx) = ChannelSink::new(8);
    /// let transport = Transport::new(config, codec, sink)?;
    /// assert!(!transport.is_running());
    /// # Ok::<(), rc_link::error::LinkError>(())
    /// ```
    pub fn new(config: TransportConfig, codec: C, sink: W) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            ring: ByteRing::new(config.ring_capacity)?,
            deferred: Mutex::new(None),
            stats: TransportStats::default(),
        });

        debug!(
            "[{}] Transport created: codec={}, ring={}, frame {}..={}, sync=0x{:02X}",
            config.name,
            codec.name(),
            config.ring_capacity,
            config.frame_min,
            config.frame_max,
            config.sync_byte
        );

        Ok(Self {
            send_path: Mutex::new(SendPath {
                buf: BytesMut::with_capacity(config.frame_max),
                sink,
            }),
            config,
            codec,
            shared,
            events: Arc::new(EventBus::new()),
            running: false,
        })
    }

    /// Publish to an externally owned bus instead of a private one
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Handle for the producer context
    pub fn ingress(&self) -> Ingress {
        Ingress {
            shared: self.shared.clone(),
        }
    }

    /// True once the first poll has flushed stale bytes
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Bytes waiting to be decoded
    pub fn buffered(&self) -> usize {
        self.shared.ring.data_size()
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Same as [`Ingress::read_hook`]
    pub fn read_hook(&self, bytes: &[u8]) -> Result<usize> {
        self.shared.read_hook(bytes)
    }

    /// Decode every complete frame in the current window
    ///
    /// Frames are returned (and published) in wire order. The first call
    /// discards whatever was buffered before the consumer started.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Deferred`] if a producer reported an error since
    /// the last poll (the cycle is skipped), or [`LinkError::Busy`] if the
    /// ring lock was held before anything was consumed. A lock lost later in
    /// the scan ends the cycle early with the frames already consumed.
    pub fn poll(&mut self) -> Result<Vec<Frame>> {
        self.events.publish(Event::PollTick);

        if let Some(error) = self.shared.take_deferred() {
            warn!("[{}] Skipping poll: {}", self.config.name, error);
            return Err(LinkError::Deferred(error.to_string()));
        }

        if !self.running {
            let stale = self.shared.ring.clear()?;
            if stale > 0 {
                debug!("[{}] Discarded {} stale bytes", self.config.name, stale);
            }
            self.running = true;
            info!("[{}] Transport running", self.config.name);
        }

        let window = self.shared.ring.peek(self.config.frame_max)?;
        if window.is_empty() {
            return Ok(Vec::new());
        }

        trace!("[{}] rx window {:02X?}", self.config.name, window);
        self.events.publish(Event::RawReceive(&window));

        let sync = self.config.sync_byte;
        let start = match window.iter().position(|&b| b == sync) {
            Some(start) => start,
            None => {
                self.resync(window.len());
                return Ok(Vec::new());
            }
        };
        if start > 0 && !self.resync(start) {
            return Ok(Vec::new());
        }

        let mut frames = Vec::new();
        // Window offset of the ring's current front
        let mut front = start;
        let mut i = start;

        while i < window.len() {
            if window[i] != sync {
                i += 1;
                continue;
            }

            let remaining = window.len() - i;
            if remaining < self.config.frame_min {
                break;
            }

            match self.codec.unpack(&window[i..]) {
                Some((frame, len)) if len > 0 && len <= remaining => {
                    // The frame at `i` stays buffered for the next cycle
                    if let Err(e) = self.shared.ring.discard(i + len - front) {
                        debug!("[{}] Scan stopped at offset {}: {}", self.config.name, i, e);
                        break;
                    }
                    if i > front {
                        TransportStats::bump(&self.shared.stats.bytes_resynced, (i - front) as u64);
                    }
                    front = i + len;

                    TransportStats::bump(&self.shared.stats.frames_decoded, 1);
                    debug!(
                        "[{}] rx frame cmd=0x{:02X} len={}",
                        self.config.name,
                        frame.command,
                        frame.payload.len()
                    );
                    self.events.publish(Event::FrameReceived(&frame));
                    frames.push(frame);

                    i += len;
                }
                _ => {
                    TransportStats::bump(&self.shared.stats.decode_rejects, 1);
                    i += 1;
                }
            }
        }

        // A full window starting with a sync byte that never decoded can
        // only be a corrupt candidate; without this it would pin the ring.
        if frames.is_empty() && start == 0 && window.len() >= self.config.frame_max {
            match self.shared.ring.discard(1) {
                Ok(_) => {
                    TransportStats::bump(&self.shared.stats.stall_discards, 1);
                    debug!("[{}] Dropped undecodable sync byte", self.config.name);
                }
                Err(e) => debug!("[{}] Stall guard deferred: {}", self.config.name, e),
            }
        }

        Ok(frames)
    }

    /// Drop `n` leading bytes; false if the ring was busy and nothing moved
    fn resync(&self, n: usize) -> bool {
        match self.shared.ring.discard(n) {
            Ok(dropped) => {
                TransportStats::bump(&self.shared.stats.bytes_resynced, dropped as u64);
                debug!("[{}] Resync dropped {} bytes", self.config.name, dropped);
                true
            }
            Err(e) => {
                debug!("[{}] Resync deferred: {}", self.config.name, e);
                false
            }
        }
    }

    /// Pack `frame` and write it to the sink
    ///
    /// Pack and write run under one lock so concurrent senders never
    /// interleave on the shared buffer. Subscribers to the send events run
    /// inside that lock and must not call `send` themselves.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of bytes written
    ///
    /// # Errors
    ///
    /// Returns error if the send path is busy, the codec refuses the frame,
    /// the packed frame falls outside `frame_min..=frame_max`, or the sink
    /// fails
    pub fn send(&self, frame: &Frame) -> Result<usize> {
        let mut guard = match self.send_path.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(LinkError::Busy("send path")),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let SendPath { buf, sink } = &mut *guard;

        buf.clear();
        if let Err(e) = self.codec.pack(frame, buf) {
            TransportStats::bump(&self.shared.stats.send_rejected, 1);
            return Err(e);
        }

        self.events.publish(Event::FrameSent(frame));
        self.events.publish(Event::RawSend(&buf[..]));

        let len = buf.len();
        if len < self.config.frame_min {
            TransportStats::bump(&self.shared.stats.send_rejected, 1);
            warn!(
                "[{}] Dropping {}-byte frame below frame_min {}",
                self.config.name, len, self.config.frame_min
            );
            return Err(LinkError::FrameTooShort {
                len,
                min: self.config.frame_min,
            });
        }

        if len > self.config.frame_max {
            TransportStats::bump(&self.shared.stats.send_rejected, 1);
            return Err(LinkError::Codec(format!(
                "Packed frame of {} bytes exceeds frame_max {}",
                len, self.config.frame_max
            )));
        }

        sink.write(&buf[..])?;

        TransportStats::bump(&self.shared.stats.frames_sent, 1);
        trace!("[{}] tx {:02X?}", self.config.name, &buf[..]);
        Ok(len)
    }
}
