// Runtime wiring of the stack: the producer path feeds captured audio
// through conditioning and demodulation into the MAC, a scheduler thread
// drives slot ticks and transmissions, and the application talks to both
// through the queue and an event channel.

pub mod beacon;

pub use beacon::Beacon;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ByteOrder};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::codec::{self, fragment, reassemble, MessageType, WireFrame};
use crate::dsp::SignalPipeline;
use crate::error::{MeshError, Result};
use crate::mac::{MacConfig, SlotMode, SlotRequest, TdmaMac, TickOutcome};
use crate::phy::{BandConfig, Demodulator, Modulator, TimingConfig};
use crate::utils::consts::{
    ACK_PRIORITY, ACK_TIMEOUT_MS, BEACON_PRIORITY, MAX_RETRIES,
};

/// Speaker-side collaborator. `play` returns once the buffer has finished
/// playing out, so the caller can treat its return as end of transmission.
pub trait AudioSink: Send + Sync {
    fn play(&self, samples: &[f32]) -> Result<()>;
}

/// Peer-discovery collaborator, handed every received beacon in arrival
/// order.
pub trait DiscoveryCollaborator: Send + Sync {
    fn on_beacon(&self, beacon: &Beacon);
}

/// Mesh-routing collaborator. Only the lookup is core; table maintenance
/// lives outside the stack.
pub trait RoutingCollaborator: Send + Sync {
    fn next_hop(&self, target: &str) -> Option<String>;
}

/// Events surfaced to the application task.
#[derive(Debug)]
pub enum StackEvent {
    /// A complete (possibly reassembled) payload arrived.
    Delivered {
        msg_type: MessageType,
        payload: Vec<u8>,
        corrected: usize,
    },
    /// A peer acknowledged our frame.
    Acked { sequence: u16 },
    /// A reliable send ran out of retries.
    SendFailed { sequence: u16, error: MeshError },
    /// We granted slots to a peer (coordinator mode).
    SlotsGranted {
        device: String,
        slots: Vec<usize>,
    },
    /// Backoff ran because a foreign frame landed in one of our slots.
    Collision { count: u32 },
}

struct AckState {
    frame_bytes: Vec<u8>,
    priority: u8,
    retries: u32,
    deadline: Instant,
}

/// Receive-path state, owned exclusively by the producer task. The
/// scheduler never touches it; transmitted waveforms arrive over
/// `reference_rx` and are folded into the echo canceller here.
struct RxPath {
    pipeline: SignalPipeline,
    demodulator: Demodulator,
    buffer: Vec<f32>,
    fragments: Vec<WireFrame>,
    reference_rx: Receiver<Vec<f32>>,
}

/// The assembled stack. One instance per device.
pub struct MeshStack {
    device_id: String,
    device_name: String,
    modulator: Modulator,
    mac: Arc<Mutex<TdmaMac>>,
    rx: Mutex<RxPath>,
    sink: Arc<dyn AudioSink>,
    discovery: Option<Arc<dyn DiscoveryCollaborator>>,
    routing: Option<Arc<dyn RoutingCollaborator>>,
    events_tx: Sender<StackEvent>,
    events_rx: Receiver<StackEvent>,
    reference_tx: Sender<Vec<f32>>,
    pending_acks: Arc<Mutex<HashMap<u16, AckState>>>,
    transmitting: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    beacon_sequence: Mutex<u16>,
    max_rx_buffer: usize,
}

impl MeshStack {
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        band: BandConfig,
        mode: SlotMode,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let device_id = device_id.into();
        let timing = TimingConfig::default();
        let (events_tx, events_rx) = unbounded();
        let (reference_tx, reference_rx) = unbounded();
        let sample_rate = timing.sample_rate as f32;

        // Ten seconds of backlog is plenty for the longest frame
        let max_rx_buffer = timing.sample_rate as usize * 10;

        Self {
            device_name: device_name.into(),
            modulator: Modulator::new(band.clone(), timing),
            mac: Arc::new(Mutex::new(TdmaMac::new(
                device_id.clone(),
                mode,
                MacConfig::default(),
            ))),
            rx: Mutex::new(RxPath {
                pipeline: SignalPipeline::new(band.clone(), sample_rate),
                demodulator: Demodulator::new(band, timing),
                buffer: Vec::new(),
                fragments: Vec::new(),
                reference_rx,
            }),
            sink,
            discovery: None,
            routing: None,
            events_tx,
            events_rx,
            reference_tx,
            pending_acks: Arc::new(Mutex::new(HashMap::new())),
            transmitting: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            scheduler: Mutex::new(None),
            beacon_sequence: Mutex::new(0),
            device_id,
            max_rx_buffer,
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn DiscoveryCollaborator>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_routing(mut self, routing: Arc<dyn RoutingCollaborator>) -> Self {
        self.routing = Some(routing);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Application-facing event stream.
    pub fn events(&self) -> Receiver<StackEvent> {
        self.events_rx.clone()
    }

    /// Claim transmit slots and start the scheduler task.
    pub fn start(self: &Arc<Self>, num_slots: usize, priority: u8) -> Result<()> {
        {
            let mut mac = self.mac.lock().unwrap();
            mac.acquire_slots(num_slots, priority)?;
        }
        self.running.store(true, Ordering::SeqCst);

        let stack = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("sonomesh-scheduler".into())
            .spawn(move || stack.scheduler_loop())
            .map_err(|e| MeshError::AudioUnavailable(e.to_string()))?;
        *self.scheduler.lock().unwrap() = Some(handle);

        info!("stack started for {}", self.device_id);
        Ok(())
    }

    /// Stop the scheduler, drain the queue and release slots. An in-flight
    /// playback finishes on its own; `play` blocking in the scheduler
    /// thread means join waits for the tail to leave the speaker.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.scheduler.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.mac.lock().unwrap().shutdown();
        self.pending_acks.lock().unwrap().clear();
        info!("stack stopped for {}", self.device_id);
    }

    fn scheduler_loop(self: Arc<Self>) {
        let tick_interval = Duration::from_millis(5);
        while self.running.load(Ordering::SeqCst) {
            let outcome = self.mac.lock().unwrap().tick();
            match outcome {
                TickOutcome::Transmit(frame) => self.transmit(frame),
                TickOutcome::FrameStart {
                    utilisation,
                    grants,
                } => {
                    trace!("frame start, utilisation {utilisation:.2}");
                    for (device, grant) in grants {
                        if let Ok(slots) = grant {
                            self.enqueue_slot_grant(&device, &slots);
                            let _ = self.events_tx.send(StackEvent::SlotsGranted {
                                device,
                                slots,
                            });
                        }
                    }
                }
                TickOutcome::Idle => {}
            }

            self.check_ack_timeouts();
            thread::sleep(tick_interval);
        }
    }

    fn transmit(&self, frame: crate::mac::PendingFrame) {
        if self.transmitting.swap(true, Ordering::SeqCst) {
            // A playback is still draining; the frame goes around again
            warn!("transmit opportunity while already transmitting");
            self.mac.lock().unwrap().enqueue_retry(
                frame.frame_bytes,
                frame.priority,
                frame.retries,
            );
            return;
        }

        let samples = self.modulator.modulate(&frame.frame_bytes);
        // Hand the outgoing waveform to the producer task, which feeds it
        // into the echo canceller; the conditioning state itself is never
        // touched from this thread.
        let _ = self.reference_tx.send(samples.clone());

        if let Err(e) = self.sink.play(&samples) {
            warn!("audio sink failed: {e}");
        }
        self.transmitting.store(false, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Application path
    // ------------------------------------------------------------------

    /// Fire-and-forget send. Payloads larger than one frame are fragmented.
    pub fn send(&self, msg_type: MessageType, payload: &[u8], priority: u8) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(MeshError::Stopped);
        }
        let frames = fragment(msg_type, payload)?;
        let mut mac = self.mac.lock().unwrap();
        for frame in frames {
            let encoded = codec::FecCodec::default().encode(&frame.to_bytes());
            mac.enqueue(encoded, priority);
        }
        Ok(())
    }

    /// Send towards a specific device via the routing collaborator. Fails
    /// with `NoRoute` when the mesh has no path to the target; the frame
    /// itself is broadcast acoustically and filtered by the next hop.
    pub fn send_to(&self, target: &str, payload: &[u8], priority: u8) -> Result<()> {
        let routing = self
            .routing
            .as_ref()
            .ok_or_else(|| MeshError::NoRoute(target.to_string()))?;
        let next_hop = routing
            .next_hop(target)
            .ok_or_else(|| MeshError::NoRoute(target.to_string()))?;
        debug!("routing payload for {target} via {next_hop}");
        self.send(MessageType::Data, payload, priority)
    }

    /// Stop-and-wait reliable send: every fragment must be acknowledged
    /// within the ack window or it is retransmitted, up to the retry cap.
    pub fn send_reliable(&self, payload: &[u8], priority: u8) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(MeshError::Stopped);
        }
        let frames = fragment(MessageType::Data, payload)?;
        // Lock order everywhere is acks before mac
        let mut acks = self.pending_acks.lock().unwrap();
        let mut mac = self.mac.lock().unwrap();
        for frame in frames {
            let encoded = codec::FecCodec::default().encode(&frame.to_bytes());
            acks.insert(
                frame.sequence,
                AckState {
                    frame_bytes: encoded.clone(),
                    priority,
                    retries: 0,
                    deadline: Instant::now() + Duration::from_millis(ACK_TIMEOUT_MS),
                },
            );
            mac.enqueue(encoded, priority);
        }
        Ok(())
    }

    /// Queue one identity beacon.
    pub fn send_beacon(&self) -> Result<()> {
        let sequence = {
            let mut seq = self.beacon_sequence.lock().unwrap();
            *seq = seq.wrapping_add(1);
            *seq
        };
        let beacon = Beacon {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            sequence,
        };
        self.send(MessageType::Beacon, &beacon.encode(), BEACON_PRIORITY)
    }

    /// Ask a coordinator for transmit capacity.
    pub fn send_slot_request(&self, num_slots: usize, priority: u8) -> Result<()> {
        let mut payload = vec![num_slots as u8, priority];
        payload.extend_from_slice(self.device_id.as_bytes());
        self.send(MessageType::SlotRequest, &payload, priority)
    }

    fn enqueue_slot_grant(&self, device: &str, slots: &[usize]) {
        let mut payload = vec![device.len().min(255) as u8];
        payload.extend_from_slice(&device.as_bytes()[..device.len().min(255)]);
        payload.push(slots.len() as u8);
        payload.extend(slots.iter().map(|&s| s as u8));
        if let Err(e) = self.send(MessageType::SlotGrant, &payload, ACK_PRIORITY) {
            warn!("could not queue slot grant: {e}");
        }
    }

    // ------------------------------------------------------------------
    // Producer path
    // ------------------------------------------------------------------

    /// Push one captured audio block through the stack. This is the
    /// producer task; call it from the audio input callback.
    pub fn on_audio_block(&self, samples: Vec<f32>) {
        let mut rx = self.rx.lock().unwrap();

        // Fold any waveforms the scheduler has played since the last block
        // into the echo canceller's reference delay line
        let played: Vec<Vec<f32>> = rx.reference_rx.try_iter().collect();
        for waveform in &played {
            rx.pipeline.feed_reference(waveform);
        }

        let conditioned = rx.pipeline.process(samples);
        rx.buffer.extend_from_slice(&conditioned);

        match rx.demodulator.demodulate(&rx.buffer) {
            Ok(result) => match codec::decode_from_rx(&result.data) {
                Ok((frame, corrected)) => {
                    let consumed = rx.buffer.len();
                    rx.buffer.clear();
                    trace!("frame decoded from {consumed} buffered samples");
                    drop(rx);
                    self.handle_frame(frame, corrected);
                }
                Err(e) => {
                    // A reception still in flight deinterleaves to garbage
                    // until its tail arrives, so parse failures mean "wait
                    // for more audio". The buffer cap below reclaims space
                    // if no complete frame ever forms.
                    trace!("frame not decodable yet: {e}");
                    self.trim_rx_buffer(&mut rx);
                }
            },
            Err(MeshError::NoPreamble(_)) => self.trim_rx_buffer(&mut rx),
            Err(e) => {
                debug!("demodulation failed: {e}");
                rx.buffer.clear();
            }
        }
    }

    /// Bound the producer's sample backlog, keeping enough tail to catch a
    /// preamble straddling block boundaries.
    fn trim_rx_buffer(&self, rx: &mut RxPath) {
        let keep = self.modulator.preamble().len() * 2;
        let len = rx.buffer.len();
        if len > self.max_rx_buffer {
            rx.buffer.drain(..len - keep);
        }
    }

    fn handle_frame(&self, frame: WireFrame, corrected: usize) {
        // A foreign frame inside one of our slots is a collision
        let collision = {
            let mut mac = self.mac.lock().unwrap();
            let current = mac.current_slot();
            if !self.transmitting.load(Ordering::SeqCst)
                && mac.assigned_slots().contains(&current)
            {
                mac.handle_collision();
                Some(mac.collision_count())
            } else {
                None
            }
        };
        if let Some(count) = collision {
            let _ = self.events_tx.send(StackEvent::Collision { count });
        }

        match frame.msg_type {
            MessageType::Beacon | MessageType::Discovery => {
                match Beacon::decode(&frame.payload) {
                    Ok(beacon) => {
                        debug!("beacon from {}", beacon.device_id);
                        if let Some(discovery) = &self.discovery {
                            discovery.on_beacon(&beacon);
                        }
                    }
                    Err(e) => debug!("malformed beacon dropped: {e}"),
                }
            }
            MessageType::Data
            | MessageType::StreamStart
            | MessageType::StreamData
            | MessageType::StreamEnd => self.handle_data(frame, corrected),
            MessageType::Ack => {
                if frame.payload.len() >= 2 {
                    let sequence = BigEndian::read_u16(&frame.payload[..2]);
                    if self.pending_acks.lock().unwrap().remove(&sequence).is_some() {
                        let _ = self.events_tx.send(StackEvent::Acked { sequence });
                    }
                }
            }
            MessageType::Nack => {
                if frame.payload.len() >= 2 {
                    let sequence = BigEndian::read_u16(&frame.payload[..2]);
                    self.retransmit_now(sequence);
                }
            }
            MessageType::SlotRequest => {
                if frame.payload.len() > 2 {
                    let request = SlotRequest {
                        num_slots: frame.payload[0] as usize,
                        priority: frame.payload[1],
                        device: String::from_utf8_lossy(&frame.payload[2..]).into_owned(),
                    };
                    self.mac.lock().unwrap().submit_slot_request(request);
                }
            }
            MessageType::SlotGrant => self.adopt_slot_grant(&frame.payload),
            MessageType::Reserved(value) => {
                debug!("frame with reserved type {value:#04x} dropped");
            }
        }
    }

    fn handle_data(&self, frame: WireFrame, corrected: usize) {
        let sequence = frame.sequence;
        let msg_type = frame.msg_type;
        let single = frame.first_fragment() && !frame.more_fragments();

        // Acknowledge data frames so reliable senders make progress
        let mut ack_payload = [0u8; 2];
        BigEndian::write_u16(&mut ack_payload, sequence);
        if let Err(e) = self.send(MessageType::Ack, &ack_payload, ACK_PRIORITY) {
            debug!("could not queue ack: {e}");
        }

        if single {
            let _ = self.events_tx.send(StackEvent::Delivered {
                msg_type,
                payload: frame.payload,
                corrected,
            });
            return;
        }

        let mut rx = self.rx.lock().unwrap();
        if frame.first_fragment() {
            rx.fragments.clear();
        }
        let terminal = !frame.more_fragments();
        rx.fragments.push(frame);

        if terminal {
            let fragments = std::mem::take(&mut rx.fragments);
            drop(rx);
            match reassemble(&fragments) {
                Ok(payload) => {
                    let _ = self.events_tx.send(StackEvent::Delivered {
                        msg_type,
                        payload,
                        corrected,
                    });
                }
                Err(e) => {
                    warn!("reassembly failed: {e}");
                    if let MeshError::MissingFragment(seq) = e {
                        let mut nack = [0u8; 2];
                        BigEndian::write_u16(&mut nack, seq);
                        let _ = self.send(MessageType::Nack, &nack, ACK_PRIORITY);
                    }
                }
            }
        }
    }

    fn adopt_slot_grant(&self, payload: &[u8]) {
        let Some(&id_len) = payload.first() else { return };
        let id_end = 1 + id_len as usize;
        let Some(id) = payload.get(1..id_end) else { return };
        if id != self.device_id.as_bytes() {
            return;
        }
        let Some(&count) = payload.get(id_end) else { return };
        let Some(slots) = payload.get(id_end + 1..id_end + 1 + count as usize) else {
            return;
        };
        let slots: Vec<usize> = slots.iter().map(|&s| s as usize).collect();
        info!("adopting granted slots {:?}", slots);
        let mut mac = self.mac.lock().unwrap();
        mac.adopt_granted_slots(&slots);
    }

    fn retransmit_now(&self, sequence: u16) {
        let mut acks = self.pending_acks.lock().unwrap();
        if let Some(state) = acks.get_mut(&sequence) {
            state.retries += 1;
            state.deadline = Instant::now() + Duration::from_millis(ACK_TIMEOUT_MS);
            self.mac
                .lock()
                .unwrap()
                .enqueue_retry(state.frame_bytes.clone(), state.priority, state.retries);
        }
    }

    fn check_ack_timeouts(&self) {
        let now = Instant::now();
        let mut expired: Vec<(u16, MeshError)> = Vec::new();
        {
            let mut acks = self.pending_acks.lock().unwrap();
            let mut retry: Vec<(u16, Vec<u8>, u8, u32)> = Vec::new();
            acks.retain(|&sequence, state| {
                if state.deadline > now {
                    return true;
                }
                if state.retries < MAX_RETRIES {
                    state.retries += 1;
                    state.deadline = now + Duration::from_millis(ACK_TIMEOUT_MS);
                    retry.push((
                        sequence,
                        state.frame_bytes.clone(),
                        state.priority,
                        state.retries,
                    ));
                    true
                } else {
                    expired.push((
                        sequence,
                        MeshError::AckTimeout(sequence, state.retries),
                    ));
                    false
                }
            });
            if !retry.is_empty() {
                let mut mac = self.mac.lock().unwrap();
                for (sequence, bytes, priority, retries) in retry {
                    debug!("retransmitting seq {sequence} (attempt {retries})");
                    mac.enqueue_retry(bytes, priority, retries);
                }
            }
        }
        for (sequence, error) in expired {
            warn!("giving up on seq {sequence}");
            let _ = self.events_tx.send(StackEvent::SendFailed { sequence, error });
        }
    }
}
