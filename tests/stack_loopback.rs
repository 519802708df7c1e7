// Drives a full stack instance offline: transmitted waveforms are captured
// by a loopback sink and fed straight back into the producer path, block by
// block, as a microphone would deliver them.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sonomesh::codec::MessageType;
use sonomesh::mac::SlotMode;
use sonomesh::phy::BandConfig;
use sonomesh::stack::{AudioSink, Beacon, DiscoveryCollaborator, MeshStack, StackEvent};
use sonomesh::Result;

/// Captures everything "played" so the test can replay it into a receiver.
#[derive(Default)]
struct LoopbackSink {
    captured: Mutex<Vec<Vec<f32>>>,
}

impl AudioSink for LoopbackSink {
    fn play(&self, samples: &[f32]) -> Result<()> {
        self.captured.lock().unwrap().push(samples.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct BeaconLog {
    seen: Mutex<Vec<Beacon>>,
}

impl DiscoveryCollaborator for BeaconLog {
    fn on_beacon(&self, beacon: &Beacon) {
        self.seen.lock().unwrap().push(beacon.clone());
    }
}

fn wait_for_capture(sink: &LoopbackSink, deadline: Duration) -> Option<Vec<f32>> {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if let Some(waveform) = sink.captured.lock().unwrap().first().cloned() {
            return Some(waveform);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    None
}

fn feed_in_blocks(stack: &MeshStack, waveform: &[f32]) {
    // A real microphone delivers ambient noise before any signal; the
    // conditioning stages calibrate their floors on it.
    for b in 0..3 {
        let ambience: Vec<f32> = (0..4096)
            .map(|i| ((b * 4096 + i) as f32 * 1.618).sin() * 0.002)
            .collect();
        stack.on_audio_block(ambience);
    }
    for block in waveform.chunks(4096) {
        stack.on_audio_block(block.to_vec());
    }
}

#[test]
fn transmitted_data_is_delivered_to_a_receiver() {
    let tx_sink = Arc::new(LoopbackSink::default());
    let sender = Arc::new(MeshStack::new(
        "sender-1",
        "Sender",
        BandConfig::ultrasonic(),
        SlotMode::Contention,
        tx_sink.clone(),
    ));
    sender.start(20, 5).expect("sender starts");
    sender
        .send(MessageType::Data, b"over the air", 5)
        .expect("queued");

    let waveform = wait_for_capture(&tx_sink, Duration::from_secs(10))
        .expect("scheduler never transmitted");
    sender.stop();

    let receiver = Arc::new(MeshStack::new(
        "receiver-1",
        "Receiver",
        BandConfig::ultrasonic(),
        SlotMode::Contention,
        Arc::new(LoopbackSink::default()),
    ));
    feed_in_blocks(&receiver, &waveform);

    let delivered = receiver
        .events()
        .try_iter()
        .find_map(|e| match e {
            StackEvent::Delivered { payload, .. } => Some(payload),
            _ => None,
        })
        .expect("nothing delivered");
    assert_eq!(delivered, b"over the air");
}

#[test]
fn beacons_reach_the_discovery_collaborator() {
    let tx_sink = Arc::new(LoopbackSink::default());
    let sender = Arc::new(MeshStack::new(
        "beaconer",
        "Beacon Node",
        BandConfig::ultrasonic(),
        SlotMode::Contention,
        tx_sink.clone(),
    ));
    sender.start(20, 5).expect("sender starts");
    sender.send_beacon().expect("beacon queued");

    let waveform = wait_for_capture(&tx_sink, Duration::from_secs(10))
        .expect("scheduler never transmitted");
    sender.stop();

    let log = Arc::new(BeaconLog::default());
    let receiver = Arc::new(
        MeshStack::new(
            "listener",
            "Listener",
            BandConfig::ultrasonic(),
            SlotMode::Contention,
            Arc::new(LoopbackSink::default()),
        )
        .with_discovery(log.clone()),
    );
    feed_in_blocks(&receiver, &waveform);

    let seen = log.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].device_id, "beaconer");
    assert_eq!(seen[0].device_name, "Beacon Node");
}

#[test]
fn stopped_stack_rejects_sends() {
    let stack = Arc::new(MeshStack::new(
        "idle",
        "Idle",
        BandConfig::ultrasonic(),
        SlotMode::Contention,
        Arc::new(LoopbackSink::default()),
    ));
    assert!(stack.send(MessageType::Data, b"x", 5).is_err());
    stack.stop();
}
