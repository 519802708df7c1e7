use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use sonomesh::codec::{self, fragment, MessageType};
use sonomesh::dsp::SignalPipeline;
use sonomesh::phy::{BandConfig, Demodulator, Modulator, TimingConfig};
use sonomesh::utils::consts::{AUDIO_BLOCK_SIZE, SAMPLE_RATE};
use sonomesh::utils::logging::init_logging;

#[derive(Parser)]
#[command(name = "sonomesh")]
#[command(about = "Acoustic mesh networking over speakers and microphones", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Band {
    /// 18 kHz band, 16 tones
    Ultrasonic,
    /// 1 kHz band, 8 tones
    Audible,
}

impl Band {
    fn config(self) -> BandConfig {
        match self {
            Band::Ultrasonic => BandConfig::ultrasonic(),
            Band::Audible => BandConfig::audible(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a message into a playable WAV file
    Send {
        /// Message text (mutually exclusive with --file)
        #[arg(short, long)]
        message: Option<String>,

        /// Input file to transmit
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output WAV path
        #[arg(short, long, default_value = "tx.wav")]
        output: PathBuf,

        /// Frequency band
        #[arg(short, long, value_enum, default_value_t = Band::Ultrasonic)]
        band: Band,

        /// Transmit priority (0-10)
        #[arg(short, long, default_value_t = 5)]
        priority: u8,

        /// Device identifier stamped into the logs
        #[arg(short, long, default_value = "node-1")]
        device: String,
    },

    /// Decode frames from a recorded WAV file
    Recv {
        /// Input WAV path
        input: PathBuf,

        /// Frequency band
        #[arg(short, long, value_enum, default_value_t = Band::Ultrasonic)]
        band: Band,

        /// Run the capture through the conditioning pipeline first
        #[arg(long)]
        condition: bool,
    },

    /// Offline self-test: modulate then demodulate in memory
    Loopback {
        /// Frequency band
        #[arg(short, long, value_enum, default_value_t = Band::Ultrasonic)]
        band: Band,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            message,
            file,
            output,
            band,
            priority,
            device,
        } => {
            let payload = match (message, file) {
                (Some(text), None) => text.into_bytes(),
                (None, Some(path)) => match fs::read(&path) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("cannot read {}: {e}", path.display());
                        std::process::exit(1);
                    }
                },
                _ => {
                    error!("provide exactly one of --message or --file");
                    std::process::exit(1);
                }
            };
            info!(
                "encoding {} bytes from {device} at priority {}",
                payload.len(),
                priority.min(10)
            );
            if let Err(e) = run_send(&payload, band.config(), &output) {
                error!("send failed: {e}");
                std::process::exit(1);
            }
        }
        Commands::Recv {
            input,
            band,
            condition,
        } => {
            if let Err(e) = run_recv(&input, band.config(), condition) {
                error!("recv failed: {e}");
                std::process::exit(1);
            }
        }
        Commands::Loopback { band } => run_loopback(band.config()),
    }
}

fn run_send(
    payload: &[u8],
    band: BandConfig,
    output: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let modulator = Modulator::new(band, TimingConfig::default());
    let gap = vec![0.0f32; SAMPLE_RATE as usize / 10];

    let mut samples = Vec::new();
    for frame in fragment(MessageType::Data, payload)? {
        let encoded = codec::FecCodec::default().encode(&frame.to_bytes());
        samples.extend(modulator.modulate(&encoded));
        samples.extend_from_slice(&gap);
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, spec)?;
    for &s in &samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;

    info!(
        "wrote {:.2} s of audio to {}",
        samples.len() as f32 / SAMPLE_RATE as f32,
        output.display()
    );
    Ok(())
}

fn run_recv(
    input: &PathBuf,
    band: BandConfig,
    condition: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::open(input)?;
    let samples: Vec<f32> = match reader.spec().sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (reader.spec().bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()?
        }
    };
    info!(
        "read {:.2} s of audio from {}",
        samples.len() as f32 / SAMPLE_RATE as f32,
        input.display()
    );

    let samples: Vec<f32> = if condition {
        let mut pipeline = SignalPipeline::new(band.clone(), SAMPLE_RATE as f32);
        samples
            .chunks(AUDIO_BLOCK_SIZE)
            .flat_map(|block| pipeline.process(block.to_vec()))
            .collect()
    } else {
        samples
    };

    let demodulator = Demodulator::new(band, TimingConfig::default());
    match demodulator.demodulate(&samples) {
        Ok(result) => match codec::decode_from_rx(&result.data) {
            Ok((frame, corrected)) => {
                info!(
                    "recovered {} bytes (seq {}, confidence {:.2}, {corrected} corrected)",
                    frame.payload.len(),
                    frame.sequence,
                    result.confidence
                );
                println!("{}", String::from_utf8_lossy(&frame.payload));
            }
            Err(e) => warn!("undecodable reception: {e}"),
        },
        Err(e) => warn!("no frames recovered: {e}"),
    }
    Ok(())
}

fn run_loopback(band: BandConfig) {
    let timing = TimingConfig::default();
    let modulator = Modulator::new(band.clone(), timing);
    let demodulator = Demodulator::new(band, timing);

    let payload = b"sonomesh loopback";
    let frame = fragment(MessageType::Data, payload)
        .expect("payload fits one frame")
        .remove(0);
    let encoded = codec::FecCodec::default().encode(&frame.to_bytes());
    let samples = modulator.modulate(&encoded);

    match demodulator.demodulate(&samples) {
        Ok(result) => match codec::decode_from_rx(&result.data) {
            Ok((frame, _)) if frame.payload == payload => {
                info!(
                    "loopback ok: {} samples, confidence {:.2}",
                    samples.len(),
                    result.confidence
                );
            }
            Ok((frame, _)) => {
                error!("loopback payload mismatch: {:?}", frame.payload);
                std::process::exit(1);
            }
            Err(e) => {
                error!("loopback decode failed: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!("loopback demodulation failed: {e}");
            std::process::exit(1);
        }
    }
}
