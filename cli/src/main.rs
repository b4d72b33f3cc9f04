use clap::{Parser, Subcommand, ValueEnum};
use hound::WavSpec;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

use softfax_core::capture::CaptureConfig;
use softfax_core::fax::frames::{self, DisCapabilities};
use softfax_core::fax::{spawn_answer, AnswerMode};
use softfax_core::line::{LineInit, LineSignals, ScriptedDevice};
use softfax_core::registry::{CAPTURE, RATECONV, SIGGEN};
use softfax_core::resample::RateConverterConfig;
use softfax_core::siggen::SigGenConfig;
use softfax_core::{
    Buffer, Command, Driver, FaxConfig, Graph, LineConfig, ModemError, ModuleConfig, Registry,
    Reply, SessionEvent, SignalBus, UnitType, SAMPLE_RATE,
};

/// Largest up/down factor accepted for tone resampling
const MAX_RATE_FACTOR: u32 = 160;

#[derive(Debug, Error)]
enum CliError {
    #[error("modem: {0}")]
    Modem(#[from] ModemError),

    #[error("wav: {0}")]
    Wav(#[from] hound::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidArgument(String),
}

#[derive(Parser)]
#[command(name = "softfax")]
#[command(about = "Software fax modem: answer-side T.30 over V.21")]
struct Cli {
    /// Debug logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// CED, CSI + DIS, listen, hang up
    Linear,
    /// Phase B negotiation with timeouts and retries
    Negotiate,
}

impl From<Mode> for AnswerMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Linear => AnswerMode::Linear,
            Mode::Negotiate => AnswerMode::Negotiate,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a call on a silent line and record what we transmit
    Answer {
        /// Output WAV file (8 kHz, 16-bit mono)
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value = "linear")]
        mode: Mode,

        /// Maximum line time to simulate
        #[arg(short, long, default_value = "10")]
        seconds: u64,

        /// Local identifier sent in CSI
        #[arg(long, default_value = "+1 555 0100")]
        id: String,

        /// Samples per driver step
        #[arg(short, long, default_value = "200")]
        quantum: usize,

        /// Run the AT initialisation handshake against a simulated modem first
        #[arg(long)]
        line_init: bool,
    },

    /// Print the CSI and DIS frames we would send, as hex
    Dis {
        /// Local identifier sent in CSI
        #[arg(long, default_value = "+1 555 0100")]
        id: String,
    },

    /// Generate a tone and resample it to WAV
    Tone {
        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Tone frequency in Hz
        #[arg(short, long, default_value = "2100")]
        frequency: f32,

        /// Output sample rate in Hz
        #[arg(short, long, default_value = "8000")]
        rate: u32,

        #[arg(short, long, default_value = "1")]
        seconds: u32,

        /// Peak amplitude
        #[arg(long, default_value = "8000")]
        scale: f32,
    },
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Answer {
            output,
            mode,
            seconds,
            id,
            quantum,
            line_init,
        } => answer_command(&output, mode, seconds, id, quantum, line_init)?,
        Commands::Dis { id } => dis_command(&id),
        Commands::Tone {
            output,
            frequency,
            rate,
            seconds,
            scale,
        } => tone_command(&output, frequency, rate, seconds, scale)?,
    }

    Ok(())
}

fn write_wav(path: &Path, rate: u32, samples: &[i16]) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let file = File::create(path)?;
    let mut writer = hound::WavWriter::new(file, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn answer_command(
    output: &Path,
    mode: Mode,
    seconds: u64,
    id: String,
    quantum: usize,
    line_init: bool,
) -> Result<(), CliError> {
    let config = FaxConfig {
        local_id: id,
        ..FaxConfig::default()
    };
    let mut driver = Driver::new(quantum)?;

    let line_signals = if line_init {
        let signals = LineSignals::allocate(driver.signals_mut())?;
        let line = LineConfig::default();
        let device = ScriptedDevice::agreeable(line.init_commands.len());
        driver.spawn(LineInit::new(device, &line, signals))?;
        Some(signals)
    } else {
        None
    };
    spawn_answer(&mut driver, &config, mode.into(), line_signals)?;

    let audio = driver.run_until_done(seconds * SAMPLE_RATE as u64)?;
    for event in driver.take_events() {
        match event {
            SessionEvent::LineReady => println!("line ready"),
            SessionEvent::FrameSent { fcf } => println!("sent frame {:#04x}", fcf),
            SessionEvent::FrameReceived { fcf } => println!("received frame {:#04x}", fcf),
            SessionEvent::CallTerminated { reason } => println!("call terminated: {}", reason),
        }
    }

    write_wav(output, SAMPLE_RATE as u32, &audio)?;
    println!(
        "Wrote {} samples ({:.2} s) to {}",
        audio.len(),
        audio.len() as f64 / SAMPLE_RATE as f64,
        output.display()
    );
    Ok(())
}

fn dis_command(id: &str) {
    println!("CSI: {}", hex(&frames::build_csi(id)));
    println!("DIS: {}", hex(&frames::build_dis(&DisCapabilities::default())));
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Samples in `seconds` at `rate`, widened before multiplying.
fn sample_count(rate: u32, seconds: u32) -> usize {
    rate as usize * seconds as usize
}

fn tone_command(
    output: &Path,
    frequency: f32,
    rate: u32,
    seconds: u32,
    scale: f32,
) -> Result<(), CliError> {
    if rate == 0 {
        return Err(CliError::InvalidArgument(String::from("rate must be non-zero")));
    }
    let g = gcd(rate, SAMPLE_RATE as u32);
    let (up, down) = (rate / g, SAMPLE_RATE as u32 / g);
    if up > MAX_RATE_FACTOR || down > MAX_RATE_FACTOR {
        return Err(CliError::InvalidArgument(format!(
            "{} Hz needs a {}/{} conversion from {} Hz, factors above {} are not supported",
            rate, up, down, SAMPLE_RATE, MAX_RATE_FACTOR
        )));
    }
    log::info!("tone: {} Hz at {} Hz output, ratio {}/{}", frequency, rate, up, down);

    let registry = Registry::with_builtins();
    let mut graph = Graph::new();
    let mut bus = SignalBus::new();
    let total = sample_count(rate, seconds);

    let tone = graph.insert(registry.create_named(
        SIGGEN,
        &ModuleConfig::SigGen(SigGenConfig::tone(frequency, scale)),
    )?);
    let conv = graph.insert(registry.create_named(
        RATECONV,
        &ModuleConfig::RateConverter(RateConverterConfig::lowpass(up as usize, down as usize, 16)),
    )?);
    let sink = graph.insert(registry.create_named(
        CAPTURE,
        &ModuleConfig::Capture(CaptureConfig::new(UnitType::Samples16, total.max(1))),
    )?);
    graph.connect(tone, conv)?;
    graph.connect(conv, sink)?;

    let mut samples = Vec::with_capacity(total);
    let chunk = (rate as usize / 50).max(1);
    while samples.len() < total {
        let wanted = chunk.min(total - samples.len());
        graph.demand(sink, wanted, &mut bus)?;
        match graph.command(sink, Command::Drain)? {
            Reply::Data(Buffer::Samples(out)) if !out.is_empty() => samples.extend(out),
            _ => {
                return Err(CliError::InvalidArgument(String::from(
                    "rate converter produced no output",
                )))
            }
        }
    }

    write_wav(output, rate, &samples)?;
    println!("Wrote {} samples at {} Hz to {}", samples.len(), rate, output.display());
    Ok(())
}
