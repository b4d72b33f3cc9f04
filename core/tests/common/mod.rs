#![allow(dead_code)]

use std::collections::VecDeque;

use softfax_core::capture::{Capture, CaptureConfig};
use softfax_core::framing;
use softfax_core::fsk::{FskConfig, FskModulator, V21Channel};
use softfax_core::hdlc::BROADCAST_ADDRESS;
use softfax_core::{Block, Buffer, Command, Graph, Reply, SignalBus, UnitType};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Flags, then each frame (address added) followed by a flag, then one more
/// flag so the demodulator's lag cannot swallow the last closing flag.
pub fn hdlc_bits(frames: &[Vec<u8>], preamble_flags: usize) -> Vec<u8> {
    let mut bits = Vec::new();
    for _ in 0..preamble_flags {
        framing::push_flag(&mut bits);
    }
    for frame in frames {
        let mut payload = vec![BROADCAST_ADDRESS];
        payload.extend_from_slice(frame);
        framing::push_stuffed_frame(&payload, &mut bits);
        framing::push_flag(&mut bits);
    }
    framing::push_flag(&mut bits);
    bits
}

/// Like `hdlc_bits` for one frame, but with a payload bit flipped after the
/// FCS was computed.
pub fn corrupted_hdlc_bits(frame: &[u8], preamble_flags: usize) -> Vec<u8> {
    let mut payload = vec![BROADCAST_ADDRESS];
    payload.extend_from_slice(frame);
    let fcs = framing::fcs16(&payload);
    payload.push(fcs as u8);
    payload.push((fcs >> 8) as u8);
    // Last FIF byte, lowest bit
    let target = payload.len() - 3;
    payload[target] ^= 0x01;

    let mut bits = Vec::new();
    for _ in 0..preamble_flags {
        framing::push_flag(&mut bits);
    }
    let mut ones = 0;
    for byte in payload {
        for i in 0..8 {
            let bit = byte >> i & 1;
            bits.push(bit);
            ones = if bit == 1 { ones + 1 } else { 0 };
            if ones == 5 {
                bits.push(0);
                ones = 0;
            }
        }
    }
    framing::push_flag(&mut bits);
    framing::push_flag(&mut bits);
    bits
}

/// V.21 channel 2 audio for `bits`, through the crate's own modulator.
pub fn modulate(bits: &[u8]) -> Vec<i16> {
    let mut graph = Graph::new();
    let mut bus = SignalBus::new();
    let modulator = graph.insert(Box::new(
        FskModulator::new(FskConfig::v21(V21Channel::Channel2)).expect("Failed to create modulator"),
    ));
    let sink = graph.insert(Box::new(
        Capture::new(CaptureConfig::new(UnitType::Samples16, bits.len() * 30))
            .expect("Failed to create capture"),
    ));
    graph.connect(modulator, sink).expect("Failed to connect");
    graph
        .push(modulator, Block::BitsUnpacked(bits), &mut bus)
        .expect("Failed to modulate");
    match graph.command(sink, Command::Drain).expect("Failed to drain") {
        Reply::Data(Buffer::Samples(samples)) => samples,
        other => panic!("unexpected reply {:?}", other),
    }
}

/// The far end of the line: plays queued responses, one per turn.
pub struct Remote {
    responses: VecDeque<Vec<i16>>,
    playing: VecDeque<i16>,
}

impl Remote {
    pub fn new(responses: Vec<Vec<i16>>) -> Self {
        Self {
            responses: responses.into(),
            playing: VecDeque::new(),
        }
    }

    pub fn is_playing(&self) -> bool {
        !self.playing.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }

    /// Start the next response; false when the script is exhausted.
    pub fn respond(&mut self) -> bool {
        match self.responses.pop_front() {
            Some(audio) => {
                // A short gap before the carrier comes up
                self.playing.extend(std::iter::repeat(0).take(400));
                self.playing.extend(audio);
                true
            }
            None => false,
        }
    }

    pub fn next(&mut self, n: usize) -> Vec<i16> {
        (0..n).map(|_| self.playing.pop_front().unwrap_or(0)).collect()
    }
}
