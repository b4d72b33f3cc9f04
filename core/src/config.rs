//! Session configuration. Durations are kept in milliseconds and turned into
//! sample ticks where the engine needs them.

use crate::fax::frames::DisCapabilities;
use crate::SAMPLE_RATE;

/// Milliseconds to sample ticks at `SAMPLE_RATE`.
pub fn ms_to_ticks(ms: u64) -> u64 {
    ms * SAMPLE_RATE as u64 / 1000
}

#[derive(Debug, Clone)]
pub struct FaxConfig {
    /// Sent in CSI, at most 20 characters
    pub local_id: String,
    pub capabilities: DisCapabilities,
    pub ced_frequency: f32,
    pub ced_amplitude: f32,
    /// Silence between answering and CED
    pub pre_ced_ms: u64,
    pub ced_ms: u64,
    /// Gap between the end of CED and the first V.21 frame
    pub post_ced_ms: u64,
    /// Time allowed for DIS to leave the line (linear answer)
    pub dis_hold_ms: u64,
    /// Time spent listening for DCS/DTC (linear answer)
    pub hunt_ms: u64,
    /// No-flag response timeout
    pub t4_ms: u64,
    /// Frame-complete timeout once flags have been heard
    pub t2_ms: u64,
    /// DIS repetitions after T4 expiry before giving up
    pub dis_retries: u32,
    /// CRP requests after FCS errors before giving up
    pub crp_retries: u32,
    pub preamble_flags: usize,
    pub v21_amplitude: f32,
}

impl Default for FaxConfig {
    fn default() -> Self {
        Self {
            local_id: String::from("+1 555 0100"),
            capabilities: DisCapabilities::default(),
            ced_frequency: 2100.0,
            ced_amplitude: 8000.0,
            pre_ced_ms: 200,
            ced_ms: 3800,
            post_ced_ms: 75,
            dis_hold_ms: 1000,
            hunt_ms: 1000,
            t4_ms: 3000,
            t2_ms: 6000,
            dis_retries: 3,
            crp_retries: 3,
            preamble_flags: 38,
            v21_amplitude: 8000.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineConfig {
    /// Sent in order; each must be answered with `OK`
    pub init_commands: Vec<String>,
    pub response_timeout_ms: u64,
    /// Extra attempts per command after a timeout or error
    pub retries: u32,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            init_commands: vec![
                String::from("ATZ"),
                String::from("ATE0"),
                String::from("AT+FCLASS=1"),
            ],
            response_timeout_ms: 2000,
            retries: 2,
        }
    }
}
