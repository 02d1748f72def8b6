//! Transport data records shared across the engine

use std::fmt;

/// Tempo used when the host does not report one
pub const DEFAULT_BPM: f64 = 120.0;

/// Position used when the host does not report one
pub const DEFAULT_PPQ_POSITION: f64 = 0.0;

/// OSC address carrying the play state (int32 0/1)
pub const PLAY_ADDRESS: &str = "/play";

/// OSC address carrying the tempo (float32 BPM)
pub const TEMPO_ADDRESS: &str = "/tempo";

/// OSC address carrying the position (float32 PPQ outbound, int triplet inbound)
pub const POSITION_ADDRESS: &str = "/position";

/// Immutable transport sample handed from the audio thread to the sender
///
/// Small and `Copy` so it moves through the queue without allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
    pub is_playing: bool,
    /// Beats per minute
    pub tempo: f32,
    /// Position in quarter notes (PPQ)
    pub position: f32,
}

impl From<&LocalTransportState> for TransportSnapshot {
    fn from(state: &LocalTransportState) -> Self {
        Self {
            is_playing: state.is_playing,
            tempo: state.bpm as f32,
            position: state.ppq_position as f32,
        }
    }
}

/// Playhead information reported by the host for one processing block
///
/// Missing fields fall back to [`DEFAULT_BPM`] / [`DEFAULT_PPQ_POSITION`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostPosition {
    pub is_playing: bool,
    pub bpm: Option<f64>,
    pub ppq_position: Option<f64>,
    /// (numerator, denominator)
    pub time_signature: Option<(i32, i32)>,
}

impl HostPosition {
    /// Playing position with every field reported
    pub fn playing(bpm: f64, ppq_position: f64) -> Self {
        Self {
            is_playing: true,
            bpm: Some(bpm),
            ppq_position: Some(ppq_position),
            time_signature: None,
        }
    }

    /// Stopped position with every field reported
    pub fn stopped(bpm: f64, ppq_position: f64) -> Self {
        Self {
            is_playing: false,
            ..Self::playing(bpm, ppq_position)
        }
    }
}

/// Local transport as seen by the audio thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTransportState {
    pub is_playing: bool,
    pub bpm: f64,
    pub ppq_position: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
}

impl Default for LocalTransportState {
    fn default() -> Self {
        Self {
            is_playing: false,
            bpm: DEFAULT_BPM,
            ppq_position: DEFAULT_PPQ_POSITION,
            time_sig_numerator: 4,
            time_sig_denominator: 4,
        }
    }
}

impl LocalTransportState {
    /// Bar / beat / sixteenth derived from the PPQ position, all 1-based
    pub fn musical_position(&self) -> MusicalPosition {
        let numerator = self.time_sig_numerator.max(1) as f64;
        let ppq = self.ppq_position.max(0.0);
        MusicalPosition {
            bar: (ppq / numerator).floor() as i32 + 1,
            beat: (ppq.floor() % numerator) as i32 + 1,
            sub_beat: ((ppq * 4.0).floor() % 4.0) as i32 + 1,
        }
    }
}

/// Bar | beat | sub-beat triplet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalPosition {
    pub bar: i32,
    pub beat: i32,
    pub sub_beat: i32,
}

impl Default for MusicalPosition {
    fn default() -> Self {
        Self {
            bar: 1,
            beat: 1,
            sub_beat: 1,
        }
    }
}

impl fmt::Display for MusicalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | {}", self.bar, self.beat, self.sub_beat)
    }
}

/// Transport reported by the remote peer
///
/// `bar`, `beat` and `sub_beat` always change together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlaveTransportState {
    pub is_playing: bool,
    pub bpm: f64,
    pub bar: i32,
    pub beat: i32,
    pub sub_beat: i32,
}

impl Default for SlaveTransportState {
    fn default() -> Self {
        Self {
            is_playing: false,
            bpm: DEFAULT_BPM,
            bar: 1,
            beat: 1,
            sub_beat: 1,
        }
    }
}

impl SlaveTransportState {
    pub fn position(&self) -> MusicalPosition {
        MusicalPosition {
            bar: self.bar,
            beat: self.beat,
            sub_beat: self.sub_beat,
        }
    }
}

impl fmt::Display for SlaveTransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tempo: {} | Location: {} | {}",
            self.bpm,
            self.position(),
            if self.is_playing { "Playing" } else { "Stopped" }
        )
    }
}
