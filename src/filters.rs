//! Audio filter configuration for a single player.
//!
//! A node applies every filter block it receives, and forgets them whenever a
//! player moves to another node. [`FilterState`] therefore keeps the complete
//! configuration client-side, and [`FilterState::payload`] rebuilds the whole
//! outbound message on demand.

use crate::constants::EQUALIZER_BANDS;
use serde::Serialize;

/// Gain applied to a single equalizer band.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Band {
    /// Band index, between `0` and `14` inclusive.
    pub band: u8,
    /// Multiplier for this band, between `-0.25` and `1.0`.
    ///
    /// `0.0` leaves the band untouched.
    pub gain: f32,
}

/// Changes the speed, pitch, and rate of playback.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Timescale {
    /// Playback speed multiplier.
    pub speed: f64,
    /// Pitch multiplier.
    pub pitch: f64,
    /// Rate multiplier (speed and pitch together).
    pub rate: f64,
}

impl Default for Timescale {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

/// Oscillates the volume of the track.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Tremolo {
    /// Oscillation frequency, in Hz.
    pub frequency: f32,
    /// Depth of the effect, between `0.0` (off) and `1.0`.
    pub depth: f32,
}

impl Default for Tremolo {
    /// Lavalink's default tremolo, which *is* audible.
    fn default() -> Self {
        Self {
            frequency: 2.0,
            depth: 0.5,
        }
    }
}

/// Attempts to remove a band of frequencies, typically vocals.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    /// Effect strength.
    pub level: f32,
    /// Effect strength applied to the mono signal.
    pub mono_level: f32,
    /// Centre of the removed band, in Hz.
    pub filter_band: f32,
    /// Width of the removed band, in Hz.
    pub filter_width: f32,
}

impl Default for Karaoke {
    fn default() -> Self {
        Self {
            level: 1.0,
            mono_level: 1.0,
            filter_band: 220.0,
            filter_width: 100.0,
        }
    }
}

/// Pans the audio around the stereo field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    /// Rotation frequency, in Hz. `0.0` disables the effect.
    pub rotation_hz: f64,
}

/// Trigonometric distortion. Unset fields are omitted, leaving the node's defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Distortion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
}

impl Distortion {
    fn is_set(&self) -> bool {
        [
            self.sin_offset,
            self.sin_scale,
            self.cos_offset,
            self.cos_scale,
            self.tan_offset,
            self.tan_scale,
            self.offset,
            self.scale,
        ]
        .iter()
        .any(Option::is_some)
    }
}

/// Complete filter configuration of one player.
///
/// A new state is neutral: every filter is disabled and volume is `1.0`.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterState {
    volume: f32,
    equalizer: [f32; EQUALIZER_BANDS],
    timescale: Timescale,
    tremolo: Tremolo,
    karaoke: Option<Karaoke>,
    rotation: Rotation,
    distortion: Distortion,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            equalizer: [0.0; EQUALIZER_BANDS],
            timescale: Timescale::default(),
            tremolo: Tremolo {
                depth: 0.0,
                ..Tremolo::default()
            },
            karaoke: None,
            rotation: Rotation::default(),
            distortion: Distortion::default(),
        }
    }
}

impl FilterState {
    /// Creates a neutral filter state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the filter volume multiplier.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sets the filter volume multiplier, clamped to `[0.0, 5.0]`.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 5.0);
    }

    /// Returns the gain of every equalizer band.
    pub fn equalizer(&self) -> &[f32; EQUALIZER_BANDS] {
        &self.equalizer
    }

    /// Sets the gain of one band, clamped to `[-0.25, 1.0]`.
    ///
    /// Bands outside the equalizer are ignored.
    pub fn set_band(&mut self, band: Band) {
        if let Some(gain) = self.equalizer.get_mut(band.band as usize) {
            *gain = band.gain.clamp(-0.25, 1.0);
        }
    }

    /// Replaces the whole equalizer: bands not listed are reset to `0.0`.
    pub fn set_equalizer(&mut self, bands: &[Band]) {
        self.equalizer = [0.0; EQUALIZER_BANDS];
        for band in bands {
            self.set_band(*band);
        }
    }

    /// Returns the timescale settings.
    pub fn timescale(&self) -> Timescale {
        self.timescale
    }

    /// Sets the timescale settings.
    pub fn set_timescale(&mut self, timescale: Timescale) {
        self.timescale = timescale;
    }

    /// Returns the tremolo settings.
    pub fn tremolo(&self) -> Tremolo {
        self.tremolo
    }

    /// Sets the tremolo settings.
    pub fn set_tremolo(&mut self, tremolo: Tremolo) {
        self.tremolo = tremolo;
    }

    /// Returns the karaoke settings, if any.
    pub fn karaoke(&self) -> Option<Karaoke> {
        self.karaoke
    }

    /// Sets or removes the karaoke filter.
    pub fn set_karaoke(&mut self, karaoke: Option<Karaoke>) {
        self.karaoke = karaoke;
    }

    /// Returns the rotation settings.
    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Sets the rotation settings.
    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }

    /// Returns the distortion settings.
    pub fn distortion(&self) -> Distortion {
        self.distortion
    }

    /// Sets the distortion settings.
    pub fn set_distortion(&mut self, distortion: Distortion) {
        self.distortion = distortion;
    }

    /// Resets every filter to neutral.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether any band has a non-zero gain.
    pub fn is_equalizer_enabled(&self) -> bool {
        self.equalizer.iter().any(|gain| *gain != 0.0)
    }

    /// Whether any timescale field differs from `1.0`.
    pub fn is_timescale_enabled(&self) -> bool {
        let Timescale { speed, pitch, rate } = self.timescale;
        speed != 1.0 || pitch != 1.0 || rate != 1.0
    }

    /// Whether tremolo depth is non-zero.
    pub fn is_tremolo_enabled(&self) -> bool {
        self.tremolo.depth != 0.0
    }

    /// Whether karaoke is set.
    pub fn is_karaoke_enabled(&self) -> bool {
        self.karaoke.is_some()
    }

    /// Whether rotation frequency is non-zero.
    pub fn is_rotation_enabled(&self) -> bool {
        self.rotation.rotation_hz != 0.0
    }

    /// Whether any distortion field is set.
    pub fn is_distortion_enabled(&self) -> bool {
        self.distortion.is_set()
    }

    /// Builds the outbound filter block for this state.
    ///
    /// `volume` and the full `equalizer` are always present, so that sending a
    /// payload also cancels any bands which were previously active. Every other
    /// filter is included only while enabled.
    pub fn payload(&self) -> FiltersPayload {
        FiltersPayload {
            volume: self.volume,
            equalizer: self
                .equalizer
                .iter()
                .enumerate()
                .map(|(band, gain)| Band {
                    band: band as u8,
                    gain: *gain,
                })
                .collect(),
            timescale: Some(self.timescale).filter(|_| self.is_timescale_enabled()),
            tremolo: Some(self.tremolo).filter(|_| self.is_tremolo_enabled()),
            karaoke: self.karaoke,
            rotation: Some(self.rotation).filter(|_| self.is_rotation_enabled()),
            distortion: Some(self.distortion).filter(|_| self.is_distortion_enabled()),
        }
    }
}

/// Filter block of a `filters` message, as built by [`FilterState::payload`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct FiltersPayload {
    pub volume: f32,
    pub equalizer: Vec<Band>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Tremolo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<Karaoke>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn keys(state: &FilterState) -> Vec<String> {
        match serde_json::to_value(state.payload()).unwrap() {
            Value::Object(map) => {
                let mut keys: Vec<String> = map.keys().cloned().collect();
                keys.sort();
                keys
            },
            other => panic!("payload was not an object: {:?}", other),
        }
    }

    #[test]
    fn neutral_payload_has_volume_and_equalizer_only() {
        let state = FilterState::new();

        assert_eq!(keys(&state), vec!["equalizer", "volume"]);
        assert!(!state.is_equalizer_enabled());

        let payload = state.payload();
        assert_eq!(payload.equalizer.len(), EQUALIZER_BANDS);
        assert!(payload.equalizer.iter().all(|b| b.gain == 0.0));
        assert_eq!(payload.volume, 1.0);
    }

    #[test]
    fn enabled_filters_appear_in_payload() {
        let mut state = FilterState::new();
        state.set_timescale(Timescale {
            speed: 1.25,
            ..Timescale::default()
        });
        state.set_rotation(Rotation { rotation_hz: 0.2 });
        state.set_karaoke(Some(Karaoke::default()));

        assert_eq!(
            keys(&state),
            vec!["equalizer", "karaoke", "rotation", "timescale", "volume"]
        );

        let json = serde_json::to_value(state.payload()).unwrap();
        assert_eq!(json["rotation"]["rotationHz"], 0.2);
        assert_eq!(json["karaoke"]["filterBand"], 220.0);
    }

    #[test]
    fn tremolo_follows_depth() {
        let mut state = FilterState::new();
        assert!(!state.is_tremolo_enabled());

        state.set_tremolo(Tremolo::default());
        assert!(state.is_tremolo_enabled());
        assert!(keys(&state).contains(&"tremolo".to_string()));

        state.set_tremolo(Tremolo {
            frequency: 4.0,
            depth: 0.0,
        });
        assert!(!keys(&state).contains(&"tremolo".to_string()));
    }

    #[test]
    fn distortion_needs_a_single_field() {
        let mut state = FilterState::new();
        state.set_distortion(Distortion {
            tan_scale: Some(0.5),
            ..Distortion::default()
        });

        let json = serde_json::to_value(state.payload()).unwrap();
        assert_eq!(json["distortion"], serde_json::json!({ "tanScale": 0.5 }));
    }

    #[test]
    fn equalizer_gains_are_clamped_and_replaced() {
        let mut state = FilterState::new();
        state.set_band(Band { band: 3, gain: 2.0 });
        state.set_band(Band { band: 40, gain: 0.5 });

        assert!(state.is_equalizer_enabled());
        assert_eq!(state.equalizer()[3], 1.0);

        state.set_equalizer(&[Band {
            band: 0,
            gain: -1.0,
        }]);
        assert_eq!(state.equalizer()[0], -0.25);
        assert_eq!(state.equalizer()[3], 0.0);

        state.clear();
        assert_eq!(state, FilterState::default());
    }
}
