/// Playback effects
///
/// Linear gain ramps, master volume, and the per-playback option set that carries
/// rate, gain, fade-in, delay and time limits.
pub mod fade;
pub mod volume;

use std::time::Duration;

pub use fade::GainRamp;
pub use volume::MasterVolume;

/// Options applied to one playback
#[derive(Debug, Clone, PartialEq)]
pub struct PlayOptions {
    /// Voice gain before master volume (0.0-1.0)
    pub volume: f32,

    /// Playback rate multiplier
    pub rate: f32,

    /// Linear fade-in from silence
    pub fade_in_ms: Option<u64>,

    /// Silence before the sound starts
    pub delay_ms: u64,

    /// Position to start from
    pub offset_ms: u64,

    /// Maximum playing time
    pub limit_ms: Option<u64>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            volume: 1.0,
            rate: 1.0,
            fade_in_ms: None,
            delay_ms: 0,
            offset_ms: 0,
            limit_ms: None,
        }
    }
}

impl PlayOptions {
    /// Set volume
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Set playback rate; non-positive rates fall back to normal speed
    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = if rate > 0.0 { rate } else { 1.0 };
        self
    }

    /// Set fade in duration
    pub fn with_fade_in(mut self, ms: u64) -> Self {
        self.fade_in_ms = Some(ms);
        self
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn with_offset(mut self, ms: u64) -> Self {
        self.offset_ms = ms;
        self
    }

    /// Set time limit
    pub fn with_limit(mut self, ms: u64) -> Self {
        self.limit_ms = Some(ms);
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let opts = PlayOptions::default()
            .with_fade_in(100)
            .with_volume(0.8)
            .with_rate(1.25)
            .with_limit(10_000);

        assert_eq!(opts.fade_in_ms, Some(100));
        assert_eq!(opts.volume, 0.8);
        assert_eq!(opts.rate, 1.25);
        assert_eq!(opts.limit(), Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn test_volume_and_rate_clamping() {
        let opts = PlayOptions::default().with_volume(1.5).with_rate(0.0);
        assert_eq!(opts.volume, 1.0);
        assert_eq!(opts.rate, 1.0);

        let opts = PlayOptions::default().with_volume(-0.5);
        assert_eq!(opts.volume, 0.0);
    }
}
