/// Master volume
///
/// Applied on top of every voice's own gain. Stored as raw `f32` bits so readers never
/// take a lock.
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct MasterVolume {
    bits: AtomicU32,
}

impl MasterVolume {
    pub fn new(level: f32) -> Self {
        Self {
            bits: AtomicU32::new(level.clamp(0.0, 1.0).to_bits()),
        }
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Set the level, clamped to 0.0-1.0
    pub fn set_level(&self, level: f32) {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.level() == 0.0
    }

    /// Effective gain for a voice at `gain`
    pub fn apply(&self, gain: f32) -> f32 {
        (gain.clamp(0.0, 1.0) * self.level()).clamp(0.0, 1.0)
    }
}

impl Default for MasterVolume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_clamping() {
        let volume = MasterVolume::new(1.5);
        assert_eq!(volume.level(), 1.0);

        volume.set_level(-0.5);
        assert_eq!(volume.level(), 0.0);
        assert!(volume.is_muted());

        volume.set_level(f32::NAN);
        assert_eq!(volume.level(), 0.0);
    }

    #[test]
    fn test_apply_scales_gain() {
        let volume = MasterVolume::new(0.5);
        assert_eq!(volume.apply(0.8), 0.4);
        assert_eq!(volume.apply(2.0), 0.5);
    }

    #[test]
    fn test_default_volume() {
        let volume = MasterVolume::default();
        assert_eq!(volume.level(), 1.0);
        assert!(!volume.is_muted());
    }
}
