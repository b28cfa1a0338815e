/// Linear gain ramps
///
/// Fades run on their own short-lived thread and step the voice gain; the voice itself
/// is never touched mid-sample.
use std::thread;
use std::time::Duration;

use crate::audio_system::output::Voice;

/// Number of gain updates per ramp
const STEPS: u32 = 50;

/// Shortest interval between gain updates
const MIN_STEP: Duration = Duration::from_millis(2);

/// Linear gain change over a fixed duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainRamp {
    pub from: f32,
    pub to: f32,
    pub duration: Duration,
}

impl GainRamp {
    pub fn new(from: f32, to: f32, duration: Duration) -> Self {
        Self { from, to, duration }
    }

    /// Ramp from silence up to `target`
    pub fn fade_in(target: f32, duration: Duration) -> Self {
        Self::new(0.0, target, duration)
    }

    /// Ramp from `current` down to silence
    pub fn fade_out(current: f32, duration: Duration) -> Self {
        Self::new(current, 0.0, duration)
    }

    /// Gain at `elapsed` into the ramp
    pub fn gain_at(&self, elapsed: Duration) -> f32 {
        if self.duration.is_zero() || elapsed >= self.duration {
            return self.to;
        }
        let progress = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        self.from + (self.to - self.from) * progress
    }

    fn step_count(&self) -> u32 {
        let max_steps = (self.duration.as_millis() / MIN_STEP.as_millis()).max(1) as u32;
        STEPS.min(max_steps)
    }

    /// Step the voice through the ramp, blocking the calling thread.
    ///
    /// Stops early if the voice finishes or `keep_going` returns false.
    pub fn run<F>(&self, voice: &dyn Voice, keep_going: F)
    where
        F: Fn() -> bool,
    {
        let steps = self.step_count();
        let step = self.duration / steps;
        voice.set_gain(self.from);
        for i in 1..=steps {
            thread::sleep(step);
            if voice.is_finished() || !keep_going() {
                return;
            }
            let gain = if i == steps { self.to } else { self.gain_at(step * i) };
            voice.set_gain(gain);
        }
    }
}
