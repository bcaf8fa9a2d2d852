use std::time::{Duration, Instant};

/// Caps a loop to a target rate by sleeping out the rest of each frame.
///
/// Owned by one loop; nothing is shared between the editor and the
/// simulation thread. A frame that overruns its slot does not try to catch
/// up: the next deadline is measured from when the overrun frame ended.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frame: Duration,
    deadline: Instant,
    last: Instant,
    frame_index: u64,
}

impl FrameClock {
    /// `fps` of zero disables pacing.
    pub fn new(fps: u32) -> Self {
        let now = Instant::now();
        let frame = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / fps as f64)
        };
        Self {
            frame,
            deadline: now + frame,
            last: now,
            frame_index: 0,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Sleeps until the current frame's slot ends and returns the seconds
    /// elapsed since the previous tick.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        if now < self.deadline {
            std::thread::sleep(self.deadline - now);
        }
        let end = Instant::now();
        self.deadline = end.max(self.deadline) + self.frame;
        let dt = end.saturating_duration_since(self.last);
        self.last = end;
        self.frame_index = self.frame_index.wrapping_add(1);
        dt.as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_rate_to_target() {
        let mut clock = FrameClock::new(100);
        let start = Instant::now();
        for _ in 0..5 {
            clock.tick();
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(clock.frame_index(), 5);
    }

    #[test]
    fn zero_fps_does_not_sleep() {
        let mut clock = FrameClock::new(0);
        assert_eq!(clock.frame_duration(), Duration::ZERO);
        let start = Instant::now();
        for _ in 0..1000 {
            clock.tick();
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
