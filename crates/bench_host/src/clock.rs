/// Logical clock driving time-dependent stage behaviour.
///
/// Time advances by a fixed delta per frame while playing, so a run is
/// reproducible regardless of how long each frame actually takes.
#[derive(Debug, Clone)]
pub struct LogicalClock {
    /// Seconds per frame.
    delta: f64,
    /// Logical time since the last stop.
    pub time: f64,
    /// Frames executed since the last stop.
    pub frame: u64,
    playing: bool,
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new(60)
    }
}

impl LogicalClock {
    /// Creates a playing clock at `framerate` frames per second.
    #[must_use]
    pub fn new(framerate: u32) -> Self {
        Self {
            delta: 1.0 / f64::from(framerate.max(1)),
            time: 0.0,
            frame: 0,
            playing: true,
        }
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    /// Pauses the clock and rewinds time and frame counter to zero.
    pub fn stop(&mut self) {
        self.playing = false;
        self.time = 0.0;
        self.frame = 0;
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Advances one frame and returns the new 1-based frame index.
    pub fn tick(&mut self) -> u64 {
        self.frame += 1;
        if self.playing {
            self.time += self.delta;
        }
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_rewinds_and_play_resumes() {
        let mut clock = LogicalClock::new(50);
        clock.tick();
        clock.tick();
        assert_eq!(clock.frame, 2);
        assert!((clock.time - 0.04).abs() < 1e-12);

        clock.stop();
        assert_eq!(clock.frame, 0);
        assert!(clock.time.abs() < f64::EPSILON);
        assert!(!clock.is_playing());

        // Frames still count while paused, time does not.
        assert_eq!(clock.tick(), 1);
        assert!(clock.time.abs() < f64::EPSILON);

        clock.play();
        assert_eq!(clock.tick(), 2);
        assert!((clock.time - 0.02).abs() < 1e-12);
    }
}
