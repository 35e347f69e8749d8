use duplex_transport::{AudioArc, Mixer};

const END_TOLERANCE: f64 = 1e-9;

/// Plays one in-memory source placed at `start` on the timeline.
///
/// The mixer walks track time from `t0` towards `t1` (backwards when
/// `t1 < t0`), advancing `speed / rate` seconds per output frame and
/// interpolating linearly between source frames.
pub struct ClipMixer {
    source: AudioArc,
    rate: u32,
    /// Track time of source frame 0.
    start: f64,
    gain: f32,
    t0: f64,
    t1: f64,
    speed: f64,
    /// Position is `anchor + steps * step` so long runs do not accumulate drift.
    anchor: f64,
    steps: u64,
    buffers: Vec<Vec<f32>>,
    produced: usize,
}

impl ClipMixer {
    /// Prepare `source` for a stream running at `stream_rate`, resampling it
    /// once up front if the rates differ.
    pub fn new(source: AudioArc, stream_rate: u32) -> anyhow::Result<Self> {
        let source = source.resample(stream_rate)?;
        let channels = source.channels() as usize;
        Ok(Self {
            source,
            rate: stream_rate,
            start: 0.0,
            gain: 1.0,
            t0: 0.0,
            t1: f64::INFINITY,
            speed: 1.0,
            anchor: 0.0,
            steps: 0,
            buffers: vec![Vec::new(); channels],
            produced: 0,
        })
    }

    pub fn with_start(mut self, start: f64) -> Self {
        self.start = start;
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn position(&self) -> f64 {
        self.anchor + self.steps as f64 * self.step()
    }

    fn reversed(&self) -> bool {
        self.t1 < self.t0
    }

    fn step(&self) -> f64 {
        let step = self.speed / self.rate as f64;
        if self.reversed() { -step } else { step }
    }

    fn finished(&self, position: f64) -> bool {
        if self.reversed() {
            position <= self.t1 + END_TOLERANCE
        } else {
            position >= self.t1 - END_TOLERANCE
        }
    }

    fn jump(&mut self, time: f64) {
        self.anchor = time;
        self.steps = 0;
    }

    fn sample_at(&self, time: f64, channel: usize) -> f32 {
        let index = (time - self.start) * self.rate as f64;
        if index < 0.0 {
            return 0.0;
        }
        let base = index.floor();
        let frac = (index - base) as f32;
        let base = base as usize;
        let a = self.source.sample(base, channel);
        let b = self.source.sample(base + 1, channel);
        a + (b - a) * frac
    }
}

impl Mixer for ClipMixer {
    fn channels(&self) -> usize {
        self.buffers.len()
    }

    fn process(&mut self, max_frames: usize) -> usize {
        for buffer in &mut self.buffers {
            if buffer.len() < max_frames {
                buffer.resize(max_frames, 0.0);
            }
        }

        let mut produced = 0;
        while produced < max_frames {
            let position = self.position();
            if self.finished(position) {
                break;
            }
            for ch in 0..self.buffers.len() {
                let value = self.sample_at(position, ch) * self.gain;
                self.buffers[ch][produced] = value;
            }
            self.steps += 1;
            produced += 1;
        }
        self.produced = produced;
        produced
    }

    fn buffer(&self, channel: usize) -> &[f32] {
        &self.buffers[channel][..self.produced]
    }

    fn reposition(&mut self, time: f64) {
        self.jump(time);
    }

    fn restart(&mut self) {
        self.jump(self.t0);
    }

    fn set_times_and_speed(&mut self, t0: f64, t1: f64, speed: f64) {
        self.t0 = t0;
        self.t1 = t1;
        self.speed = speed.abs().max(f64::EPSILON);
        self.jump(t0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(frames: usize) -> AudioArc {
        AudioArc::from_fn(frames, 1000, 1, |frame, _| frame as f32)
    }

    #[test]
    fn test_plays_forward_until_t1() {
        let mut mixer = ClipMixer::new(ramp(100), 1000).unwrap();
        mixer.set_times_and_speed(0.0, 0.01, 1.0);

        let produced = mixer.process(64);

        assert_eq!(produced, 10);
        for (i, value) in mixer.buffer(0).iter().enumerate() {
            assert_relative_eq!(*value, i as f32, epsilon = 1e-3);
        }
        assert_eq!(mixer.process(64), 0);
    }

    #[test]
    fn test_reverse_playback() {
        let mut mixer = ClipMixer::new(ramp(100), 1000).unwrap();
        mixer.set_times_and_speed(0.05, 0.045, 1.0);

        let produced = mixer.process(64);

        assert_eq!(produced, 5);
        assert_relative_eq!(mixer.buffer(0)[0], 50.0, epsilon = 1e-3);
        assert_relative_eq!(mixer.buffer(0)[4], 46.0, epsilon = 1e-3);
    }

    #[test]
    fn test_half_speed_interpolates() {
        let mut mixer = ClipMixer::new(ramp(100), 1000).unwrap();
        mixer.set_times_and_speed(0.0, 1.0, 0.5);

        mixer.process(4);

        let out = mixer.buffer(0);
        assert_relative_eq!(out[1], 0.5, epsilon = 1e-4);
        assert_relative_eq!(out[3], 1.5, epsilon = 1e-4);
    }

    #[test]
    fn test_start_offset_and_gain() {
        let mut mixer = ClipMixer::new(ramp(10), 1000)
            .unwrap()
            .with_start(0.002)
            .with_gain(0.5);
        mixer.set_times_and_speed(0.0, 0.004, 1.0);

        mixer.process(4);

        let out = mixer.buffer(0);
        assert_eq!(&out[..2], &[0.0, 0.0]);
        assert_relative_eq!(out[2], 0.0, epsilon = 1e-3);
        assert_relative_eq!(out[3], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_restart_and_reposition() {
        let mut mixer = ClipMixer::new(ramp(100), 1000).unwrap();
        mixer.set_times_and_speed(0.01, 0.02, 1.0);
        mixer.process(5);

        mixer.restart();
        assert_relative_eq!(mixer.position(), 0.01);

        mixer.reposition(0.015);
        mixer.process(1);
        assert_relative_eq!(mixer.buffer(0)[0], 15.0, epsilon = 1e-3);
    }

    #[test]
    fn test_buffer_grows_for_large_requests() {
        let mut mixer = ClipMixer::new(ramp(10_000), 1000).unwrap();
        mixer.set_times_and_speed(0.0, 10.0, 1.0);

        assert_eq!(mixer.process(8192), 8192);
        assert_eq!(mixer.buffer(0).len(), 8192);
    }
}
