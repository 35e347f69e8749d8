/// Storage precision of a captured track.
///
/// Samples travel through the engine as `f32`; an integer format only limits
/// the values a track can hold, so capture rings quantize on the way in and
/// storage never sees values it cannot represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    Int16,
    Int24,
    #[default]
    Float32,
}

impl SampleFormat {
    pub fn bits(self) -> u16 {
        match self {
            SampleFormat::Int16 => 16,
            SampleFormat::Int24 => 24,
            SampleFormat::Float32 => 32,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::Float32)
    }

    /// Largest positive integer code for integer formats.
    fn full_scale(self) -> Option<f32> {
        match self {
            SampleFormat::Int16 => Some(32767.0),
            SampleFormat::Int24 => Some(8_388_607.0),
            SampleFormat::Float32 => None,
        }
    }

    /// Round `sample` to the nearest value this format can store.
    #[inline]
    pub fn quantize(self, sample: f32) -> f32 {
        match self.full_scale() {
            Some(scale) => (sample.clamp(-1.0, 1.0) * scale).round() / scale,
            None => sample,
        }
    }

    /// Integer code for `sample`; float formats map to the 24-bit range.
    #[inline]
    pub fn to_int(self, sample: f32) -> i32 {
        let scale = self.full_scale().unwrap_or(8_388_607.0);
        (sample.clamp(-1.0, 1.0) * scale).round() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_is_untouched() {
        assert_eq!(SampleFormat::Float32.quantize(1.5), 1.5);
        assert_eq!(SampleFormat::Float32.quantize(0.123_456_7), 0.123_456_7);
    }

    #[test]
    fn test_int16_rounds_and_clamps() {
        let q = SampleFormat::Int16.quantize(0.5);
        assert_eq!(q, (0.5f32 * 32767.0).round() / 32767.0);
        assert_eq!(SampleFormat::Int16.quantize(2.0), 1.0);
        assert_eq!(SampleFormat::Int16.quantize(-2.0), -1.0);
    }

    #[test]
    fn test_to_int() {
        assert_eq!(SampleFormat::Int16.to_int(1.0), 32767);
        assert_eq!(SampleFormat::Int16.to_int(-1.0), -32767);
        assert_eq!(SampleFormat::Int24.to_int(0.0), 0);
    }

    #[test]
    fn test_bits() {
        assert_eq!(SampleFormat::Int16.bits(), 16);
        assert_eq!(SampleFormat::Int24.bits(), 24);
        assert_eq!(SampleFormat::default().bits(), 32);
    }
}
