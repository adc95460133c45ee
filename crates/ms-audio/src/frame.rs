//! Audio frame type.

/// A stereo audio frame (16-bit integer).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub left: i16,
    pub right: i16,
}

impl Frame {
    /// Create a silent frame.
    pub const fn silence() -> Self {
        Self { left: 0, right: 0 }
    }

    /// Left/right as `f32` in [-1.0, 1.0).
    pub fn to_f32(self) -> (f32, f32) {
        (self.left as f32 / 32768.0, self.right as f32 / 32768.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_converts_to_zero() {
        assert_eq!(Frame::silence().to_f32(), (0.0, 0.0));
    }

    #[test]
    fn full_scale_converts_to_unit_range() {
        let frame = Frame {
            left: i16::MIN,
            right: 16384,
        };
        assert_eq!(frame.to_f32(), (-1.0, 0.5));
    }
}
