//! Tolerance constants for rendered-audio checks.

/// Floating point rounding errors on values that should be reproduced exactly.
pub const FLOAT_EPSILON: f32 = 1e-6;

/// Silence threshold (~-80dB).
pub const SILENCE_THRESHOLD: f32 = 0.0001;

/// 16-bit quantization step size, for comparing against a 16-bit WAV readback.
pub const INT16_EPSILON: f32 = 1.0 / 32768.0;
