use lazy_static::lazy_static;

lazy_static! {
    /// The 2048 window multipliers applied to each sample excerpt before the
    /// FFT: a Hanning window of length 2050 with the zero-valued first and
    /// last coefficients clipped off. The reference signatures were produced
    /// with this exact window, so it must not be replaced with a plain
    /// 2048-point Hanning window.
    pub static ref HANNING_WINDOW_2048_MULTIPLIERS: Vec<f32> = clipped_hanning_window();
}

/// Hanning(2050) is `0.5 - 0.5 * cos(2 * pi * n / 2049)` for n in 0..2050;
/// keeping n in 1..=2048 drops the leading and trailing zeros.
fn clipped_hanning_window() -> Vec<f32> {
    (1..=2048)
        .map(|n| {
            let radians = 2.0 * std::f64::consts::PI * n as f64 / 2049.0;

            (0.5 - 0.5 * radians.cos()) as f32
        })
        .collect()
}
