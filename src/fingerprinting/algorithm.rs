use chfft::RFft1D;
use log::{debug, trace};
use std::collections::HashMap;

use crate::config::{Config, TerminationPolicy};
use crate::fingerprinting::hanning::HANNING_WINDOW_2048_MULTIPLIERS;
use crate::fingerprinting::ring_buffer::RingBuffer;
use crate::fingerprinting::signature_format::{DecodedSignature, FrequencyBand, FrequencyPeak};

/// Samples consumed per FFT pass.
const HOP_SIZE: usize = 128;

/// Spread frames that must exist before the recognizer can reach back to its
/// reference frames.
const RECOGNITION_MIN_SPREAD_FFTS: u32 = 46;

/// Streaming signature generator: PCM samples in, `DecodedSignature` out.
///
/// Single-threaded state machine. Feed samples with `feed_input`, then poll
/// `get_next_signature`; each emitted signature resets the internal state so
/// the next one starts from silence.
pub struct SignatureGenerator {
    config: Config,

    // Samples fed by the caller but not yet consumed

    input_pending_processing: Vec<i16>,
    samples_processed: usize,

    // Used when processing input:

    ring_buffer_of_samples: RingBuffer<i16>,
    /// Ring buffer of the last 2048 input samples.

    reordered_ring_buffer_of_samples: Vec<f32>,
    /// Scratch copy of the sample ring, reordered oldest-first and multiplied
    /// by the Hanning window, with floats for precision.

    fft_outputs: RingBuffer<Vec<f32>>,
    /// Ring buffer of the last 256 FFT magnitude vectors, 1025 floats each,
    /// computed from the sample ring every new 128 samples.

    fft_object: RFft1D<f32>,

    spread_fft_outputs: RingBuffer<Vec<f32>>,
    /// Ring buffer of the spread counterparts of `fft_outputs`.

    next_signature: DecodedSignature,
}

impl SignatureGenerator {
    /// Create a generator with the default configuration (16 kHz input,
    /// 30 second / 255 peak caps).
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a generator with explicit caps and termination policy.
    pub fn with_config(config: Config) -> Self {
        let sample_rate_hz = config.sample_rate;

        Self {
            config,
            input_pending_processing: Vec::new(),
            samples_processed: 0,
            ring_buffer_of_samples: RingBuffer::new(2048, 0i16),
            reordered_ring_buffer_of_samples: vec![0.0f32; 2048],
            fft_outputs: RingBuffer::new(256, vec![0.0f32; 1025]),
            fft_object: RFft1D::<f32>::new(2048),
            spread_fft_outputs: RingBuffer::new(256, vec![0.0f32; 1025]),
            next_signature: DecodedSignature {
                sample_rate_hz,
                number_samples: 0,
                frequency_band_to_sound_peaks: HashMap::new(),
            },
        }
    }

    /// Fingerprint a whole buffer in one shot, with no time or peak caps.
    /// Any trailing partial 128-sample chunk is ignored by the FFT stages but
    /// still counted in `number_samples`.
    pub fn make_signature_from_buffer(s16_mono_16khz_buffer: &[i16]) -> DecodedSignature {
        let mut this = SignatureGenerator::new();

        this.next_signature.number_samples = s16_mono_16khz_buffer.len() as u32;

        for chunk in s16_mono_16khz_buffer.chunks_exact(HOP_SIZE) {
            this.process_hop(chunk);
        }

        this.next_signature
    }

    /// Append signed 16-bit mono PCM samples to the pending queue.
    pub fn feed_input(&mut self, s16le_mono_samples: &[i16]) {
        trace!("queueing {} samples", s16le_mono_samples.len());

        self.input_pending_processing
            .extend_from_slice(s16le_mono_samples);
    }

    /// Consume pending samples and return the next signature, or `None` when
    /// fewer than 128 unconsumed samples are queued.
    ///
    /// Processing runs until the queue runs dry or the configured termination
    /// policy declares the signature complete, whichever comes first. All
    /// internal buffers are reset once the signature is handed out.
    pub fn get_next_signature(&mut self) -> Option<DecodedSignature> {
        if self.pending_sample_count() < HOP_SIZE {
            return None;
        }

        while self.pending_sample_count() >= HOP_SIZE && !self.signature_complete() {
            let start = self.samples_processed;

            let mut chunk = [0i16; HOP_SIZE];
            chunk.copy_from_slice(&self.input_pending_processing[start..start + HOP_SIZE]);

            self.next_signature.number_samples += HOP_SIZE as u32;
            self.process_hop(&chunk);

            self.samples_processed += HOP_SIZE;
        }

        debug!(
            "emitting signature: {} samples, {} peaks",
            self.next_signature.number_samples,
            self.next_signature.total_peak_count()
        );

        Some(self.reset_signature())
    }

    fn pending_sample_count(&self) -> usize {
        self.input_pending_processing.len() - self.samples_processed
    }

    fn signature_complete(&self) -> bool {
        let time_cap_reached = self.next_signature.number_samples as f32
            / self.config.sample_rate as f32
            >= self.config.max_time_seconds;
        let peak_cap_reached = self.next_signature.total_peak_count() >= self.config.max_peaks;

        match self.config.termination_policy {
            TerminationPolicy::BothCaps => time_cap_reached && peak_cap_reached,
            TerminationPolicy::EitherCap => time_cap_reached || peak_cap_reached,
        }
    }

    /// Hand out the signature under construction and reinitialize every ring
    /// buffer, so no partial state leaks into the next signature.
    fn reset_signature(&mut self) -> DecodedSignature {
        let finished_signature = std::mem::replace(
            &mut self.next_signature,
            DecodedSignature {
                sample_rate_hz: self.config.sample_rate,
                number_samples: 0,
                frequency_band_to_sound_peaks: HashMap::new(),
            },
        );

        self.ring_buffer_of_samples = RingBuffer::new(2048, 0i16);
        self.fft_outputs = RingBuffer::new(256, vec![0.0f32; 1025]);
        self.spread_fft_outputs = RingBuffer::new(256, vec![0.0f32; 1025]);

        // Consumed samples are not needed again
        self.input_pending_processing.drain(..self.samples_processed);
        self.samples_processed = 0;

        finished_signature
    }

    fn process_hop(&mut self, batch_of_128_samples: &[i16]) {
        self.do_fft(batch_of_128_samples);

        self.do_peak_spreading();

        if self.spread_fft_outputs.num_written() >= RECOGNITION_MIN_SPREAD_FFTS {
            self.do_peak_recognition();
        }
    }

    fn do_fft(&mut self, batch_of_128_samples: &[i16]) {
        // Copy the 128 input s16le samples to the local ring buffer

        self.ring_buffer_of_samples
            .extend_from_slice(batch_of_128_samples);

        // Reorder the items oldest-first from the cursor and apply the
        // Hanning window

        for (index, multiplier) in HANNING_WINDOW_2048_MULTIPLIERS.iter().enumerate() {
            self.reordered_ring_buffer_of_samples[index] =
                *self.ring_buffer_of_samples.at(index as i32) as f32 * multiplier;
        }

        // Perform Fast Fourier transform

        let complex_fft_results = self
            .fft_object
            .forward(&self.reordered_ring_buffer_of_samples);

        assert_eq!(complex_fft_results.len(), 1025);

        // Turn complex into reals, floored so later logarithms stay finite

        let mut real_fft_results = vec![0.0f32; 1025];

        for (index, value) in complex_fft_results.iter().enumerate() {
            real_fft_results[index] =
                ((value.re * value.re + value.im * value.im) / ((1 << 17) as f32)).max(1e-10);
        }

        self.fft_outputs.append(real_fft_results);
    }

    fn do_peak_spreading(&mut self) {
        let mut spread_fft_results = self.fft_outputs.at(-1).clone();

        // Perform frequency-domain spreading of peak values. The sweep runs
        // left to right in place, so a maximum cascades down across bins.

        for position in 0..=1022 {
            spread_fft_results[position] = spread_fft_results[position]
                .max(spread_fft_results[position + 1])
                .max(spread_fft_results[position + 2]);
        }

        // Perform time-domain spreading of peak values: push each bin's
        // running maximum backward into the spread frames 1, 3 and 6
        // positions behind the cursor.

        for position in 0..=1024 {
            let mut running_max = spread_fft_results[position];

            for &former_fft_number in &[-1i32, -3, -6] {
                let former_fft_output = self.spread_fft_outputs.at_mut(former_fft_number);

                running_max = running_max.max(former_fft_output[position]);
                former_fft_output[position] = running_max;
            }
        }

        self.spread_fft_outputs.append(spread_fft_results);
    }

    fn do_peak_recognition(&mut self) {
        let fft_minus_46 = self.fft_outputs.at(-46);
        let spread_minus_49 = self.spread_fft_outputs.at(-49);

        let fft_pass_number = self.spread_fft_outputs.num_written() - RECOGNITION_MIN_SPREAD_FFTS;

        for bin_position in 10..=1014usize {
            // Ensure that the bin is large enough to be a peak

            if fft_minus_46[bin_position] < 1.0 / 64.0
                || fft_minus_46[bin_position] < spread_minus_49[bin_position - 1]
            {
                continue;
            }

            // Ensure that it is a frequency-domain local maximum

            let mut max_neighbor_in_spread_minus_49: f32 = 0.0;

            for &neighbor_offset in &[-10i32, -7, -4, -3, 1, 2, 5, 8] {
                max_neighbor_in_spread_minus_49 = max_neighbor_in_spread_minus_49
                    .max(spread_minus_49[(bin_position as i32 + neighbor_offset) as usize]);
            }

            if fft_minus_46[bin_position] <= max_neighbor_in_spread_minus_49 {
                continue;
            }

            // Ensure that it is a time-domain local maximum

            let mut max_neighbor_in_other_spread_ffts: f32 = 0.0;

            for &other_offset in &[
                -53i32, -45, 165, 172, 179, 186, 193, 200, 214, 221, 228, 235, 242, 249,
            ] {
                let other_spread_fft = self.spread_fft_outputs.at(other_offset);

                max_neighbor_in_other_spread_ffts =
                    max_neighbor_in_other_spread_ffts.max(other_spread_fft[bin_position - 1]);
            }

            if fft_minus_46[bin_position] <= max_neighbor_in_other_spread_ffts {
                continue;
            }

            // This is a peak. Refine its magnitude and bin by parabolic
            // interpolation over the log-compressed neighbour magnitudes.

            let peak_magnitude: f32 =
                (1.0f32 / 64.0).max(fft_minus_46[bin_position]).ln() * 1477.3 + 6144.0;
            let peak_magnitude_before: f32 =
                (1.0f32 / 64.0).max(fft_minus_46[bin_position - 1]).ln() * 1477.3 + 6144.0;
            let peak_magnitude_after: f32 =
                (1.0f32 / 64.0).max(fft_minus_46[bin_position + 1]).ln() * 1477.3 + 6144.0;

            let peak_variation_1: f32 =
                peak_magnitude * 2.0 - peak_magnitude_before - peak_magnitude_after;

            if peak_variation_1 <= 0.0 {
                continue;
            }

            let peak_variation_2: f32 =
                (peak_magnitude_after - peak_magnitude_before) * 32.0 / peak_variation_1;

            // The sub-bin correction is kept at 1/64 bin resolution; the
            // stored value is truncated, never rounded.

            let corrected_peak_frequency_bin: u16 =
                (bin_position as f32 * 64.0 + peak_variation_2).floor() as u16;

            // Convert the stored bin back to a frequency, given 1024 useful
            // bins and the 64x sub-bin resolution

            let frequency_hz = corrected_peak_frequency_bin as f32
                * (self.config.sample_rate as f32 / 2.0 / 1024.0 / 64.0);

            // Peaks outside the 250 Hz - 5.5 KHz range are not stored

            let frequency_band = match FrequencyBand::for_frequency(frequency_hz) {
                Some(band) => band,
                None => continue,
            };

            self.next_signature
                .frequency_band_to_sound_peaks
                .entry(frequency_band)
                .or_default()
                .push(FrequencyPeak {
                    fft_pass_number,
                    peak_magnitude: peak_magnitude as u16,
                    corrected_peak_frequency_bin,
                    sample_rate_hz: self.config.sample_rate,
                });
        }
    }
}

impl Default for SignatureGenerator {
    fn default() -> Self {
        Self::new()
    }
}
