use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Write};

const HEADER_SIZE: usize = 48;
const MAGIC1: u32 = 0xcafe2580;
const MAGIC2: u32 = 0x94119c00;
const TLV_TYPE_FIXED: u32 = 0x40000000;
const BAND_ID_OFFSET: u32 = 0x60030040;

/// Lead byte announcing an absolute FFT pass number in a peaks payload.
const FFT_PASS_MARKER: u8 = 0xff;

/// Prefix of the data-URI form of a binary signature.
pub const DATA_URI_PREFIX: &str = "data:audio/vnd.shazam.sig;base64,";

/// Error raised while decoding a binary signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A magic constant in the header or the fixed TLV type did not match.
    InvalidMagic,
    /// The size declared by the header disagrees with the buffer length.
    SizeMismatch,
    /// The recomputed CRC-32 differs from the one in the header.
    ChecksumMismatch,
    /// The shifted sample rate id is not one of the known values.
    UnknownSampleRate,
    /// A band section id does not map to a storable frequency band.
    UnknownBand,
    /// The buffer ended before a complete structure could be read.
    Truncated,
    /// The string is not a well-formed signature data URI.
    InvalidUri,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidMagic => write!(f, "invalid magic value in signature header"),
            DecodeError::SizeMismatch => write!(f, "declared size does not match buffer length"),
            DecodeError::ChecksumMismatch => write!(f, "CRC-32 checksum mismatch"),
            DecodeError::UnknownSampleRate => write!(f, "unknown sample rate id"),
            DecodeError::UnknownBand => write!(f, "unknown frequency band id"),
            DecodeError::Truncated => write!(f, "signature buffer is truncated"),
            DecodeError::InvalidUri => write!(f, "not a valid signature data URI"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Sample rates representable in the signature header, with their wire ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Hz8000 = 1,
    Hz11025 = 2,
    Hz16000 = 3,
    Hz32000 = 4,
    Hz44100 = 5,
    Hz48000 = 6,
}

impl SampleRate {
    pub fn from_hz(sample_rate_hz: u32) -> Option<Self> {
        match sample_rate_hz {
            8000 => Some(SampleRate::Hz8000),
            11025 => Some(SampleRate::Hz11025),
            16000 => Some(SampleRate::Hz16000),
            32000 => Some(SampleRate::Hz32000),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(SampleRate::Hz8000),
            2 => Some(SampleRate::Hz11025),
            3 => Some(SampleRate::Hz16000),
            4 => Some(SampleRate::Hz32000),
            5 => Some(SampleRate::Hz44100),
            6 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz11025 => 11025,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz32000 => 32000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }
}

/// The four frequency bands peaks are partitioned into on the wire. Peaks
/// below 250 Hz are discarded before ever reaching a band, so there is no
/// variant for that range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrequencyBand {
    _250_520 = 0,
    _520_1450 = 1,
    _1450_3500 = 2,
    _3500_5500 = 3,
}

impl FrequencyBand {
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(FrequencyBand::_250_520),
            1 => Some(FrequencyBand::_520_1450),
            2 => Some(FrequencyBand::_1450_3500),
            3 => Some(FrequencyBand::_3500_5500),
            _ => None,
        }
    }

    /// Band containing `frequency_hz`, if any. The ranges are half-open, so
    /// 5500 Hz and above fall outside the last band.
    pub fn for_frequency(frequency_hz: f32) -> Option<Self> {
        if (250.0..520.0).contains(&frequency_hz) {
            Some(FrequencyBand::_250_520)
        } else if (520.0..1450.0).contains(&frequency_hz) {
            Some(FrequencyBand::_520_1450)
        } else if (1450.0..3500.0).contains(&frequency_hz) {
            Some(FrequencyBand::_1450_3500)
        } else if (3500.0..5500.0).contains(&frequency_hz) {
            Some(FrequencyBand::_3500_5500)
        } else {
            None
        }
    }

    fn name(self) -> &'static str {
        match self {
            FrequencyBand::_250_520 => "250_520",
            FrequencyBand::_520_1450 => "520_1450",
            FrequencyBand::_1450_3500 => "1450_3500",
            FrequencyBand::_3500_5500 => "3500_5500",
        }
    }
}

/// A single spectral peak retained by the recognizer. Immutable once stored;
/// the sample rate is carried along so the derived unit conversions need no
/// outside context.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyPeak {
    pub fft_pass_number: u32,
    pub peak_magnitude: u16,
    pub corrected_peak_frequency_bin: u16,
    pub sample_rate_hz: u32,
}

impl FrequencyPeak {
    /// Frequency in Hz. The stored bin carries a 64x sub-bin resolution over
    /// the 1024 useful bins of the FFT.
    pub fn get_frequency_hz(&self) -> f32 {
        self.corrected_peak_frequency_bin as f32 * (self.sample_rate_hz as f32 / 2.0 / 1024.0 / 64.0)
    }

    /// Position of the peak within the audio, in seconds. Each FFT pass
    /// advances by 128 samples.
    pub fn get_seconds(&self) -> f32 {
        self.fft_pass_number as f32 * 128.0 / self.sample_rate_hz as f32
    }

    /// PCM amplitude recovered from the log-compressed magnitude.
    pub fn get_amplitude_pcm(&self) -> f32 {
        (((self.peak_magnitude as f32 - 6144.0) / 1477.3).exp() * (1 << 17) as f32 / 2.0).sqrt()
            / 1024.0
    }
}

/// An audio fingerprint signature: the peaks retained from a stretch of PCM
/// audio, grouped by frequency band, plus enough context to locate them in
/// time and frequency. Encodable to and decodable from the binary container
/// the recognition service expects.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignature {
    pub sample_rate_hz: u32,
    pub number_samples: u32,
    pub frequency_band_to_sound_peaks: HashMap<FrequencyBand, Vec<FrequencyPeak>>,
}

impl DecodedSignature {
    /// Number of peaks across all bands.
    pub fn total_peak_count(&self) -> usize {
        self.frequency_band_to_sound_peaks
            .values()
            .map(|peaks| peaks.len())
            .sum()
    }

    /// Duration of the fingerprinted audio in seconds.
    pub fn seconds(&self) -> f32 {
        self.number_samples as f32 / self.sample_rate_hz as f32
    }

    /// Serialize to the binary signature format.
    ///
    /// Layout: 48-byte header with a CRC-32 over everything past its first 8
    /// bytes, a fixed TLV section repeating the payload size, then one TLV
    /// section per non-empty band in ascending band id order.
    pub fn encode_to_binary(&self) -> io::Result<Vec<u8>> {
        let sample_rate = SampleRate::from_hz(self.sample_rate_hz).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no signature wire id for {} Hz", self.sample_rate_hz),
            )
        })?;

        let band_sections = self.encode_band_sections()?;
        let size_minus_header = band_sections.len() as u32 + 8;

        let mut cursor = Cursor::new(Vec::with_capacity(HEADER_SIZE + 8 + band_sections.len()));

        // Header. The CRC-32 field is patched in after the full message has
        // been written out.
        cursor.write_u32::<LittleEndian>(MAGIC1)?;
        cursor.write_u32::<LittleEndian>(0)?;
        cursor.write_u32::<LittleEndian>(size_minus_header)?;
        cursor.write_u32::<LittleEndian>(MAGIC2)?;
        for _ in 0..3 {
            cursor.write_u32::<LittleEndian>(0)?;
        }
        cursor.write_u32::<LittleEndian>(sample_rate.id() << 27)?;
        for _ in 0..2 {
            cursor.write_u32::<LittleEndian>(0)?;
        }
        cursor.write_u32::<LittleEndian>(
            self.number_samples + (self.sample_rate_hz as f64 * 0.24).round() as u32,
        )?;
        cursor.write_u32::<LittleEndian>((15 << 19) + 0x40000)?;

        // Fixed TLV section
        cursor.write_u32::<LittleEndian>(TLV_TYPE_FIXED)?;
        cursor.write_u32::<LittleEndian>(size_minus_header)?;

        cursor.write_all(&band_sections)?;

        let mut buffer = cursor.into_inner();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buffer[8..]);
        let checksum = hasher.finalize();

        buffer[4..8].copy_from_slice(&checksum.to_le_bytes());

        Ok(buffer)
    }

    /// Parse a binary signature, validating the header constants, the
    /// declared size and the CRC-32 before reading any band section.
    pub fn decode_from_binary(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_SIZE + 8 {
            return Err(DecodeError::Truncated);
        }

        let mut cursor = Cursor::new(data);

        let magic1 = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        if magic1 != MAGIC1 {
            return Err(DecodeError::InvalidMagic);
        }

        let expected_checksum = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        // The CRC covers every byte past the first 8, including the size
        // field, so it is checked before anything it protects.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[8..]);

        if hasher.finalize() != expected_checksum {
            return Err(DecodeError::ChecksumMismatch);
        }

        let size_minus_header = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        if size_minus_header as usize != data.len() - HEADER_SIZE {
            return Err(DecodeError::SizeMismatch);
        }

        let magic2 = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        if magic2 != MAGIC2 {
            return Err(DecodeError::InvalidMagic);
        }

        for _ in 0..3 {
            cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| DecodeError::Truncated)?;
        }

        let shifted_sample_rate_id = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        let sample_rate_hz = SampleRate::from_id(shifted_sample_rate_id >> 27)
            .ok_or(DecodeError::UnknownSampleRate)?
            .hz();

        for _ in 0..2 {
            cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| DecodeError::Truncated)?;
        }

        let number_samples_plus_divided_sample_rate = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        let number_samples = number_samples_plus_divided_sample_rate
            .saturating_sub((sample_rate_hz as f64 * 0.24).round() as u32);

        // fixed_value word, nothing to validate against
        cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        // Fixed TLV section
        let tlv_type = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        if tlv_type != TLV_TYPE_FIXED {
            return Err(DecodeError::InvalidMagic);
        }

        let tlv_length = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        if tlv_length != size_minus_header {
            return Err(DecodeError::SizeMismatch);
        }

        // Band sections until the buffer is exhausted
        let mut frequency_band_to_sound_peaks: HashMap<FrequencyBand, Vec<FrequencyPeak>> =
            HashMap::new();

        let mut offset = cursor.position() as usize;

        while offset < data.len() {
            if data.len() - offset < 8 {
                return Err(DecodeError::Truncated);
            }

            let band_id = u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            let payload_length = u32::from_le_bytes([
                data[offset + 4],
                data[offset + 5],
                data[offset + 6],
                data[offset + 7],
            ]) as usize;

            offset += 8;

            let frequency_band = FrequencyBand::from_id(band_id as i64 - BAND_ID_OFFSET as i64)
                .ok_or(DecodeError::UnknownBand)?;

            let padding = (4 - payload_length % 4) % 4;

            if offset + payload_length + padding > data.len() {
                return Err(DecodeError::Truncated);
            }

            let peaks =
                decode_band_peaks(&data[offset..offset + payload_length], sample_rate_hz)?;

            frequency_band_to_sound_peaks.insert(frequency_band, peaks);

            offset += payload_length + padding;
        }

        Ok(DecodedSignature {
            sample_rate_hz,
            number_samples,
            frequency_band_to_sound_peaks,
        })
    }

    /// Serialize to the `data:audio/vnd.shazam.sig;base64,` URI form of the
    /// binary signature.
    pub fn encode_to_uri(&self) -> io::Result<String> {
        Ok(format!(
            "{}{}",
            DATA_URI_PREFIX,
            base64::encode(&self.encode_to_binary()?)
        ))
    }

    /// Parse a signature from its data-URI form.
    pub fn decode_from_uri(uri: &str) -> Result<Self, DecodeError> {
        let encoded = uri
            .strip_prefix(DATA_URI_PREFIX)
            .ok_or(DecodeError::InvalidUri)?;

        let data = base64::decode(encoded).map_err(|_| DecodeError::InvalidUri)?;

        Self::decode_from_binary(&data)
    }

    /// Render the signature as JSON for debugging. The underscore-prefixed
    /// fields are derived quantities; this rendition is not meant to be
    /// parsed back.
    pub fn encode_to_json(&self) -> serde_json::Value {
        let mut sorted_bands: Vec<_> = self.frequency_band_to_sound_peaks.iter().collect();
        sorted_bands.sort_by_key(|(band, _)| **band);

        let mut bands = serde_json::Map::new();

        for (frequency_band, peaks) in sorted_bands {
            let rendered_peaks: Vec<serde_json::Value> = peaks
                .iter()
                .map(|peak| {
                    serde_json::json!({
                        "fft_pass_number": peak.fft_pass_number,
                        "peak_magnitude": peak.peak_magnitude,
                        "corrected_peak_frequency_bin": peak.corrected_peak_frequency_bin,
                        "_frequency_hz": peak.get_frequency_hz(),
                        "_amplitude_pcm": peak.get_amplitude_pcm(),
                        "_seconds": peak.get_seconds(),
                    })
                })
                .collect();

            bands.insert(
                frequency_band.name().to_string(),
                serde_json::Value::Array(rendered_peaks),
            );
        }

        serde_json::json!({
            "sample_rate_hz": self.sample_rate_hz,
            "number_samples": self.number_samples,
            "_seconds": self.seconds(),
            "frequency_band_to_peaks": bands,
        })
    }

    /// TLV sections for the non-empty bands, in ascending band id order.
    fn encode_band_sections(&self) -> io::Result<Vec<u8>> {
        let mut sorted_bands: Vec<_> = self.frequency_band_to_sound_peaks.iter().collect();
        sorted_bands.sort_by_key(|(band, _)| **band);

        let mut sections = Cursor::new(Vec::new());

        for (frequency_band, peaks) in sorted_bands {
            if peaks.is_empty() {
                continue;
            }

            let payload = encode_peaks_payload(peaks)?;

            sections.write_u32::<LittleEndian>(BAND_ID_OFFSET + frequency_band.id())?;
            sections.write_u32::<LittleEndian>(payload.len() as u32)?;
            sections.write_all(&payload)?;

            // Pad each section to a 4-byte boundary
            for _ in 0..(4 - payload.len() % 4) % 4 {
                sections.write_u8(0)?;
            }
        }

        Ok(sections.into_inner())
    }
}

/// Peak records for one band: a delta byte plus magnitude and bin, with an
/// absolute pass number marker emitted whenever the delta would collide with
/// the marker byte itself.
fn encode_peaks_payload(peaks: &[FrequencyPeak]) -> io::Result<Vec<u8>> {
    let mut payload = Cursor::new(Vec::new());
    let mut running_fft_pass_number: u32 = 0;

    for peak in peaks {
        let mut delta = peak
            .fft_pass_number
            .checked_sub(running_fft_pass_number)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "peak fft pass numbers must be non-decreasing within a band",
                )
            })?;

        if delta >= FFT_PASS_MARKER as u32 {
            payload.write_u8(FFT_PASS_MARKER)?;
            payload.write_u32::<LittleEndian>(peak.fft_pass_number)?;
            delta = 0;
        }

        payload.write_u8(delta as u8)?;
        payload.write_u16::<LittleEndian>(peak.peak_magnitude)?;
        payload.write_u16::<LittleEndian>(peak.corrected_peak_frequency_bin)?;

        running_fft_pass_number = peak.fft_pass_number;
    }

    Ok(payload.into_inner())
}

fn decode_band_peaks(
    payload: &[u8],
    sample_rate_hz: u32,
) -> Result<Vec<FrequencyPeak>, DecodeError> {
    let mut cursor = Cursor::new(payload);
    let mut peaks = Vec::new();
    let mut fft_pass_number: u32 = 0;

    loop {
        let lead_byte = match cursor.read_u8() {
            Ok(byte) => byte,
            Err(_) => break,
        };

        if lead_byte == FFT_PASS_MARKER {
            fft_pass_number = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| DecodeError::Truncated)?;
            continue;
        }

        fft_pass_number += lead_byte as u32;

        let peak_magnitude = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;
        let corrected_peak_frequency_bin = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| DecodeError::Truncated)?;

        peaks.push(FrequencyPeak {
            fft_pass_number,
            peak_magnitude,
            corrected_peak_frequency_bin,
            sample_rate_hz,
        });
    }

    Ok(peaks)
}
