use std::collections::HashMap;

use vibesig::{DecodeError, DecodedSignature, FrequencyBand, FrequencyPeak};

fn peak(
    fft_pass_number: u32,
    peak_magnitude: u16,
    corrected_peak_frequency_bin: u16,
    sample_rate_hz: u32,
) -> FrequencyPeak {
    FrequencyPeak {
        fft_pass_number,
        peak_magnitude,
        corrected_peak_frequency_bin,
        sample_rate_hz,
    }
}

/// A signature with peaks in two bands, including a pass number jump large
/// enough to require an absolute marker on the wire.
fn sample_signature() -> DecodedSignature {
    let mut bands = HashMap::new();

    bands.insert(
        FrequencyBand::_250_520,
        vec![peak(3, 12000, 2500, 16000), peak(7, 11800, 3100, 16000)],
    );
    bands.insert(
        FrequencyBand::_1450_3500,
        vec![
            peak(5, 14000, 14000, 16000),
            peak(5, 13500, 20000, 16000),
            peak(300, 13000, 15000, 16000),
        ],
    );

    DecodedSignature {
        sample_rate_hz: 16000,
        number_samples: 128000,
        frequency_band_to_sound_peaks: bands,
    }
}

/// Recompute the header CRC-32 after tampering with the checksummed region.
fn refresh_crc(data: &mut [u8]) {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data[8..]);
    let checksum = hasher.finalize();
    data[4..8].copy_from_slice(&checksum.to_le_bytes());
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[test]
fn test_round_trip_structural_and_byte_exact() {
    let signature = sample_signature();

    let encoded = signature.encode_to_binary().unwrap();
    let decoded = DecodedSignature::decode_from_binary(&encoded).unwrap();

    assert_eq!(decoded, signature);

    // Re-encoding the decoded signature reproduces the exact bytes
    assert_eq!(decoded.encode_to_binary().unwrap(), encoded);
}

#[test]
fn test_empty_signature_round_trip() {
    let signature = DecodedSignature {
        sample_rate_hz: 16000,
        number_samples: 48000,
        frequency_band_to_sound_peaks: HashMap::new(),
    };

    let encoded = signature.encode_to_binary().unwrap();

    // Header plus the fixed TLV section, nothing else
    assert_eq!(encoded.len(), 56);

    let decoded = DecodedSignature::decode_from_binary(&encoded).unwrap();
    assert_eq!(decoded, signature);
}

#[test]
fn test_header_layout() {
    let signature = sample_signature();
    let encoded = signature.encode_to_binary().unwrap();

    assert_eq!(read_u32(&encoded, 0), 0xcafe2580);
    assert_eq!(read_u32(&encoded, 8) as usize, encoded.len() - 48);
    assert_eq!(read_u32(&encoded, 12), 0x94119c00);

    // Reserved words are zero
    assert_eq!(read_u32(&encoded, 16), 0);
    assert_eq!(read_u32(&encoded, 20), 0);
    assert_eq!(read_u32(&encoded, 24), 0);
    assert_eq!(read_u32(&encoded, 32), 0);
    assert_eq!(read_u32(&encoded, 36), 0);

    // 16000 Hz has sample rate id 3
    assert_eq!(read_u32(&encoded, 28), 3 << 27);

    // number_samples plus round(16000 * 0.24)
    assert_eq!(read_u32(&encoded, 40), 128000 + 3840);

    assert_eq!(read_u32(&encoded, 44), (15 << 19) + 0x40000);

    // Fixed TLV section repeats the payload size
    assert_eq!(read_u32(&encoded, 48), 0x40000000);
    assert_eq!(read_u32(&encoded, 52), read_u32(&encoded, 8));
}

#[test]
fn test_sample_rate_enum_encoding() {
    let signature = DecodedSignature {
        sample_rate_hz: 44100,
        number_samples: 44100,
        frequency_band_to_sound_peaks: HashMap::new(),
    };

    let encoded = signature.encode_to_binary().unwrap();

    // 44100 Hz has sample rate id 5, left-shifted by 27 in its header word
    assert_eq!(read_u32(&encoded, 28), 5 << 27);
    assert_eq!(read_u32(&encoded, 28), 0x28000000);

    assert_eq!(read_u32(&encoded, 40), 44100 + 10584);

    let decoded = DecodedSignature::decode_from_binary(&encoded).unwrap();
    assert_eq!(decoded.sample_rate_hz, 44100);
    assert_eq!(decoded.number_samples, 44100);
}

#[test]
fn test_absolute_marker_payload_layout() {
    let mut bands = HashMap::new();
    bands.insert(
        FrequencyBand::_250_520,
        vec![peak(10, 100, 2500, 16000), peak(400, 100, 2500, 16000)],
    );

    let signature = DecodedSignature {
        sample_rate_hz: 16000,
        number_samples: 64000,
        frequency_band_to_sound_peaks: bands,
    };

    let encoded = signature.encode_to_binary().unwrap();

    // Band section starts after the header and the fixed TLV
    assert_eq!(read_u32(&encoded, 56), 0x60030040);
    assert_eq!(read_u32(&encoded, 60), 15);

    // First peak as a delta record, then an absolute marker for pass 400
    // (0x190) and the second peak with a zero delta
    assert_eq!(
        &encoded[64..79],
        &[
            0x0a, 0x64, 0x00, 0xc4, 0x09, // delta 10, magnitude 100, bin 2500
            0xff, 0x90, 0x01, 0x00, 0x00, // marker, absolute pass 400
            0x00, 0x64, 0x00, 0xc4, 0x09, // delta 0, magnitude 100, bin 2500
        ]
    );

    // One padding byte brings the section to a 4-byte boundary
    assert_eq!(encoded[79], 0x00);
    assert_eq!(encoded.len(), 80);

    let decoded = DecodedSignature::decode_from_binary(&encoded).unwrap();
    assert_eq!(decoded, signature);
}

#[test]
fn test_invalid_magic1_is_rejected() {
    let mut encoded = sample_signature().encode_to_binary().unwrap();

    encoded[0..4].copy_from_slice(&0xdeadbeefu32.to_le_bytes());

    assert_eq!(
        DecodedSignature::decode_from_binary(&encoded),
        Err(DecodeError::InvalidMagic)
    );
}

#[test]
fn test_invalid_magic2_is_rejected() {
    let mut encoded = sample_signature().encode_to_binary().unwrap();

    encoded[12] ^= 0xff;
    refresh_crc(&mut encoded);

    assert_eq!(
        DecodedSignature::decode_from_binary(&encoded),
        Err(DecodeError::InvalidMagic)
    );
}

#[test]
fn test_bit_flips_fail_the_checksum() {
    let encoded = sample_signature().encode_to_binary().unwrap();

    // A flip in the reserved header area
    let mut tampered = encoded.clone();
    tampered[20] ^= 0x01;
    assert_eq!(
        DecodedSignature::decode_from_binary(&tampered),
        Err(DecodeError::ChecksumMismatch)
    );

    // A flip in the size field, which the CRC also covers
    let mut tampered = encoded.clone();
    tampered[8] ^= 0x40;
    assert_eq!(
        DecodedSignature::decode_from_binary(&tampered),
        Err(DecodeError::ChecksumMismatch)
    );

    // A flip in a peak record
    let mut tampered = encoded.clone();
    let last = tampered.len() - 3;
    tampered[last] ^= 0x80;
    assert_eq!(
        DecodedSignature::decode_from_binary(&tampered),
        Err(DecodeError::ChecksumMismatch)
    );
}

#[test]
fn test_size_mismatch_with_valid_checksum() {
    let mut encoded = sample_signature().encode_to_binary().unwrap();

    let declared = read_u32(&encoded, 8);
    encoded[8..12].copy_from_slice(&(declared + 4).to_le_bytes());
    refresh_crc(&mut encoded);

    assert_eq!(
        DecodedSignature::decode_from_binary(&encoded),
        Err(DecodeError::SizeMismatch)
    );
}

#[test]
fn test_fixed_tlv_validation() {
    // Wrong TLV type word
    let mut encoded = sample_signature().encode_to_binary().unwrap();
    encoded[48..52].copy_from_slice(&0x41000000u32.to_le_bytes());
    refresh_crc(&mut encoded);
    assert_eq!(
        DecodedSignature::decode_from_binary(&encoded),
        Err(DecodeError::InvalidMagic)
    );

    // TLV length disagreeing with the header size field
    let mut encoded = sample_signature().encode_to_binary().unwrap();
    let declared = read_u32(&encoded, 52);
    encoded[52..56].copy_from_slice(&(declared + 4).to_le_bytes());
    refresh_crc(&mut encoded);
    assert_eq!(
        DecodedSignature::decode_from_binary(&encoded),
        Err(DecodeError::SizeMismatch)
    );
}

#[test]
fn test_unknown_sample_rate_is_rejected() {
    let mut encoded = sample_signature().encode_to_binary().unwrap();

    encoded[28..32].copy_from_slice(&(7u32 << 27).to_le_bytes());
    refresh_crc(&mut encoded);

    assert_eq!(
        DecodedSignature::decode_from_binary(&encoded),
        Err(DecodeError::UnknownSampleRate)
    );
}

#[test]
fn test_unknown_band_is_rejected() {
    let mut bands = HashMap::new();
    bands.insert(FrequencyBand::_250_520, vec![peak(3, 12000, 2500, 16000)]);

    let signature = DecodedSignature {
        sample_rate_hz: 16000,
        number_samples: 16000,
        frequency_band_to_sound_peaks: bands,
    };

    let mut encoded = signature.encode_to_binary().unwrap();

    // 0x6003003f is one below the band id base, i.e. the unstorable
    // 0-250 Hz band
    encoded[56..60].copy_from_slice(&0x6003003fu32.to_le_bytes());
    refresh_crc(&mut encoded);

    assert_eq!(
        DecodedSignature::decode_from_binary(&encoded),
        Err(DecodeError::UnknownBand)
    );
}

#[test]
fn test_truncated_buffers_are_rejected() {
    assert_eq!(
        DecodedSignature::decode_from_binary(b"short"),
        Err(DecodeError::Truncated)
    );

    // A band section that declares more payload than the buffer holds
    let mut data = Vec::new();
    data.extend_from_slice(&0xcafe2580u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&16u32.to_le_bytes());
    data.extend_from_slice(&0x94119c00u32.to_le_bytes());
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(&(3u32 << 27).to_le_bytes());
    data.extend_from_slice(&[0u8; 8]);
    data.extend_from_slice(&(16000u32 + 3840).to_le_bytes());
    data.extend_from_slice(&((15u32 << 19) + 0x40000).to_le_bytes());
    data.extend_from_slice(&0x40000000u32.to_le_bytes());
    data.extend_from_slice(&16u32.to_le_bytes());
    data.extend_from_slice(&0x60030040u32.to_le_bytes());
    data.extend_from_slice(&100u32.to_le_bytes());
    refresh_crc(&mut data);

    assert_eq!(
        DecodedSignature::decode_from_binary(&data),
        Err(DecodeError::Truncated)
    );
}

#[test]
fn test_encode_rejects_invalid_signatures() {
    // Sample rate without a wire id
    let signature = DecodedSignature {
        sample_rate_hz: 12345,
        number_samples: 16000,
        frequency_band_to_sound_peaks: HashMap::new(),
    };
    assert!(signature.encode_to_binary().is_err());

    // Decreasing pass numbers within a band
    let mut bands = HashMap::new();
    bands.insert(
        FrequencyBand::_250_520,
        vec![peak(10, 100, 2500, 16000), peak(5, 100, 2600, 16000)],
    );
    let signature = DecodedSignature {
        sample_rate_hz: 16000,
        number_samples: 16000,
        frequency_band_to_sound_peaks: bands,
    };
    assert!(signature.encode_to_binary().is_err());
}

#[test]
fn test_data_uri_round_trip() {
    let signature = sample_signature();

    let uri = signature.encode_to_uri().unwrap();
    assert!(uri.starts_with("data:audio/vnd.shazam.sig;base64,"));

    let decoded = DecodedSignature::decode_from_uri(&uri).unwrap();
    assert_eq!(decoded, signature);

    assert_eq!(
        DecodedSignature::decode_from_uri("data:text/plain;base64,AAAA"),
        Err(DecodeError::InvalidUri)
    );
    assert_eq!(
        DecodedSignature::decode_from_uri("data:audio/vnd.shazam.sig;base64,!!!"),
        Err(DecodeError::InvalidUri)
    );
}

#[test]
fn test_json_rendition() {
    let rendered = sample_signature().encode_to_json();

    assert_eq!(rendered["sample_rate_hz"], 16000);
    assert_eq!(rendered["number_samples"], 128000);
    assert_eq!(rendered["_seconds"], 8.0);

    let first_peak = &rendered["frequency_band_to_peaks"]["250_520"][0];
    assert_eq!(first_peak["fft_pass_number"], 3);
    assert_eq!(first_peak["peak_magnitude"], 12000);
    assert_eq!(first_peak["corrected_peak_frequency_bin"], 2500);
    assert!(first_peak["_frequency_hz"].is_number());
    assert!(first_peak["_amplitude_pcm"].is_number());
    assert!(first_peak["_seconds"].is_number());

    assert_eq!(rendered["frequency_band_to_peaks"]["1450_3500"].as_array().unwrap().len(), 3);
}

#[test]
fn test_peak_derived_quantities() {
    // Bin 8192 is 128 * 64, i.e. FFT bin 128, which is 1 kHz at 16 kHz
    let reference = peak(125, 6144, 8192, 16000);

    assert!((reference.get_frequency_hz() - 1000.0).abs() < 1e-3);
    assert!((reference.get_seconds() - 1.0).abs() < 1e-6);

    // Magnitude 6144 corresponds to sqrt(2^17 / 2) / 1024 = 0.25 PCM
    assert!((reference.get_amplitude_pcm() - 0.25).abs() < 1e-6);
}
