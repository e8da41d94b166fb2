//! # vibesig
//!
//! A Rust library for generating compact audio fingerprint signatures from raw
//! PCM audio, and for encoding/decoding those signatures against the bit-exact
//! binary container the recognition service expects.
//!
//! ## Features
//!
//! - Streaming signature generation from 16-bit mono 16 kHz PCM samples
//! - Sliding STFT with peak spreading and spatio-temporal peak recognition
//! - Bit-exact binary signature codec (CRC-32 header, TLV band sections)
//! - Data-URI and debugging-JSON renditions of signatures
//!
//! ## Example
//!
//! ```rust,no_run
//! use vibesig::SignatureGenerator;
//!
//! let samples: Vec<i16> = vec![0; 16000];
//!
//! let mut generator = SignatureGenerator::new();
//! generator.feed_input(&samples);
//!
//! if let Some(signature) = generator.get_next_signature() {
//!     let bytes = signature.encode_to_binary().unwrap();
//!     println!("{} byte signature", bytes.len());
//! }
//! ```

pub mod config;

// Signature pipeline modules
pub mod fingerprinting {
    pub mod algorithm;
    pub mod hanning;
    pub mod ring_buffer;
    pub mod signature_format;
}

pub use config::{Config, TerminationPolicy};
pub use fingerprinting::algorithm::SignatureGenerator;
pub use fingerprinting::signature_format::{
    DecodeError, DecodedSignature, FrequencyBand, FrequencyPeak, SampleRate,
};

/// Current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
