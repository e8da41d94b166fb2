use serde::{Deserialize, Serialize};

/// How the signature generator decides a signature under construction is
/// complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationPolicy {
    /// Keep consuming audio while either cap is still unmet; a signature is
    /// complete only once the time cap and the peak cap are both reached.
    /// This is the engine's historical behavior.
    BothCaps,

    /// Stop as soon as either cap is reached.
    EitherCap,
}

/// Configuration for signature generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sample rate of the PCM input, in Hz
    pub sample_rate: u32,

    /// Time cap for a single signature, in seconds
    pub max_time_seconds: f32,

    /// Peak cap for a single signature
    pub max_peaks: usize,

    /// How the time and peak caps combine into a termination decision
    pub termination_policy: TerminationPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            max_time_seconds: 30.0,
            max_peaks: 255,
            termination_policy: TerminationPolicy::BothCaps,
        }
    }
}

impl Config {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the input sample rate
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the time cap for a single signature
    pub fn with_max_time_seconds(mut self, max_time_seconds: f32) -> Self {
        self.max_time_seconds = max_time_seconds.max(0.0);
        self
    }

    /// Set the peak cap for a single signature
    pub fn with_max_peaks(mut self, max_peaks: usize) -> Self {
        self.max_peaks = max_peaks;
        self
    }

    /// Set the cap combination policy
    pub fn with_termination_policy(mut self, termination_policy: TerminationPolicy) -> Self {
        self.termination_policy = termination_policy;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
