use crate::frame::HEADER_OVERHEAD;
use anyhow::bail;
use std::time::Duration;

/// Tuning knobs for one MissionLink endpoint. The defaults match the deployed
/// fleet configuration; anything else is for tests and lab setups.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// UDP port both sides listen on.
    pub datagram_port: u16,

    /// How long a single receive operation blocks before the waiting step
    /// retransmits.
    pub receive_timeout: Duration,

    /// Retry budget per protocol step (open, each data chunk, close).
    pub retry_limit: u32,

    /// Datagram size. The frame header takes [`HEADER_OVERHEAD`] bytes of
    /// this, the rest is chunk payload.
    pub buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> LinkConfig {
        LinkConfig {
            datagram_port: 8080,
            receive_timeout: Duration::from_secs(2),
            retry_limit: 5,
            buffer_size: 1024,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.buffer_size <= HEADER_OVERHEAD {
            bail!("buffer size {} leaves no room for payload", self.buffer_size);
        }
        if self.retry_limit == 0 {
            bail!("retry limit must be at least 1");
        }
        if self.receive_timeout.is_zero() {
            bail!("receive timeout must be non-zero");
        }
        Ok(())
    }

    /// Largest body that fits in one data frame.
    pub fn max_chunk_len(&self) -> usize {
        self.buffer_size - HEADER_OVERHEAD
    }
}
