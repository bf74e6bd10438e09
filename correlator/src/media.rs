use std::net::SocketAddr;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};
use crate::sequencer::StopSignal;

/// Streams audio to a remote RTP endpoint.
pub trait MediaPlayer: Send + Sync {
    /// Blocks until playback finishes. Returns [`Error::Stopped`] if the
    /// stop signal is raised first.
    fn play(&self, destination: SocketAddr, stop: &StopSignal) -> Result<()>;
}

/// Sends nothing; holds the line for the length of the clip.
#[derive(Debug, Clone)]
pub struct SilentPlayer {
    clip: Duration,
}

impl SilentPlayer {
    pub fn new(clip: Duration) -> Self {
        Self { clip }
    }
}

impl Default for SilentPlayer {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl MediaPlayer for SilentPlayer {
    fn play(&self, destination: SocketAddr, stop: &StopSignal) -> Result<()> {
        info!(%destination, clip = ?self.clip, "playing silence");
        if stop.sleep(self.clip) {
            return Err(Error::Stopped);
        }
        info!(%destination, "end of stream");
        Ok(())
    }
}
