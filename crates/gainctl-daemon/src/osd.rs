//! A display sink that writes the OSD label to the log.

use gainctl_core::{DisplaySink, Gain, OsdLabel};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Logs what an on-screen display would show.
#[derive(Debug, Default)]
pub struct LogOsd {
    last: Mutex<Option<OsdLabel>>,
}

impl LogOsd {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySink for LogOsd {
    fn show(&self, gain: Gain) {
        let label = OsdLabel::for_gain(gain);
        let repeated = self.last.lock().replace(label) == Some(label);
        if repeated {
            debug!(%label, "OSD");
        } else {
            info!(%label, "OSD");
        }
    }
}
