//! Shared primitives for the Guidepost guidance bridge: the wire protocol
//! spoken between the desktop app and the browser companion, the codec that
//! frames it, and the coordinate math that maps vision-model answers back to
//! native screen pixels. Keeping these in one crate keeps the server and the
//! companion client from drifting apart.

use std::time::Duration;

pub mod codec;
pub mod geometry;
pub mod protocol;

pub use codec::{decode, encode, DecodeError};
pub use geometry::{CaptureMode, NormalizedBox, Rect};
pub use protocol::{BridgeMessage, ElementRect, PageElement, PageSummary};

/// Loopback port both processes agree on at build time.
pub const DEFAULT_BRIDGE_PORT: u16 = 9876;

/// How often the bridge pings an open companion connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Default budget for a correlated page-summary request.
pub const SUMMARY_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the companion retries a dead bridge.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Pause before the bridge rebinds its listener after a transport failure.
pub const LISTENER_RESTART_DELAY: Duration = Duration::from_secs(3);

pub const DEFAULT_HIGHLIGHT_COLOR: &str = "#00FF00";
pub const DEFAULT_HIGHLIGHT_THICKNESS: f64 = 4.0;

/// Page zoom factor for a named font-size preference, if the name is known.
pub fn zoom_level_for(font_size: &str) -> Option<f64> {
    match font_size {
        "Small" => Some(0.9),
        "Medium" => Some(1.0),
        "Large" => Some(1.15),
        "Extra Large" => Some(1.25),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_levels_match_companion_table() {
        assert_eq!(zoom_level_for("Medium"), Some(1.0));
        assert_eq!(zoom_level_for("Extra Large"), Some(1.25));
        assert_eq!(zoom_level_for("gigantic"), None);
    }
}
