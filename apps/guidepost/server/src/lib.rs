//! Local Guidance Bridge server.
//!
//! Hosts the single-tenant WebSocket endpoint the browser companion attaches
//! to, correlates page-summary requests with their replies, routes guidance
//! highlights to the page or the native overlay, and talks to the vision
//! model.

pub mod bridge;
pub mod config;
pub mod guidance;
pub mod overlay;
pub mod router;
pub mod vision;

pub use bridge::{Bridge, BridgeError, SlotState};
pub use guidance::{
    GuidanceError, GuidanceSession, ScreenError, ScreenSource, Screenshot, StaticScreenSource,
    Step,
};
pub use overlay::{ChannelOverlay, HighlightStyle, OverlayCommand, OverlayRenderer};
pub use router::{GuidanceTarget, TargetRouter};
pub use vision::{Guidance, GuidanceButton, HttpVisionClient, VisionError, VisionModel};
