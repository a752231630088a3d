//! Chooses where a guidance highlight lands: inside the live page via the
//! companion, or on the native overlay. Exactly one of the two is active at
//! a time.

use guidepost_core::geometry::{CaptureMode, Rect};

use crate::{
    bridge::Bridge,
    overlay::{HighlightStyle, OverlayRenderer},
    vision::Guidance,
};

/// The highlight currently on screen, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum GuidanceTarget {
    None,
    NativeBox { rect: Rect },
    BrowserSelector { selector: String },
}

pub struct TargetRouter {
    bridge: Bridge,
    overlay: Box<dyn OverlayRenderer>,
    style: HighlightStyle,
    active: GuidanceTarget,
}

impl TargetRouter {
    pub fn new(bridge: Bridge, overlay: Box<dyn OverlayRenderer>) -> Self {
        Self::with_style(bridge, overlay, HighlightStyle::default())
    }

    pub fn with_style(
        bridge: Bridge,
        overlay: Box<dyn OverlayRenderer>,
        style: HighlightStyle,
    ) -> Self {
        Self {
            bridge,
            overlay,
            style,
            active: GuidanceTarget::None,
        }
    }

    pub fn active(&self) -> &GuidanceTarget {
        &self.active
    }

    /// Routes one guidance result. A selector wins over a screen box whenever
    /// the companion is attached; otherwise the box is mapped into native
    /// pixels and drawn on the overlay. Guidance with neither clears the
    /// current highlight.
    pub fn apply(
        &mut self,
        guidance: &Guidance,
        mode: CaptureMode,
        native_width: u32,
        native_height: u32,
    ) {
        match &guidance.selector {
            Some(selector) if self.bridge.is_connected() => {
                self.overlay.clear();
                self.bridge
                    .highlight_element(selector, &self.style.color, self.style.thickness);
                self.active = GuidanceTarget::BrowserSelector {
                    selector: selector.clone(),
                };
            }
            _ => match guidance.screen_box {
                Some(screen_box) => {
                    // Harmless when disconnected: the frame is dropped.
                    self.bridge.clear_highlight();
                    let rect = screen_box
                        .clamped()
                        .to_native_rect(mode, native_width, native_height);
                    self.overlay.show_box(rect, &self.style);
                    self.active = GuidanceTarget::NativeBox { rect };
                }
                None => self.clear(),
            },
        }
    }

    /// Removes whichever highlight is active.
    pub fn clear(&mut self) {
        match &self.active {
            GuidanceTarget::BrowserSelector { .. } => self.bridge.clear_highlight(),
            _ => self.overlay.clear(),
        }
        self.active = GuidanceTarget::None;
    }

    /// Re-renders the active target in the current style without a fresh
    /// guidance round. Used when the style changes mid-session.
    pub fn set_style(&mut self, style: HighlightStyle) {
        self.style = style;
        self.refresh();
    }

    pub fn refresh(&mut self) {
        match self.active.clone() {
            GuidanceTarget::NativeBox { rect } => {
                self.overlay.show_box(rect, &self.style);
            }
            GuidanceTarget::BrowserSelector { selector } => {
                self.bridge
                    .highlight_element(&selector, &self.style.color, self.style.thickness);
            }
            GuidanceTarget::None => {}
        }
    }
}
