//! Native highlight overlay seam.
//!
//! The bridge core does not render anything itself; it hands native-pixel
//! rectangles to an [`OverlayRenderer`] and lets the embedding shell decide
//! how to draw them. [`ChannelOverlay`] is the stock renderer: it forwards
//! commands over a channel to whatever UI loop is listening.

use guidepost_core::{
    geometry::Rect, DEFAULT_HIGHLIGHT_COLOR, DEFAULT_HIGHLIGHT_THICKNESS,
};
use tokio::sync::mpsc;
use tracing::warn;

/// Visual style applied to both native boxes and in-page highlights.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightStyle {
    pub color: String,
    pub thickness: f64,
    pub pulsing: bool,
}

impl Default for HighlightStyle {
    fn default() -> Self {
        Self {
            color: DEFAULT_HIGHLIGHT_COLOR.to_owned(),
            thickness: DEFAULT_HIGHLIGHT_THICKNESS,
            pulsing: true,
        }
    }
}

/// Draws attention boxes on top of the user's screen.
pub trait OverlayRenderer: Send {
    fn show_box(&mut self, rect: Rect, style: &HighlightStyle);
    fn clear(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayCommand {
    Show { rect: Rect, style: HighlightStyle },
    Clear,
}

/// Renderer that ships commands to a UI loop over an unbounded channel.
pub struct ChannelOverlay {
    tx: mpsc::UnboundedSender<OverlayCommand>,
}

impl ChannelOverlay {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OverlayCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OverlayRenderer for ChannelOverlay {
    fn show_box(&mut self, rect: Rect, style: &HighlightStyle) {
        if self
            .tx
            .send(OverlayCommand::Show {
                rect,
                style: style.clone(),
            })
            .is_err()
        {
            warn!("overlay channel closed; dropping highlight box");
        }
    }

    fn clear(&mut self) {
        if self.tx.send(OverlayCommand::Clear).is_err() {
            warn!("overlay channel closed; dropping clear");
        }
    }
}
