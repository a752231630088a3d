//! A guidance session: capture the screen, gather page context when a
//! companion is attached, and ask the vision model for the next step.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use guidepost_core::{geometry::CaptureMode, SUMMARY_TIMEOUT};
use thiserror::Error;
use tracing::debug;

use crate::{
    bridge::Bridge,
    vision::{Guidance, VisionError, VisionModel},
};

#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("screen capture failed: {0}")]
    Capture(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One captured frame plus the facts needed to map boxes back onto it.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub png: Vec<u8>,
    pub native_width: u32,
    pub native_height: u32,
    pub mode: CaptureMode,
}

/// Supplies screenshots of the user's display.
pub trait ScreenSource: Send {
    fn capture(&mut self) -> Result<Screenshot, ScreenError>;
}

/// Screen source backed by a fixed image. Useful for tests and dry runs.
pub struct StaticScreenSource {
    shot: Screenshot,
}

impl StaticScreenSource {
    pub fn new(png: Vec<u8>, native_width: u32, native_height: u32, mode: CaptureMode) -> Self {
        Self {
            shot: Screenshot {
                png,
                native_width,
                native_height,
                mode,
            },
        }
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        native_width: u32,
        native_height: u32,
        mode: CaptureMode,
    ) -> Result<Self, ScreenError> {
        let png = std::fs::read(path)?;
        Ok(Self::new(png, native_width, native_height, mode))
    }
}

impl ScreenSource for StaticScreenSource {
    fn capture(&mut self) -> Result<Screenshot, ScreenError> {
        Ok(self.shot.clone())
    }
}

#[derive(Debug, Error)]
pub enum GuidanceError {
    #[error(transparent)]
    Screen(#[from] ScreenError),
    #[error(transparent)]
    Vision(#[from] VisionError),
}

impl GuidanceError {
    /// Message suitable for showing to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            GuidanceError::Screen(_) => "Error capturing your screen. Please try again.",
            GuidanceError::Vision(_) => "Error analyzing your screen. Please try again.",
        }
    }
}

/// One guidance step together with the capture it was computed from.
#[derive(Debug, Clone)]
pub struct Step {
    pub guidance: Guidance,
    pub mode: CaptureMode,
    pub native_width: u32,
    pub native_height: u32,
}

pub struct GuidanceSession {
    task: String,
    bridge: Bridge,
    vision: Arc<dyn VisionModel>,
    screen: Box<dyn ScreenSource>,
    summary_timeout: Duration,
}

impl GuidanceSession {
    pub fn new(
        task: impl Into<String>,
        bridge: Bridge,
        vision: Arc<dyn VisionModel>,
        screen: Box<dyn ScreenSource>,
    ) -> Self {
        Self {
            task: task.into(),
            bridge,
            vision,
            screen,
            summary_timeout: SUMMARY_TIMEOUT,
        }
    }

    pub fn with_summary_timeout(mut self, timeout: Duration) -> Self {
        self.summary_timeout = timeout;
        self
    }

    /// Produces the next guidance step. Page context is best-effort: if no
    /// companion is attached, or the summary request times out, the model is
    /// asked with the screenshot alone.
    pub async fn advance(&mut self) -> Result<Step, GuidanceError> {
        let shot = self.screen.capture()?;

        let summary = if self.bridge.is_connected() {
            self.bridge.request_page_summary(self.summary_timeout).await
        } else {
            debug!("no companion attached; analyzing without page context");
            None
        };

        let guidance = self
            .vision
            .analyze(&shot.png, &self.task, summary.as_ref())
            .await?;

        Ok(Step {
            guidance,
            mode: shot.mode,
            native_width: shot.native_width,
            native_height: shot.native_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use guidepost_core::protocol::PageSummary;

    struct CannedVision {
        saw_dom: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl VisionModel for CannedVision {
        async fn analyze(
            &self,
            _screenshot_png: &[u8],
            _task: &str,
            dom: Option<&PageSummary>,
        ) -> Result<Guidance, VisionError> {
            self.saw_dom
                .store(dom.is_some(), std::sync::atomic::Ordering::SeqCst);
            Ok(Guidance {
                instruction: "Click the Start button.".to_owned(),
                icon: None,
                screen_box: None,
                selector: None,
                buttons: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn advances_without_companion() {
        let vision = Arc::new(CannedVision {
            saw_dom: std::sync::atomic::AtomicBool::new(false),
        });
        let screen = StaticScreenSource::new(vec![0u8; 8], 1920, 1080, CaptureMode::Stretched);
        let mut session = GuidanceSession::new(
            "open the photos app",
            Bridge::new(),
            vision.clone(),
            Box::new(screen),
        );

        let step = session.advance().await.unwrap();
        assert_eq!(step.guidance.instruction, "Click the Start button.");
        assert_eq!(step.native_width, 1920);
        assert!(!vision.saw_dom.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn user_messages_are_stable() {
        let err = GuidanceError::Screen(ScreenError::Capture("no display".to_owned()));
        assert!(err.user_message().contains("capturing"));
    }
}
