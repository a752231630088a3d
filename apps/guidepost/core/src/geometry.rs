//! Inverse mapping from the vision model's 1000x1000 logical space back to
//! native screen pixels.
//!
//! The model answers in a fixed square regardless of the real display, so the
//! inversion depends on how the screenshot was fitted into that square. The
//! two fits are not interchangeable: a box inverted with the wrong
//! [`CaptureMode`] lands in the wrong place.

use serde::{Deserialize, Serialize};

/// Side length of the logical square the model sees.
pub const NORMALIZED_SPAN: f64 = 1000.0;

/// How the native frame was fitted into the 1000x1000 square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureMode {
    /// Frame stretched to fill the square, ignoring aspect ratio.
    Stretched,
    /// Frame scaled to fit, centered, with padding on the short axis.
    Letterboxed,
}

/// Bounding box in the model's coordinate space. The model does not promise
/// `ymax >= ymin` or `xmax >= xmin`; widths and heights are taken as
/// absolute values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub ymin: f64,
    pub xmin: f64,
    pub ymax: f64,
    pub xmax: f64,
}

/// Axis-aligned rectangle in native screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedBox {
    pub fn new(ymin: f64, xmin: f64, ymax: f64, xmax: f64) -> Self {
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }

    /// Clamps every scalar into `[0, 1000]`.
    pub fn clamped(self) -> Self {
        let clamp = |v: f64| v.clamp(0.0, NORMALIZED_SPAN);
        Self {
            ymin: clamp(self.ymin),
            xmin: clamp(self.xmin),
            ymax: clamp(self.ymax),
            xmax: clamp(self.xmax),
        }
    }

    /// Maps this box onto a `native_w` x `native_h` screen.
    pub fn to_native_rect(self, mode: CaptureMode, native_w: u32, native_h: u32) -> Rect {
        let boxed = self.clamped();
        let native_w = native_w as f64;
        let native_h = native_h as f64;

        match mode {
            CaptureMode::Stretched => {
                let scale_x = native_w / NORMALIZED_SPAN;
                let scale_y = native_h / NORMALIZED_SPAN;
                Rect {
                    x: boxed.xmin.min(boxed.xmax) * scale_x,
                    y: boxed.ymin.min(boxed.ymax) * scale_y,
                    width: (boxed.xmax - boxed.xmin).abs() * scale_x,
                    height: (boxed.ymax - boxed.ymin).abs() * scale_y,
                }
            }
            CaptureMode::Letterboxed => {
                let scale = (NORMALIZED_SPAN / native_w).min(NORMALIZED_SPAN / native_h);
                let pad_x = (NORMALIZED_SPAN - native_w * scale) / 2.0;
                let pad_y = (NORMALIZED_SPAN - native_h * scale) / 2.0;

                let x0 = ((boxed.xmin.min(boxed.xmax) - pad_x) / scale).clamp(0.0, native_w);
                let y0 = ((boxed.ymin.min(boxed.ymax) - pad_y) / scale).clamp(0.0, native_h);
                let x1 = ((boxed.xmin.max(boxed.xmax) - pad_x) / scale).clamp(0.0, native_w);
                let y1 = ((boxed.ymin.max(boxed.ymax) - pad_y) / scale).clamp(0.0, native_h);

                Rect {
                    x: x0,
                    y: y0,
                    width: x1 - x0,
                    height: y1 - y0,
                }
            }
        }
    }
}
