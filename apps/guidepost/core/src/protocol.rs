//! Messages exchanged over the bridge WebSocket, one JSON object per text
//! frame. The protocol is a closed tagged union: every frame carries a `type`
//! discriminator, and each variant owns exactly the fields its type needs.

use serde::{Deserialize, Serialize};

/// Every message either end of the bridge can put on the wire.
///
/// Field names serialize in camelCase to match the browser side; decoding is
/// case-insensitive on field names (see [`crate::codec::decode`]), which is
/// why each renamed field also carries a lowercase alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    /// App asks the companion for a summary of the active page.
    #[serde(rename = "REQUEST_DOM")]
    RequestDom,

    /// Companion's reply to `REQUEST_DOM`.
    #[serde(rename = "DOM_SUMMARY")]
    DomSummary {
        data: PageSummary,
        #[serde(
            rename = "tabId",
            alias = "tabid",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        tab_id: Option<i64>,
    },

    /// App asks the companion to outline one element in the live page.
    #[serde(rename = "HIGHLIGHT_ELEMENT")]
    HighlightElement {
        selector: String,
        /// `#RRGGBB`.
        color: String,
        thickness: f64,
    },

    #[serde(rename = "CLEAR_HIGHLIGHT")]
    ClearHighlight,

    /// Push the user's font-size preference as a page zoom level.
    #[serde(rename = "SET_ZOOM")]
    SetZoom {
        #[serde(rename = "fontSize", alias = "fontsize")]
        font_size: String,
        enabled: bool,
    },

    #[serde(rename = "SET_ZOOM_ENABLED")]
    SetZoomEnabled { enabled: bool },

    #[serde(rename = "PING")]
    Ping,

    #[serde(rename = "PONG")]
    Pong,

    /// Companion announces its side of the link coming up or down.
    #[serde(rename = "CONNECTION_STATUS")]
    ConnectionStatus { connected: bool },

    #[serde(rename = "ERROR")]
    Error { message: String },

    /// Diagnostic ack for a delivered highlight; carries no state.
    #[serde(rename = "HIGHLIGHT_SUCCESS")]
    HighlightSuccess,

    /// Diagnostic ack for an applied zoom change.
    #[serde(rename = "ZOOM_SUCCESS")]
    ZoomSuccess {
        #[serde(
            rename = "fontSize",
            alias = "fontsize",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        font_size: Option<String>,
        #[serde(
            rename = "zoomLevel",
            alias = "zoomlevel",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        zoom_level: Option<f64>,
    },
}

impl BridgeMessage {
    /// Every tag this protocol knows. Anything else is forward-compatible
    /// noise: logged and ignored, never an error that closes the connection.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "REQUEST_DOM",
        "DOM_SUMMARY",
        "HIGHLIGHT_ELEMENT",
        "CLEAR_HIGHLIGHT",
        "SET_ZOOM",
        "SET_ZOOM_ENABLED",
        "PING",
        "PONG",
        "CONNECTION_STATUS",
        "ERROR",
        "HIGHLIGHT_SUCCESS",
        "ZOOM_SUCCESS",
    ];
}

/// Condensed description of the page the companion is looking at.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageSummary {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub elements: Vec<PageElement>,
}

impl PageSummary {
    /// Total element count including nested children, for log lines.
    pub fn element_count(&self) -> usize {
        fn walk(elements: &[PageElement]) -> usize {
            elements
                .iter()
                .map(|e| 1 + walk(&e.children))
                .sum::<usize>()
        }
        walk(&self.elements)
    }
}

/// One interactive element inside a [`PageSummary`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageElement {
    #[serde(default)]
    pub id: String,
    /// Selector the companion can resolve against the live document.
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(
        rename = "ariaLabel",
        alias = "arialabel",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<ElementRect>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PageElement>,
}

/// Viewport-relative bounds reported by the companion, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}
