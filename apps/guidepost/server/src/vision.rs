//! Vision model seam and the stock HTTP client for it.
//!
//! The model receives a screenshot, the user's task, and (when available)
//! the page summary from the companion, and answers with one guidance step:
//! an instruction plus an optional screen box or CSS selector.

use async_trait::async_trait;
use base64::Engine;
use guidepost_core::{geometry::NormalizedBox, protocol::PageSummary};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vision model returned an unusable answer: {0}")]
    BadAnswer(String),
}

/// An action button offered alongside a guidance step.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceButton {
    pub id: String,
    pub label: String,
    pub action: String,
}

impl GuidanceButton {
    pub fn more_help() -> Self {
        Self {
            id: "more_help".to_owned(),
            label: "More Help".to_owned(),
            action: "take_screenshot".to_owned(),
        }
    }

    pub fn exit() -> Self {
        Self {
            id: "exit".to_owned(),
            label: "Exit".to_owned(),
            action: "exit_help_mode".to_owned(),
        }
    }
}

/// One step of guidance produced by the vision model.
#[derive(Debug, Clone, PartialEq)]
pub struct Guidance {
    pub instruction: String,
    pub icon: Option<String>,
    /// Location of the target in 0..=1000 normalized screenshot space.
    pub screen_box: Option<NormalizedBox>,
    /// CSS selector for the target, usable only through the companion.
    pub selector: Option<String>,
    pub buttons: Vec<GuidanceButton>,
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn analyze(
        &self,
        screenshot_png: &[u8],
        task: &str,
        dom: Option<&PageSummary>,
    ) -> Result<Guidance, VisionError>;
}

/// Client for a Gemini-style generateContent endpoint.
pub struct HttpVisionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpVisionClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn prompt(task: &str, dom: Option<&PageSummary>) -> String {
        let mut prompt = format!(
            "You are guiding a computer novice through a task on their own screen.\n\
             Task: {task}\n\
             Look at the screenshot and answer with JSON only, in this shape:\n\
             {{\"instruction\": \"one short sentence telling the user what to do next\",\n \
             \"icon\": \"optional emoji\",\n \
             \"box-2d\": [ymin, xmin, ymax, xmax] on a 0-1000 scale, or null,\n \
             \"selector\": \"CSS selector of the target element, or null\"}}\n"
        );
        match dom {
            Some(summary) => {
                prompt.push_str(&format!(
                    "The active browser page is `{}` (`{}`) and its interactive elements \
                     are listed below. Prefer a selector from this list over a box when \
                     the target is in the page.\n{}\n",
                    summary.title,
                    summary.url,
                    serde_json::to_string(&summary.elements).unwrap_or_default(),
                ));
            }
            None => {
                prompt.push_str(
                    "No browser page context is available; always answer with a box-2d \
                     and set selector to null.\n",
                );
            }
        }
        prompt
    }

    fn answer_text(body: &Value) -> Option<&str> {
        body.get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .get(0)?
            .get("text")?
            .as_str()
    }
}

#[async_trait]
impl VisionModel for HttpVisionClient {
    async fn analyze(
        &self,
        screenshot_png: &[u8],
        task: &str,
        dom: Option<&PageSummary>,
    ) -> Result<Guidance, VisionError> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(screenshot_png);
        let request = json!({
            "contents": [{
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": "image/png",
                            "data": image_b64,
                        }
                    },
                    { "text": Self::prompt(task, dom) },
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
            },
        });

        debug!(task, has_dom = dom.is_some(), "sending vision request");
        let body: Value = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = Self::answer_text(&body)
            .ok_or_else(|| VisionError::BadAnswer("no candidate text in response".to_owned()))?;
        parse_guidance(text)
    }
}

/// Parses a model answer into a [`Guidance`], tolerating markdown code
/// fences around the JSON and missing optional fields.
pub fn parse_guidance(raw: &str) -> Result<Guidance, VisionError> {
    let stripped = strip_code_fence(raw);
    let value: Value = serde_json::from_str(stripped)
        .map_err(|err| VisionError::BadAnswer(format!("invalid JSON: {err}")))?;

    let instruction = value
        .get("instruction")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or("Continue with the next step.")
        .to_owned();

    let icon = value
        .get("icon")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned);

    let screen_box = value.get("box-2d").and_then(parse_box);
    if value.get("box-2d").is_some_and(|v| !v.is_null()) && screen_box.is_none() {
        warn!("ignoring malformed box-2d in vision answer");
    }

    let selector = value
        .get("selector")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned);

    Ok(Guidance {
        instruction,
        icon,
        screen_box,
        selector,
        buttons: vec![GuidanceButton::more_help(), GuidanceButton::exit()],
    })
}

fn parse_box(value: &Value) -> Option<NormalizedBox> {
    let coords = value.as_array()?;
    if coords.len() != 4 {
        return None;
    }
    let mut parsed = [0.0; 4];
    for (slot, coord) in parsed.iter_mut().zip(coords) {
        *slot = coord.as_f64()?;
    }
    Some(NormalizedBox::new(parsed[0], parsed[1], parsed[2], parsed[3]).clamped())
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
