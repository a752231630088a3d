//! Browser-companion client for the local guidance bridge.
//!
//! Maintains one WebSocket connection to the bridge, retrying forever on a
//! fixed interval, and answers the bridge's commands by delegating to a
//! [`PageActions`] implementation supplied by the embedder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use guidepost_core::{
    protocol::{PageElement, PageSummary},
    RECONNECT_INTERVAL,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

mod connection;

/// Operations the companion performs against the live page.
#[async_trait]
pub trait PageActions: Send + Sync {
    async fn summarize_page(&self) -> Result<PageSummary, String>;
    async fn highlight(&self, selector: &str, color: &str, thickness: f64) -> Result<(), String>;
    async fn clear_highlight(&self);
    async fn set_zoom(&self, zoom_level: f64) -> Result<(), String>;
}

/// Record of one highlight command the page received.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightCall {
    pub selector: String,
    pub color: String,
    pub thickness: f64,
}

/// [`PageActions`] backed by a canned summary, recording every call.
/// Stands in for a real page in tests and dry runs.
pub struct ScriptedPage {
    summary: PageSummary,
    highlights: Mutex<Vec<HighlightCall>>,
    zooms: Mutex<Vec<f64>>,
    cleared: AtomicBool,
}

impl ScriptedPage {
    pub fn new(summary: PageSummary) -> Self {
        Self {
            summary,
            highlights: Mutex::new(Vec::new()),
            zooms: Mutex::new(Vec::new()),
            cleared: AtomicBool::new(false),
        }
    }

    pub fn sample() -> Self {
        Self::new(PageSummary {
            url: "https://example.com/".to_owned(),
            title: "Example Domain".to_owned(),
            elements: vec![PageElement {
                id: "more".to_owned(),
                selector: "p > a".to_owned(),
                tag: "a".to_owned(),
                text: Some("More information...".to_owned()),
                ..Default::default()
            }],
        })
    }

    pub fn highlights(&self) -> Vec<HighlightCall> {
        self.highlights.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn zooms(&self) -> Vec<f64> {
        self.zooms.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn was_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageActions for ScriptedPage {
    async fn summarize_page(&self) -> Result<PageSummary, String> {
        Ok(self.summary.clone())
    }

    async fn highlight(&self, selector: &str, color: &str, thickness: f64) -> Result<(), String> {
        self.highlights
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HighlightCall {
                selector: selector.to_owned(),
                color: color.to_owned(),
                thickness,
            });
        Ok(())
    }

    async fn clear_highlight(&self) {
        self.cleared.store(true, Ordering::SeqCst);
    }

    async fn set_zoom(&self, zoom_level: f64) -> Result<(), String> {
        self.zooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(zoom_level);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CompanionConfig {
    pub url: String,
    pub retry_interval: Duration,
}

impl CompanionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_interval: RECONNECT_INTERVAL,
        }
    }

    /// Config for a bridge on the local machine at `port`.
    pub fn local(port: u16) -> Self {
        Self::new(format!("ws://127.0.0.1:{port}/ws"))
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

enum Command {
    Reconnect,
    Shutdown,
}

/// Running companion; dropping the handle does not stop the task, call
/// [`CompanionHandle::shutdown`] for an orderly exit.
pub struct CompanionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ClientState>,
    task: JoinHandle<()>,
}

impl CompanionHandle {
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }

    /// Forces an immediate connection attempt, closing the current
    /// connection if one is open.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

pub struct CompanionClient<A: PageActions + 'static> {
    config: CompanionConfig,
    actions: std::sync::Arc<A>,
}

impl<A: PageActions + 'static> CompanionClient<A> {
    pub fn new(config: CompanionConfig, actions: std::sync::Arc<A>) -> Self {
        Self { config, actions }
    }

    /// Spawns the connection loop and returns a handle to it.
    pub fn spawn(self) -> CompanionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ClientState::Disconnected);
        let task = tokio::spawn(connection::run(
            self.config,
            self.actions,
            command_rx,
            state_tx,
        ));
        CompanionHandle {
            commands: command_tx,
            state: state_rx,
            task,
        }
    }
}
