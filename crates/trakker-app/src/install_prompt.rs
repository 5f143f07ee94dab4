//! Deferred install prompt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// The user's answer to the install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptOutcome {
    Accepted,
    Dismissed,
}

/// A `beforeinstallprompt` event held back for later.
#[async_trait]
pub trait DeferredPrompt: Send + Sync {
    /// Show the prompt and wait for the user's choice.
    async fn prompt(&self) -> PromptOutcome;
}

/// Install button state.
#[derive(Default)]
pub struct InstallPrompt {
    deferred: Option<Box<dyn DeferredPrompt>>,
    button_visible: bool,
}

impl InstallPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the prompt and reveal the install button.
    pub fn on_before_install_prompt(&mut self, prompt: Box<dyn DeferredPrompt>) {
        debug!("Install prompt deferred");
        self.deferred = Some(prompt);
        self.button_visible = true;
    }

    /// Replay the deferred prompt. Returns `None` when nothing is deferred.
    ///
    /// The prompt is consumed either way; an accepted install hides the
    /// button.
    pub async fn on_install_click(&mut self) -> Option<PromptOutcome> {
        let prompt = self.deferred.take()?;
        let outcome = prompt.prompt().await;
        info!(?outcome, "Install prompt answered");
        if outcome == PromptOutcome::Accepted {
            self.button_visible = false;
        }
        Some(outcome)
    }

    pub fn button_visible(&self) -> bool {
        self.button_visible
    }

    pub fn has_deferred(&self) -> bool {
        self.deferred.is_some()
    }
}

impl std::fmt::Debug for InstallPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallPrompt")
            .field("deferred", &self.has_deferred())
            .field("button_visible", &self.button_visible)
            .finish()
    }
}
