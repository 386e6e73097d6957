//! Live and snapshot controls.
//!
//! Both controls disable themselves for a cooldown after every activation, so repeated clicks
//! cannot queue overlapping start/stop requests. The live control also swaps its label, icon
//! and action between "start live" and "stop live".

use std::time::Duration;
use tokio::time::Instant;

use crate::error::{AppResult, ConsoleError};

/// Disables a control for a fixed time after each activation.
#[derive(Debug, Clone)]
pub struct Cooldown {
    duration: Duration,
    disabled_until: Option<Instant>,
}

impl Cooldown {
    /// Create an enabled cooldown of `duration`.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            disabled_until: None,
        }
    }

    /// Whether the control accepts activations at `now`.
    pub fn is_enabled(&self, now: Instant) -> bool {
        self.disabled_until.map_or(true, |until| now >= until)
    }

    /// Activate at `now`. Returns `false` and changes nothing while disabled.
    pub fn trigger(&mut self, now: Instant) -> bool {
        if !self.is_enabled(now) {
            return false;
        }
        self.disabled_until = Some(now + self.duration);
        true
    }

    /// Time left until the control is enabled again.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.disabled_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }
}

/// What pressing the live control does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveAction {
    /// Start an unbounded session
    Start,
    /// Stop the running session
    Stop,
}

/// Icon of the live control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlIcon {
    /// Start symbol
    Play,
    /// Stop symbol
    Stop,
}

/// Live toggle of one camera.
#[derive(Debug, Clone)]
pub struct LiveToggle {
    camera: String,
    action: LiveAction,
    cooldown: Cooldown,
}

impl LiveToggle {
    /// Toggle in the "Live" state.
    pub fn new(camera: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            camera: camera.into(),
            action: LiveAction::Start,
            cooldown: Cooldown::new(cooldown),
        }
    }

    /// Camera this toggle controls.
    pub fn camera(&self) -> &str {
        &self.camera
    }

    /// Action the next press performs.
    pub fn action(&self) -> LiveAction {
        self.action
    }

    /// Label shown on the control.
    pub fn label(&self) -> &'static str {
        match self.action {
            LiveAction::Start => "Live",
            LiveAction::Stop => "Stop",
        }
    }

    /// Icon shown on the control.
    pub fn icon(&self) -> ControlIcon {
        match self.action {
            LiveAction::Start => ControlIcon::Play,
            LiveAction::Stop => ControlIcon::Stop,
        }
    }

    /// Whether the control accepts a press at `now`.
    pub fn is_enabled(&self, now: Instant) -> bool {
        self.cooldown.is_enabled(now)
    }

    /// Press the control: start the cooldown, swap the action and return the one to perform.
    pub fn press(&mut self, now: Instant) -> AppResult<LiveAction> {
        if !self.cooldown.trigger(now) {
            return Err(ConsoleError::ControlCoolingDown(format!(
                "live {}",
                self.camera
            )));
        }
        let action = self.action;
        self.action = match action {
            LiveAction::Start => LiveAction::Stop,
            LiveAction::Stop => LiveAction::Start,
        };
        Ok(action)
    }

    /// Return to the "Live" state, e.g. after the session ended on its own.
    pub fn reset(&mut self) {
        self.action = LiveAction::Start;
    }
}

/// Snapshot control of one camera.
#[derive(Debug, Clone)]
pub struct SnapshotButton {
    camera: String,
    cooldown: Cooldown,
}

impl SnapshotButton {
    /// Enabled snapshot control.
    pub fn new(camera: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            camera: camera.into(),
            cooldown: Cooldown::new(cooldown),
        }
    }

    /// Whether the control accepts a press at `now`.
    pub fn is_enabled(&self, now: Instant) -> bool {
        self.cooldown.is_enabled(now)
    }

    /// Press the control and start the cooldown.
    pub fn press(&mut self, now: Instant) -> AppResult<()> {
        if self.cooldown.trigger(now) {
            Ok(())
        } else {
            Err(ConsoleError::ControlCoolingDown(format!(
                "snapshot {}",
                self.camera
            )))
        }
    }
}
