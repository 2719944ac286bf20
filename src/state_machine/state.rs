use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// States of the order-entry pipeline.
///
/// One work item flows through:
/// IDLE → CONNECTING_REMOTE_DESKTOP → LAUNCHING_APPLICATION → NAVIGATING_TO_FORM
/// → LOADING_NIT → LOADING_ORDER → LOADING_DATE → POSITIONING_MOUSE → LOADING_ITEMS
/// → TAKING_SCREENSHOT → ARCHIVING_WORK_ITEM → UPLOADING_ARTIFACT → COMPLETED
///
/// ERROR and RETRYING are reachable from any working state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Idle,
    ConnectingRemoteDesktop,
    LaunchingApplication,
    NavigatingToForm,
    LoadingNit,
    LoadingOrder,
    LoadingDate,
    PositioningMouse,
    LoadingItems,
    TakingScreenshot,
    ArchivingWorkItem,
    UploadingArtifact,
    Completed,
    Error,
    Retrying,
}

impl State {
    /// COMPLETED and ERROR end a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Error)
    }

    /// States that have a handler doing UI work.
    pub fn is_working(self) -> bool {
        !matches!(
            self,
            State::Idle | State::Completed | State::Error | State::Retrying
        )
    }

    /// States worth persisting in a checkpoint.
    pub fn is_checkpointed(self) -> bool {
        !matches!(self, State::Idle | State::Retrying)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "IDLE",
            State::ConnectingRemoteDesktop => "CONNECTING_REMOTE_DESKTOP",
            State::LaunchingApplication => "LAUNCHING_APPLICATION",
            State::NavigatingToForm => "NAVIGATING_TO_FORM",
            State::LoadingNit => "LOADING_NIT",
            State::LoadingOrder => "LOADING_ORDER",
            State::LoadingDate => "LOADING_DATE",
            State::PositioningMouse => "POSITIONING_MOUSE",
            State::LoadingItems => "LOADING_ITEMS",
            State::TakingScreenshot => "TAKING_SCREENSHOT",
            State::ArchivingWorkItem => "ARCHIVING_WORK_ITEM",
            State::UploadingArtifact => "UPLOADING_ARTIFACT",
            State::Completed => "COMPLETED",
            State::Error => "ERROR",
            State::Retrying => "RETRYING",
        };
        f.pad(name)
    }
}

/// What a handler reports after doing its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Connected,
    ApplicationLaunched,
    NavigationSuccess,
    NitLoaded,
    OrderLoaded,
    DateLoaded,
    MousePositioned,
    ItemsLoaded,
    ScreenshotTaken,
    WorkItemArchived,
    ArtifactUploaded,
    ProcessingComplete,
    ErrorOccurred,
    RetryNeeded,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Connected => "CONNECTED",
            Event::ApplicationLaunched => "APPLICATION_LAUNCHED",
            Event::NavigationSuccess => "NAVIGATION_SUCCESS",
            Event::NitLoaded => "NIT_LOADED",
            Event::OrderLoaded => "ORDER_LOADED",
            Event::DateLoaded => "DATE_LOADED",
            Event::MousePositioned => "MOUSE_POSITIONED",
            Event::ItemsLoaded => "ITEMS_LOADED",
            Event::ScreenshotTaken => "SCREENSHOT_TAKEN",
            Event::WorkItemArchived => "WORK_ITEM_ARCHIVED",
            Event::ArtifactUploaded => "ARTIFACT_UPLOADED",
            Event::ProcessingComplete => "PROCESSING_COMPLETE",
            Event::ErrorOccurred => "ERROR_OCCURRED",
            Event::RetryNeeded => "RETRY_NEEDED",
        };
        f.pad(name)
    }
}

/// Where a transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    State(State),
    /// Back to the state whose failure sent the machine to RETRYING.
    FailedState,
}

/// Legal `(state, event)` pairs and where each leads.
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    transitions: HashMap<(State, Event), Target>,
}

impl TransitionTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The sales-order pipeline.
    pub fn standard() -> Self {
        use Event::*;
        use State::*;

        Self::empty()
            .with(ConnectingRemoteDesktop, Connected, LaunchingApplication)
            .with(LaunchingApplication, ApplicationLaunched, NavigatingToForm)
            .with(NavigatingToForm, NavigationSuccess, LoadingNit)
            .with(LoadingNit, NitLoaded, LoadingOrder)
            .with(LoadingOrder, OrderLoaded, LoadingDate)
            .with(LoadingDate, DateLoaded, PositioningMouse)
            .with(PositioningMouse, MousePositioned, LoadingItems)
            .with(LoadingItems, ItemsLoaded, TakingScreenshot)
            .with(TakingScreenshot, ScreenshotTaken, ArchivingWorkItem)
            .with(ArchivingWorkItem, WorkItemArchived, UploadingArtifact)
            .with(UploadingArtifact, ArtifactUploaded, Completed)
            .with(UploadingArtifact, ProcessingComplete, Completed)
            .with_target(Retrying, RetryNeeded, Target::FailedState)
    }

    pub fn with(self, from: State, event: Event, to: State) -> Self {
        self.with_target(from, event, Target::State(to))
    }

    pub fn with_target(mut self, from: State, event: Event, target: Target) -> Self {
        self.transitions.insert((from, event), target);
        self
    }

    pub fn lookup(&self, from: State, event: Event) -> Option<Target> {
        self.transitions.get(&(from, event)).copied()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}
