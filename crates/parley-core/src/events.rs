use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::controls::ControlFlags;
use crate::errors::{ErrorCategory, UserError};
use crate::session::SessionState;

/// Events emitted by the core to UI listeners.
#[derive(Debug, Clone)]
pub enum ParleyEvent {
    SessionStateChanged(SessionState),
    ParticipantJoined(Participant),
    ParticipantLeft(ParticipantId),
    ParticipantUpdated(Participant),
    SurfaceAttached {
        participant_id: ParticipantId,
        container: String,
    },
    SurfaceReleased(ParticipantId),
    ControlsChanged(ControlFlags),
    ErrorRaised(UserError),
    ErrorCleared(ErrorCategory),
}

/// Opaque participant identifier assigned by the conferencing capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub video_on: bool,
    pub audio_on: bool,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            video_on: false,
            audio_on: false,
        }
    }

    pub fn with_video(mut self, video_on: bool) -> Self {
        self.video_on = video_on;
        self
    }

    pub fn with_audio(mut self, audio_on: bool) -> Self {
        self.audio_on = audio_on;
        self
    }

    /// Merge the fields present in `update`. Returns true if anything changed.
    pub fn merge(&mut self, update: &ParticipantUpdate) -> bool {
        let before = self.clone();
        if let Some(name) = &update.display_name {
            self.display_name.clone_from(name);
        }
        if let Some(video_on) = update.video_on {
            self.video_on = video_on;
        }
        if let Some(audio_on) = update.audio_on {
            self.audio_on = audio_on;
        }
        *self != before
    }
}

/// Partial participant state as pushed by `user-updated` style events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantUpdate {
    pub id: ParticipantId,
    pub display_name: Option<String>,
    pub video_on: Option<bool>,
    pub audio_on: Option<bool>,
}

impl ParticipantUpdate {
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            video_on: None,
            audio_on: None,
        }
    }

    pub fn video(mut self, video_on: bool) -> Self {
        self.video_on = Some(video_on);
        self
    }

    pub fn audio(mut self, audio_on: bool) -> Self {
        self.audio_on = Some(audio_on);
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Materialize a participant for an update whose id was never added.
    pub fn into_participant(self) -> Participant {
        let mut participant = Participant::new(self.id.clone(), String::new());
        participant.merge(&self);
        participant
    }
}

impl From<&Participant> for ParticipantUpdate {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id.clone(),
            display_name: Some(p.display_name.clone()),
            video_on: Some(p.video_on),
            audio_on: Some(p.audio_on),
        }
    }
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait ParleyEventListener: Send + Sync {
    fn on_event(&self, event: ParleyEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn ParleyEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ParleyEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: ParleyEvent) {
        // Snapshot so a listener may register another listener while handling.
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener.on_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl ParleyEventListener for CountingListener {
        fn on_event(&self, _event: ParleyEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn emitter_dispatches_to_multiple_listeners() {
        let emitter = EventEmitter::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        emitter.add_listener(Arc::new(CountingListener { count: count1.clone() }));
        emitter.add_listener(Arc::new(CountingListener { count: count2.clone() }));

        emitter.emit(ParleyEvent::SessionStateChanged(SessionState::Joined));

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn merge_reports_changes_only() {
        let mut p = Participant::new("u1", "Alice");
        assert!(p.merge(&ParticipantUpdate::new("u1").video(true)));
        assert!(!p.merge(&ParticipantUpdate::new("u1").video(true)));
        assert!(p.video_on);
        assert_eq!(p.display_name, "Alice");
    }

    #[test]
    fn update_for_unknown_id_defaults_missing_fields() {
        let p = ParticipantUpdate::new("u9").audio(true).into_participant();
        assert_eq!(p.id.as_str(), "u9");
        assert!(p.audio_on);
        assert!(!p.video_on);
        assert!(p.display_name.is_empty());
    }
}
