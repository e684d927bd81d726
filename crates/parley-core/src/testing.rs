//! Scriptable in-process conferencing capability for tests.
//!
//! Every capability call is recorded as `op` or `op:detail`. Calls can be
//! made to fail, or held in flight until the test releases them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::capability::{
    ClientEvent, Conferencing, ConferenceClient, EventReceiver, EventSender, InitOptions,
    MediaStream, RenderPlacement, UserInfo,
};
use crate::controls::CameraFacing;
use crate::credential::CredentialProvider;
use crate::errors::{CapabilityError, CredentialError};
use crate::events::{Participant, ParleyEvent, ParleyEventListener, ParticipantId};
use crate::session::Role;
use crate::surfaces::{LayoutHost, SurfaceTarget};

/// A call parked inside the fake until [`Hold::release`].
#[derive(Default)]
pub struct Hold {
    entered: Notify,
    released: Notify,
}

impl Hold {
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[derive(Default)]
struct FakeState {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    holds: Mutex<HashMap<&'static str, Arc<Hold>>>,
    users: Mutex<Vec<Participant>>,
    local: Mutex<Option<UserInfo>>,
    joined: Mutex<bool>,
    events: Mutex<Option<EventSender>>,
}

impl FakeState {
    async fn call(&self, op: &'static str, detail: Option<&str>) -> Result<(), CapabilityError> {
        let entry = match detail {
            Some(detail) => format!("{op}:{detail}"),
            None => op.to_string(),
        };
        self.calls.lock().unwrap().push(entry);

        let hold = self.holds.lock().unwrap().remove(op);
        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.released.notified().await;
        }

        if self.failing.lock().unwrap().contains(op) {
            return Err(CapabilityError::new(op, "injected failure"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeConferencing {
    state: Arc<FakeState>,
}

impl FakeConferencing {
    /// A room where only the local user ("me") is present.
    pub fn new() -> Self {
        let state = FakeState::default();
        *state.local.lock().unwrap() = Some(UserInfo {
            id: ParticipantId::from("me"),
            display_name: "Me".to_string(),
        });
        *state.users.lock().unwrap() = vec![Participant::new("me", "Me")];
        Self {
            state: Arc::new(state),
        }
    }

    pub fn fail(&self, op: &'static str) {
        self.state.failing.lock().unwrap().insert(op);
    }

    pub fn succeed(&self, op: &'static str) {
        self.state.failing.lock().unwrap().remove(op);
    }

    /// Park the next call to `op` until the returned hold is released.
    pub fn hold(&self, op: &'static str) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        self.state.holds.lock().unwrap().insert(op, hold.clone());
        hold
    }

    pub fn without_local_user(self) -> Self {
        *self.state.local.lock().unwrap() = None;
        self
    }

    pub fn set_users(&self, users: Vec<Participant>) {
        *self.state.users.lock().unwrap() = users;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls equal to `entry` (`op` or `op:detail`).
    pub fn count(&self, entry: &str) -> usize {
        self.state
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == entry)
            .count()
    }

    /// Push an event through the subscription channel.
    pub fn send(&self, event: ClientEvent) -> bool {
        match self.state.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn stream(&self) -> Arc<dyn MediaStream> {
        Arc::new(FakeStream {
            state: self.state.clone(),
        })
    }
}

impl Conferencing for FakeConferencing {
    fn create_client(&self) -> Arc<dyn ConferenceClient> {
        Arc::new(FakeClient {
            state: self.state.clone(),
        })
    }
}

struct FakeClient {
    state: Arc<FakeState>,
}

#[async_trait]
impl ConferenceClient for FakeClient {
    async fn init(
        &self,
        _locale: &str,
        _region: &str,
        _options: &InitOptions,
    ) -> Result<(), CapabilityError> {
        self.state.call("init", None).await
    }

    async fn join(
        &self,
        room: &str,
        _token: &str,
        _display_name: &str,
        _password: &str,
    ) -> Result<(), CapabilityError> {
        self.state.call("join", Some(room)).await?;
        *self.state.joined.lock().unwrap() = true;
        Ok(())
    }

    async fn leave(&self) -> Result<(), CapabilityError> {
        *self.state.joined.lock().unwrap() = false;
        self.state.events.lock().unwrap().take();
        self.state.call("leave", None).await
    }

    fn media_stream(&self) -> Option<Arc<dyn MediaStream>> {
        if *self.state.joined.lock().unwrap() {
            Some(Arc::new(FakeStream {
                state: self.state.clone(),
            }))
        } else {
            None
        }
    }

    fn current_user(&self) -> Option<UserInfo> {
        if *self.state.joined.lock().unwrap() {
            self.state.local.lock().unwrap().clone()
        } else {
            None
        }
    }

    fn all_users(&self) -> Vec<Participant> {
        self.state.users.lock().unwrap().clone()
    }

    fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.events.lock().unwrap() = Some(tx);
        rx
    }
}

struct FakeStream {
    state: Arc<FakeState>,
}

#[async_trait]
impl MediaStream for FakeStream {
    async fn start_audio(&self) -> Result<(), CapabilityError> {
        self.state.call("start_audio", None).await
    }

    async fn stop_audio(&self) -> Result<(), CapabilityError> {
        self.state.call("stop_audio", None).await
    }

    async fn start_video(
        &self,
        _target: &SurfaceTarget,
        _facing: CameraFacing,
    ) -> Result<(), CapabilityError> {
        self.state.call("start_video", None).await
    }

    async fn stop_video(&self) -> Result<(), CapabilityError> {
        self.state.call("stop_video", None).await
    }

    async fn render_video(
        &self,
        _target: &SurfaceTarget,
        user_id: &ParticipantId,
        _placement: &RenderPlacement,
    ) -> Result<(), CapabilityError> {
        self.state.call("render_video", Some(user_id.as_str())).await
    }

    async fn stop_render_video(
        &self,
        _target: &SurfaceTarget,
        user_id: &ParticipantId,
    ) -> Result<(), CapabilityError> {
        self.state.call("stop_render_video", Some(user_id.as_str())).await
    }

    async fn switch_camera(&self, facing: CameraFacing) -> Result<(), CapabilityError> {
        let detail = format!("{facing:?}");
        self.state.call("switch_camera", Some(detail.as_str())).await
    }
}

/// Credentials that never touch key material.
pub struct StaticCredentials {
    fail: bool,
}

impl StaticCredentials {
    pub fn ok() -> Self {
        Self { fail: false }
    }

    pub fn missing_secret() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self, room: &str, role: Role) -> Result<String, CredentialError> {
        if self.fail {
            return Err(CredentialError::MissingSecret("app secret"));
        }
        Ok(format!("token-{room}-{}", role.as_u8()))
    }
}

#[derive(Default)]
pub struct RecordingLayout {
    mounts: Mutex<Vec<(Uuid, String)>>,
    unmounts: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingLayout {
    pub fn mounts(&self) -> Vec<(Uuid, String)> {
        self.mounts.lock().unwrap().clone()
    }

    pub fn unmounts(&self) -> Vec<(Uuid, String)> {
        self.unmounts.lock().unwrap().clone()
    }
}

impl LayoutHost for RecordingLayout {
    fn mount(&self, target: &SurfaceTarget, container: &str) {
        self.mounts
            .lock()
            .unwrap()
            .push((target.id(), container.to_string()));
    }

    fn unmount(&self, target: &SurfaceTarget, container: &str) {
        self.unmounts
            .lock()
            .unwrap()
            .push((target.id(), container.to_string()));
    }
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<ParleyEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<ParleyEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ParleyEventListener for EventLog {
    fn on_event(&self, event: ParleyEvent) {
        self.events.lock().unwrap().push(event);
    }
}
