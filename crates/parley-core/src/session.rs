use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::capability::{
    ClientEvent, Conferencing, ConferenceClient, ConnectionChange, EventReceiver, MediaStream,
    RenderPlacement, VideoAction, VideoQuality,
};
use crate::config::ClientOptions;
use crate::controls::{AvControlState, ControlFlags};
use crate::credential::CredentialProvider;
use crate::errors::{CapabilityError, ErrorCategory, ParleyError, UserError};
use crate::events::{
    EventEmitter, Participant, ParleyEvent, ParleyEventListener, ParticipantId, ParticipantUpdate,
};
use crate::participants::{RosterChange, RosterManager};
use crate::surfaces::{
    LayoutHost, PARTICIPANTS_CONTAINER, RenderSurface, SELF_VIEW_CONTAINER, SURFACE_HEIGHT,
    SURFACE_WIDTH, SurfaceRegistry, SurfaceTarget,
};

/// Remote tiles render full-surface at 360p.
const REMOTE_PLACEMENT: RenderPlacement = RenderPlacement {
    width: SURFACE_WIDTH,
    height: SURFACE_HEIGHT,
    x: 0,
    y: 0,
    quality: VideoQuality::Q360,
};

/// Password passed to the capability join; rooms are not password protected.
const NO_PASSWORD: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Initializing,
    Joining,
    Joined,
    Leaving,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Guest,
    Host,
}

impl Role {
    /// Wire value of the role in join credentials.
    pub fn as_u8(self) -> u8 {
        match self {
            Role::Guest => 0,
            Role::Host => 1,
        }
    }
}

/// Entry data handed over by the room-entry form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub room: String,
    pub display_name: String,
    pub role: Role,
}

impl JoinRequest {
    pub fn new(room: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            room: room.into(),
            display_name: display_name.into(),
            role,
        }
    }

    /// Both room and display name are non-blank.
    pub fn is_complete(&self) -> bool {
        !self.room.trim().is_empty() && !self.display_name.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub room: String,
    pub display_name: String,
    pub role: Role,
    /// Known once the capability has admitted us to the room.
    pub local_identity: Option<ParticipantId>,
}

/// Snapshot of one render surface for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub participant_id: ParticipantId,
    pub target: SurfaceTarget,
    pub container: Option<String>,
}

impl From<&RenderSurface> for SurfaceInfo {
    fn from(surface: &RenderSurface) -> Self {
        Self {
            participant_id: surface.owner().clone(),
            target: surface.target().clone(),
            container: surface.container().map(str::to_string),
        }
    }
}

/// The client and media stream acquired by one join attempt.
struct SessionContext {
    client: Arc<dyn ConferenceClient>,
    stream: Option<Arc<dyn MediaStream>>,
    /// Set once the capability join succeeded; whoever takes the context
    /// with this set owns the disconnect.
    joined: bool,
}

#[derive(Default)]
struct Lifecycle {
    state: SessionState,
    /// Bumped by every leave and failure. Work started under an older
    /// generation is stale and must not touch the session.
    generation: u64,
    session: Option<SessionInfo>,
    context: Option<SessionContext>,
    event_task: Option<JoinHandle<()>>,
    last_error: Option<UserError>,
}

#[derive(Default)]
struct MediaView {
    roster: RosterManager,
    surfaces: SurfaceRegistry,
    self_view: Option<RenderSurface>,
}

struct Inner {
    conferencing: Arc<dyn Conferencing>,
    credentials: Arc<dyn CredentialProvider>,
    layout: Arc<dyn LayoutHost>,
    options: ClientOptions,
    emitter: EventEmitter,
    lifecycle: Mutex<Lifecycle>,
    view: AsyncMutex<MediaView>,
    controls: Mutex<AvControlState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives one conferencing session at a time: join, leave, local media
/// controls, and the roster/surface view fed by capability events.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        conferencing: Arc<dyn Conferencing>,
        credentials: Arc<dyn CredentialProvider>,
        layout: Arc<dyn LayoutHost>,
    ) -> Self {
        Self::with_options(conferencing, credentials, layout, ClientOptions::default())
    }

    pub fn with_options(
        conferencing: Arc<dyn Conferencing>,
        credentials: Arc<dyn CredentialProvider>,
        layout: Arc<dyn LayoutHost>,
        options: ClientOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                conferencing,
                credentials,
                layout,
                options,
                emitter: EventEmitter::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
                view: AsyncMutex::new(MediaView::default()),
                controls: Mutex::new(AvControlState::new()),
            }),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ParleyEventListener>) {
        self.inner.emitter.add_listener(listener);
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.lifecycle).state
    }

    pub fn session(&self) -> Option<SessionInfo> {
        lock(&self.inner.lifecycle).session.clone()
    }

    pub fn control_flags(&self) -> ControlFlags {
        lock(&self.inner.controls).flags()
    }

    pub fn last_error(&self) -> Option<UserError> {
        lock(&self.inner.lifecycle).last_error.clone()
    }

    pub fn dismiss_error(&self) {
        let dismissed = lock(&self.inner.lifecycle).last_error.take();
        if let Some(error) = dismissed {
            self.inner
                .emitter
                .emit(ParleyEvent::ErrorCleared(error.category));
        }
    }

    /// Remote participants, in the order they were first seen.
    pub async fn participants(&self) -> Vec<Participant> {
        let view = self.inner.view.lock().await;
        view.roster.remote_participants().cloned().collect()
    }

    /// Remote render surfaces currently allocated.
    pub async fn surfaces(&self) -> Vec<SurfaceInfo> {
        let view = self.inner.view.lock().await;
        view.surfaces
            .owners()
            .filter_map(|owner| view.surfaces.surface_for(owner))
            .map(SurfaceInfo::from)
            .collect()
    }

    pub async fn self_view(&self) -> Option<SurfaceInfo> {
        let view = self.inner.view.lock().await;
        view.self_view.as_ref().map(SurfaceInfo::from)
    }

    /// Join `room` as `display_name`. Only valid from `Idle` or `Failed`.
    ///
    /// Returns `Interrupted` if a `leave` superseded this join; the session is
    /// then already back to `Idle`.
    pub async fn join(&self, room: &str, display_name: &str, role: Role) -> Result<(), ParleyError> {
        let request = JoinRequest::new(room, display_name, role);
        let generation = self.inner.begin_join(&request)?;

        match self.inner.run_join(generation, &request).await {
            Ok(()) => Ok(()),
            Err(ParleyError::Interrupted) => {
                tracing::info!(room, "join superseded by leave");
                Err(ParleyError::Interrupted)
            }
            Err(err) => {
                if self.inner.fail(generation, &err).await {
                    Err(err)
                } else {
                    Err(ParleyError::Interrupted)
                }
            }
        }
    }

    /// Join with entry data from navigation. Missing or blank data is
    /// `NoActiveSession` so the caller can send the user back to room entry.
    pub async fn join_request(&self, request: Option<JoinRequest>) -> Result<(), ParleyError> {
        let Some(request) = request.filter(JoinRequest::is_complete) else {
            tracing::warn!("join requested without room entry data");
            return Err(ParleyError::NoActiveSession);
        };
        self.join(&request.room, &request.display_name, request.role)
            .await
    }

    /// Leave the session and release everything it holds. Never fails.
    pub async fn leave(&self) {
        let (generation, context, event_task) = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            match lifecycle.state {
                SessionState::Initializing | SessionState::Joining | SessionState::Joined => {}
                state => {
                    tracing::debug!(?state, "leave ignored");
                    return;
                }
            }
            lifecycle.generation += 1;
            lifecycle.state = SessionState::Leaving;
            lock(&self.inner.controls).reset();
            (
                lifecycle.generation,
                lifecycle.context.take(),
                lifecycle.event_task.take(),
            )
        };
        tracing::info!(generation, "leaving session");
        self.inner
            .emitter
            .emit(ParleyEvent::SessionStateChanged(SessionState::Leaving));

        if let Some(task) = event_task {
            task.abort();
        }
        self.inner.teardown(context).await;

        let idle = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            if lifecycle.generation == generation {
                lifecycle.state = SessionState::Idle;
                lifecycle.session = None;
                true
            } else {
                false
            }
        };
        if idle {
            tracing::info!("session left");
            self.inner
                .emitter
                .emit(ParleyEvent::SessionStateChanged(SessionState::Idle));
        }
    }

    pub async fn toggle_audio(&self) -> Result<ControlFlags, ParleyError> {
        let (stream, (audio_on, epoch)) = self
            .inner
            .joined_controls("toggle_audio", |controls| {
                (!controls.flags().audio_on, controls.epoch())
            })?;

        let result = if audio_on {
            stream.start_audio().await
        } else {
            stream.stop_audio().await
        };
        if let Err(e) = result {
            return Err(self.inner.media_failure(e));
        }

        let (committed, flags) = {
            let mut controls = lock(&self.inner.controls);
            (controls.commit_audio(epoch, audio_on), controls.flags())
        };
        if !committed {
            tracing::debug!("audio toggle finished after session ended");
            return Err(ParleyError::Interrupted);
        }
        tracing::info!(audio_on, "microphone toggled");
        self.inner.clear_error(ErrorCategory::Media);
        self.inner.emitter.emit(ParleyEvent::ControlsChanged(flags));
        Ok(flags)
    }

    /// Start or stop the local camera. A second call while one is in flight,
    /// including one left over from a previous session, is refused with
    /// `Busy` and issues no hardware call.
    pub async fn toggle_video(&self) -> Result<ControlFlags, ParleyError> {
        let (stream, (toggle, busy_flags)) = self
            .inner
            .joined_controls("toggle_video", |controls| {
                (controls.begin_video_toggle(), controls.flags())
            })?;
        let Some(toggle) = toggle else {
            tracing::debug!("toggle_video ignored: camera call in flight");
            return Err(ParleyError::Busy);
        };
        self.inner
            .emitter
            .emit(ParleyEvent::ControlsChanged(busy_flags));

        let result = if toggle.target {
            match self.inner.self_view_target(toggle.epoch()).await {
                Some(target) => stream.start_video(&target, toggle.facing).await,
                None => {
                    let flags = {
                        let mut controls = lock(&self.inner.controls);
                        controls.finish_video_toggle(toggle, false);
                        controls.flags()
                    };
                    tracing::debug!("toggle_video abandoned: session ended while waiting");
                    self.inner.emitter.emit(ParleyEvent::ControlsChanged(flags));
                    return Err(ParleyError::InvalidState {
                        operation: "toggle_video",
                        state: lock(&self.inner.lifecycle).state,
                    });
                }
            }
        } else {
            stream.stop_video().await
        };

        let (committed, flags) = {
            let mut controls = lock(&self.inner.controls);
            (
                controls.finish_video_toggle(toggle, result.is_ok()),
                controls.flags(),
            )
        };
        self.inner.emitter.emit(ParleyEvent::ControlsChanged(flags));

        match result {
            Ok(()) if committed => {
                tracing::info!(video_on = toggle.target, "camera toggled");
                self.inner.clear_error(ErrorCategory::Media);
                Ok(flags)
            }
            Ok(()) => {
                tracing::debug!("video toggle finished after session ended");
                Err(ParleyError::Interrupted)
            }
            Err(e) => Err(self.inner.media_failure(e)),
        }
    }

    pub async fn switch_camera(&self) -> Result<ControlFlags, ParleyError> {
        let (stream, (facing, epoch)) = self
            .inner
            .joined_controls("switch_camera", |controls| {
                (controls.flags().camera_facing.flipped(), controls.epoch())
            })?;

        if let Err(e) = stream.switch_camera(facing).await {
            return Err(self.inner.media_failure(e));
        }

        let (committed, flags) = {
            let mut controls = lock(&self.inner.controls);
            (controls.commit_camera_facing(epoch, facing), controls.flags())
        };
        if !committed {
            tracing::debug!("camera switch finished after session ended");
            return Err(ParleyError::Interrupted);
        }
        tracing::info!(?facing, "camera switched");
        self.inner.clear_error(ErrorCategory::Media);
        self.inner.emitter.emit(ParleyEvent::ControlsChanged(flags));
        Ok(flags)
    }

    /// Feed one capability event as if it came through the event loop.
    #[cfg(test)]
    pub(crate) async fn handle_event(&self, event: ClientEvent) {
        let (state, generation) = {
            let lifecycle = lock(&self.inner.lifecycle);
            (lifecycle.state, lifecycle.generation)
        };
        if state != SessionState::Joined {
            tracing::debug!(?state, "event dropped outside joined session");
            return;
        }
        self.inner.apply_event(generation, event).await;
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        lock(&self.lifecycle).generation == generation
    }

    fn check_current(&self, generation: u64) -> Result<(), ParleyError> {
        if self.is_current(generation) {
            Ok(())
        } else {
            Err(ParleyError::Interrupted)
        }
    }

    fn set_state(&self, generation: u64, state: SessionState) -> bool {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.generation != generation {
                return false;
            }
            lifecycle.state = state;
        }
        tracing::debug!(?state, "session state changed");
        self.emitter.emit(ParleyEvent::SessionStateChanged(state));
        true
    }

    fn begin_join(&self, request: &JoinRequest) -> Result<u64, ParleyError> {
        let generation = {
            let mut lifecycle = lock(&self.lifecycle);
            match lifecycle.state {
                SessionState::Idle | SessionState::Failed => {}
                state => {
                    tracing::warn!(?state, "join rejected");
                    return Err(ParleyError::InvalidState {
                        operation: "join",
                        state,
                    });
                }
            }
            lifecycle.generation += 1;
            lifecycle.state = SessionState::Initializing;
            lifecycle.session = Some(SessionInfo {
                room: request.room.clone(),
                display_name: request.display_name.clone(),
                role: request.role,
                local_identity: None,
            });
            lifecycle.generation
        };
        tracing::info!(room = %request.room, role = ?request.role, generation, "joining session");
        self.emitter
            .emit(ParleyEvent::SessionStateChanged(SessionState::Initializing));
        Ok(generation)
    }

    async fn run_join(self: &Arc<Self>, generation: u64, request: &JoinRequest) -> Result<(), ParleyError> {
        let token = self.credentials.credential(&request.room, request.role).await;
        self.check_current(generation)?;
        let token = token?;

        let client = self.conferencing.create_client();
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.generation != generation {
                return Err(ParleyError::Interrupted);
            }
            lifecycle.context = Some(SessionContext {
                client: client.clone(),
                stream: None,
                joined: false,
            });
        }

        let init = client
            .init(&self.options.locale, &self.options.region, &self.options.init)
            .await;
        self.check_current(generation)?;
        init.map_err(|e| ParleyError::Initialization(e.to_string()))?;

        let events = client.subscribe();
        if !self.set_state(generation, SessionState::Joining) {
            return Err(ParleyError::Interrupted);
        }

        match client
            .join(&request.room, &token, &request.display_name, NO_PASSWORD)
            .await
        {
            Ok(()) => {
                if !self.mark_joined(generation) {
                    self.abandon(client.as_ref()).await;
                    return Err(ParleyError::Interrupted);
                }
            }
            Err(e) => {
                self.check_current(generation)?;
                return Err(ParleyError::Join(e.to_string()));
            }
        }

        let stream = client
            .media_stream()
            .ok_or_else(|| ParleyError::Join("media stream unavailable after join".to_string()))?;
        let local = client
            .current_user()
            .ok_or_else(|| ParleyError::Join("no local identity after join".to_string()))?;
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.generation != generation {
                return Err(ParleyError::Interrupted);
            }
            if let Some(context) = lifecycle.context.as_mut() {
                context.stream = Some(stream.clone());
            }
            if let Some(session) = lifecycle.session.as_mut() {
                session.local_identity = Some(local.id.clone());
            }
        }

        self.hydrate(generation, &local.id, client.all_users(), stream.as_ref())
            .await?;

        let task = tokio::spawn(Self::event_loop(Arc::clone(self), generation, events));
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.generation != generation {
                task.abort();
                return Err(ParleyError::Interrupted);
            }
            lifecycle.event_task = Some(task);
            lifecycle.state = SessionState::Joined;
        }
        tracing::info!(room = %request.room, local = %local.id, "session joined");
        self.clear_error(ErrorCategory::Session);
        self.emitter
            .emit(ParleyEvent::SessionStateChanged(SessionState::Joined));
        Ok(())
    }

    fn mark_joined(&self, generation: u64) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.generation != generation {
            return false;
        }
        match lifecycle.context.as_mut() {
            Some(context) => {
                context.joined = true;
                true
            }
            None => false,
        }
    }

    /// Disconnect a client whose join completed after the session was left.
    async fn abandon(&self, client: &dyn ConferenceClient) {
        tracing::info!("disconnecting superseded join");
        if let Err(e) = client.leave().await {
            tracing::warn!("{}", ParleyError::Teardown(e.to_string()));
        }
    }

    async fn hydrate(
        &self,
        generation: u64,
        local_id: &ParticipantId,
        users: Vec<Participant>,
        stream: &dyn MediaStream,
    ) -> Result<(), ParleyError> {
        let mut outbox = Vec::new();
        {
            let mut view = self.view.lock().await;
            self.check_current(generation)?;
            view.roster.set_local_id(local_id.clone());
            tracing::debug!(count = users.len(), "hydrating roster");
            for user in users {
                self.apply_added(&mut view, user, stream, &mut outbox).await;
            }
        }
        self.emit_all(outbox);
        Ok(())
    }

    async fn event_loop(inner: Arc<Inner>, generation: u64, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            if !inner.apply_event(generation, event).await {
                break;
            }
        }
        tracing::debug!(generation, "session event loop ended");
    }

    /// Returns false once the session `generation` is over.
    async fn apply_event(&self, generation: u64, event: ClientEvent) -> bool {
        let event = match event {
            ClientEvent::ConnectionChanged(change) => {
                return self.apply_connection_change(generation, change).await;
            }
            other => other,
        };

        let Some(stream) = self.joined_stream_for(generation) else {
            return false;
        };
        let stream = stream.as_ref();
        let mut outbox = Vec::new();
        {
            let mut view = self.view.lock().await;
            if !self.is_current(generation) {
                return false;
            }

            match event {
                ClientEvent::UserAdded(participants) => {
                    for participant in participants {
                        self.apply_added(&mut view, participant, stream, &mut outbox)
                            .await;
                    }
                }
                ClientEvent::UserRemoved(ids) => {
                    for id in ids {
                        let change = view.roster.apply_removed(&id);
                        announce(&view, &id, change, &mut outbox);
                        self.reconcile(&mut view, &id, stream, &mut outbox).await;
                    }
                }
                ClientEvent::UserUpdated(updates) => {
                    for update in updates {
                        self.apply_updated(&mut view, update, stream, &mut outbox)
                            .await;
                    }
                }
                ClientEvent::VideoStatusChanged { user_id, action } => {
                    let update =
                        ParticipantUpdate::new(user_id).video(action == VideoAction::Start);
                    self.apply_updated(&mut view, update, stream, &mut outbox)
                        .await;
                }
                ClientEvent::ConnectionChanged(_) => {}
            }
        }
        self.emit_all(outbox);
        true
    }

    async fn apply_connection_change(&self, generation: u64, change: ConnectionChange) -> bool {
        match change {
            ConnectionChange::Closed { reason } => {
                tracing::warn!(%reason, "connection closed by service");
                let err = ParleyError::Join(format!("connection closed: {reason}"));
                self.fail(generation, &err).await;
                false
            }
            other => {
                tracing::info!(change = ?other, "connection state changed");
                self.is_current(generation)
            }
        }
    }

    async fn apply_added(
        &self,
        view: &mut MediaView,
        participant: Participant,
        stream: &dyn MediaStream,
        outbox: &mut Vec<ParleyEvent>,
    ) {
        let id = participant.id.clone();
        let change = view.roster.apply_added(participant);
        announce(view, &id, change, outbox);
        self.reconcile(view, &id, stream, outbox).await;
    }

    async fn apply_updated(
        &self,
        view: &mut MediaView,
        update: ParticipantUpdate,
        stream: &dyn MediaStream,
        outbox: &mut Vec<ParleyEvent>,
    ) {
        let id = update.id.clone();
        let change = view.roster.apply_updated(update);
        announce(view, &id, change, outbox);
        self.reconcile(view, &id, stream, outbox).await;
    }

    /// Bring the surface of `id` in line with the roster: a surface exists
    /// exactly when the participant is remote with video on.
    async fn reconcile(
        &self,
        view: &mut MediaView,
        id: &ParticipantId,
        stream: &dyn MediaStream,
        outbox: &mut Vec<ParleyEvent>,
    ) {
        let wanted = view.roster.wants_surface(id);
        let present = view.surfaces.contains(id);

        if wanted && !present {
            let key = view.surfaces.ensure_surface(id);
            view.surfaces
                .attach(key, PARTICIPANTS_CONTAINER, self.layout.as_ref());
            let Some(target) = view.surfaces.get(key).map(|s| s.target().clone()) else {
                return;
            };
            outbox.push(ParleyEvent::SurfaceAttached {
                participant_id: id.clone(),
                container: PARTICIPANTS_CONTAINER.to_string(),
            });
            match stream.render_video(&target, id, &REMOTE_PLACEMENT).await {
                Ok(()) => tracing::debug!(participant = %id, "rendering remote video"),
                Err(e) => {
                    tracing::warn!(participant = %id, "render failed: {e}");
                    outbox.extend(self.record_error(&ParleyError::Media(e.to_string())));
                }
            }
        } else if !wanted && present {
            view.surfaces
                .release(id, Some(stream), self.layout.as_ref())
                .await;
            outbox.push(ParleyEvent::SurfaceReleased(id.clone()));
        }
    }

    /// Target for the local camera, creating and mounting the self-view on
    /// first use. `None` once the controls epoch has moved past `epoch`,
    /// so a toggle that waited out a leave neither mounts nor starts.
    async fn self_view_target(&self, epoch: u64) -> Option<SurfaceTarget> {
        let mut view = self.view.lock().await;
        if lock(&self.controls).epoch() != epoch {
            return None;
        }
        let owner = view
            .roster
            .local_id()
            .cloned()
            .unwrap_or_else(|| ParticipantId::from("local"));
        let surface = view
            .self_view
            .get_or_insert_with(|| RenderSurface::new(owner, SURFACE_WIDTH, SURFACE_HEIGHT));
        surface.attach(SELF_VIEW_CONTAINER, self.layout.as_ref());
        Some(surface.target().clone())
    }

    /// The joined session's media stream, plus whatever `read` takes from the
    /// controls in the same critical section as the `Joined` check.
    fn joined_controls<T>(
        &self,
        operation: &'static str,
        read: impl FnOnce(&mut AvControlState) -> T,
    ) -> Result<(Arc<dyn MediaStream>, T), ParleyError> {
        let lifecycle = lock(&self.lifecycle);
        let stream = match lifecycle.state {
            SessionState::Joined => lifecycle.context.as_ref().and_then(|c| c.stream.clone()),
            _ => None,
        };
        let Some(stream) = stream else {
            return Err(ParleyError::InvalidState {
                operation,
                state: lifecycle.state,
            });
        };
        let mut controls = lock(&self.controls);
        let value = read(&mut *controls);
        Ok((stream, value))
    }

    fn joined_stream_for(&self, generation: u64) -> Option<Arc<dyn MediaStream>> {
        let lifecycle = lock(&self.lifecycle);
        if lifecycle.generation != generation {
            return None;
        }
        lifecycle.context.as_ref().and_then(|c| c.stream.clone())
    }

    /// Move session `generation` to `Failed` and release what it acquired.
    /// Returns false if the session had already moved on.
    async fn fail(&self, generation: u64, err: &ParleyError) -> bool {
        let context = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.generation != generation {
                return false;
            }
            lifecycle.generation += 1;
            lifecycle.state = SessionState::Failed;
            lifecycle.session = None;
            lock(&self.controls).reset();
            // May be the running task itself; the stale generation stops it.
            lifecycle.event_task.take();
            lifecycle.context.take()
        };
        tracing::error!(generation, "session failed: {err}");
        self.raise_error(err);
        self.emitter
            .emit(ParleyEvent::SessionStateChanged(SessionState::Failed));
        self.teardown(context).await;
        true
    }

    /// Release surfaces, clear the roster and disconnect if connected.
    /// Failures are logged only. Controls were already reset by the caller.
    async fn teardown(&self, context: Option<SessionContext>) {
        let stream = context.as_ref().and_then(|c| c.stream.clone());
        self.release_view(stream.as_deref()).await;

        if let Some(context) = context.filter(|c| c.joined) {
            if let Err(e) = context.client.leave().await {
                tracing::warn!("{}", ParleyError::Teardown(e.to_string()));
            }
        }

        let flags = lock(&self.controls).flags();
        self.emitter.emit(ParleyEvent::ControlsChanged(flags));
    }

    async fn release_view(&self, stream: Option<&dyn MediaStream>) {
        let released = {
            let mut view = self.view.lock().await;
            let released = view.surfaces.release_all(stream, self.layout.as_ref()).await;
            if let Some(mut surface) = view.self_view.take() {
                surface.detach(self.layout.as_ref());
            }
            view.roster.clear();
            released
        };
        tracing::debug!(count = released.len(), "render surfaces released");
        for id in released {
            self.emitter.emit(ParleyEvent::SurfaceReleased(id));
        }
    }

    fn media_failure(&self, e: CapabilityError) -> ParleyError {
        let err = ParleyError::Media(e.to_string());
        tracing::warn!("{err}");
        self.raise_error(&err);
        err
    }

    /// Make `err` the active user-visible error, replacing any previous one.
    fn raise_error(&self, err: &ParleyError) {
        if let Some(event) = self.record_error(err) {
            self.emitter.emit(event);
        }
    }

    /// Store `err` as the active error and return the event announcing it.
    fn record_error(&self, err: &ParleyError) -> Option<ParleyEvent> {
        let user_error = UserError::from_error(err)?;
        lock(&self.lifecycle).last_error = Some(user_error.clone());
        Some(ParleyEvent::ErrorRaised(user_error))
    }

    fn emit_all(&self, events: Vec<ParleyEvent>) {
        for event in events {
            self.emitter.emit(event);
        }
    }

    fn clear_error(&self, category: ErrorCategory) {
        let cleared = {
            let mut lifecycle = lock(&self.lifecycle);
            match &lifecycle.last_error {
                Some(error) if error.category == category => lifecycle.last_error.take(),
                _ => None,
            }
        };
        if cleared.is_some() {
            self.emitter.emit(ParleyEvent::ErrorCleared(category));
        }
    }
}

fn announce(view: &MediaView, id: &ParticipantId, change: RosterChange, outbox: &mut Vec<ParleyEvent>) {
    if view.roster.is_local(id) {
        return;
    }
    let event = match change {
        RosterChange::Inserted => view
            .roster
            .participant(id)
            .map(|p| ParleyEvent::ParticipantJoined(p.clone())),
        RosterChange::Merged => view
            .roster
            .participant(id)
            .map(|p| ParleyEvent::ParticipantUpdated(p.clone())),
        RosterChange::Removed => Some(ParleyEvent::ParticipantLeft(id.clone())),
        RosterChange::Unchanged => None,
    };
    outbox.extend(event);
}
