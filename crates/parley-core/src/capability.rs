//! Seam to the underlying conferencing SDK.
//!
//! The core never speaks a wire protocol itself; it drives these traits and
//! consumes [`ClientEvent`]s from the channel returned by
//! [`ConferenceClient::subscribe`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::controls::CameraFacing;
use crate::errors::CapabilityError;
use crate::events::{Participant, ParticipantId, ParticipantUpdate};
use crate::surfaces::SurfaceTarget;

pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;
pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

/// Options forwarded to [`ConferenceClient::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    pub patch_js_media: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            patch_js_media: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: ParticipantId,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionChange {
    Connected,
    Reconnecting,
    Closed { reason: String },
}

/// Server-pushed notifications, in transport delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    UserAdded(Vec<Participant>),
    UserRemoved(Vec<ParticipantId>),
    UserUpdated(Vec<ParticipantUpdate>),
    VideoStatusChanged {
        user_id: ParticipantId,
        action: VideoAction,
    },
    ConnectionChanged(ConnectionChange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoQuality {
    Q90,
    Q180,
    Q360,
    Q720,
}

/// Where and how a remote stream is painted into its surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPlacement {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
    pub quality: VideoQuality,
}

/// Factory for conferencing clients (`createClient`).
pub trait Conferencing: Send + Sync {
    fn create_client(&self) -> Arc<dyn ConferenceClient>;
}

#[async_trait]
pub trait ConferenceClient: Send + Sync {
    async fn init(
        &self,
        locale: &str,
        region: &str,
        options: &InitOptions,
    ) -> Result<(), CapabilityError>;

    async fn join(
        &self,
        room: &str,
        token: &str,
        display_name: &str,
        password: &str,
    ) -> Result<(), CapabilityError>;

    async fn leave(&self) -> Result<(), CapabilityError>;

    /// Media controls; only available once joined.
    fn media_stream(&self) -> Option<Arc<dyn MediaStream>>;

    fn current_user(&self) -> Option<UserInfo>;

    fn all_users(&self) -> Vec<Participant>;

    /// Register for roster and video-status notifications.
    fn subscribe(&self) -> EventReceiver;
}

/// Local hardware and remote rendering controls (`getMediaStream`).
#[async_trait]
pub trait MediaStream: Send + Sync {
    async fn start_audio(&self) -> Result<(), CapabilityError>;

    async fn stop_audio(&self) -> Result<(), CapabilityError>;

    async fn start_video(
        &self,
        target: &SurfaceTarget,
        facing: CameraFacing,
    ) -> Result<(), CapabilityError>;

    async fn stop_video(&self) -> Result<(), CapabilityError>;

    async fn render_video(
        &self,
        target: &SurfaceTarget,
        user_id: &ParticipantId,
        placement: &RenderPlacement,
    ) -> Result<(), CapabilityError>;

    async fn stop_render_video(
        &self,
        target: &SurfaceTarget,
        user_id: &ParticipantId,
    ) -> Result<(), CapabilityError>;

    async fn switch_camera(&self, facing: CameraFacing) -> Result<(), CapabilityError>;
}
