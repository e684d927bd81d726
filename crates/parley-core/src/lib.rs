//! Parley core: video meeting session logic.
//!
//! Platform-free. The conferencing service, the camera/microphone and the
//! layout tree are reached through the traits in [`capability`] and
//! [`surfaces`]; UI shells observe the core through [`events`].

pub mod capability;
pub mod config;
pub mod controls;
pub mod credential;
pub mod errors;
pub mod events;
pub mod logging;
pub mod participants;
pub mod session;
pub mod settings;
pub mod surfaces;

#[cfg(test)]
mod testing;

pub use capability::{ClientEvent, ConferenceClient, Conferencing, MediaStream};
pub use config::{ClientOptions, ConfigError, CredentialConfig};
pub use controls::{CameraFacing, ControlFlags};
pub use credential::{CredentialProvider, JwtCredentialProvider};
pub use errors::{CredentialError, ErrorCategory, ParleyError, UserError};
pub use events::{Participant, ParleyEvent, ParleyEventListener, ParticipantId};
pub use logging::init_logging;
pub use session::{JoinRequest, Role, SessionController, SessionState};
pub use settings::{Settings, SettingsStore};
pub use surfaces::LayoutHost;
