use crate::events::{Participant, ParticipantId, ParticipantUpdate};

/// Outcome of applying one roster delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    Inserted,
    Merged,
    Removed,
    Unchanged,
}

/// Authoritative list of participants in the current session.
///
/// Deltas are applied in the order they are handed in and each one is
/// idempotent, so duplicate delivery from the capability is harmless.
/// The local user may be present in the list (some capabilities report it)
/// but never shows up in [`RosterManager::remote_participants`].
#[derive(Debug, Clone, Default)]
pub struct RosterManager {
    participants: Vec<Participant>,
    local_id: Option<ParticipantId>,
}

impl RosterManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_id(&mut self, id: ParticipantId) {
        self.local_id = Some(id);
    }

    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.local_id.as_ref()
    }

    pub fn is_local(&self, id: &ParticipantId) -> bool {
        self.local_id.as_ref() == Some(id)
    }

    pub fn apply_added(&mut self, participant: Participant) -> RosterChange {
        match self.participant_mut(&participant.id) {
            Some(existing) => {
                if existing.merge(&ParticipantUpdate::from(&participant)) {
                    RosterChange::Merged
                } else {
                    RosterChange::Unchanged
                }
            }
            None => {
                self.participants.push(participant);
                RosterChange::Inserted
            }
        }
    }

    pub fn apply_removed(&mut self, id: &ParticipantId) -> RosterChange {
        let before = self.participants.len();
        self.participants.retain(|p| &p.id != id);
        if self.participants.len() == before {
            RosterChange::Unchanged
        } else {
            RosterChange::Removed
        }
    }

    /// Merge into an existing entry; an unknown id is treated as an add.
    pub fn apply_updated(&mut self, update: ParticipantUpdate) -> RosterChange {
        match self.participant_mut(&update.id) {
            Some(existing) => {
                if existing.merge(&update) {
                    RosterChange::Merged
                } else {
                    RosterChange::Unchanged
                }
            }
            None => {
                tracing::debug!(participant = %update.id, "update before add, inserting");
                self.participants.push(update.into_participant());
                RosterChange::Inserted
            }
        }
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn remote_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| !self.is_local(&p.id))
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    fn participant_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| &p.id == id)
    }

    /// Whether `id` should currently own a remote render surface.
    pub fn wants_surface(&self, id: &ParticipantId) -> bool {
        !self.is_local(id) && self.participant(id).is_some_and(|p| p.video_on)
    }

    pub fn remote_count(&self) -> usize {
        self.remote_participants().count()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.local_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Participant {
        Participant::new("u1", "Alice")
    }

    #[test]
    fn add_and_retrieve_participant() {
        let mut roster = RosterManager::new();
        assert_eq!(roster.apply_added(alice()), RosterChange::Inserted);
        assert_eq!(roster.remote_count(), 1);
        assert_eq!(roster.participant(&"u1".into()).unwrap().display_name, "Alice");
    }

    #[test]
    fn duplicate_add_merges() {
        let mut roster = RosterManager::new();
        roster.apply_added(alice());
        assert_eq!(roster.apply_added(alice()), RosterChange::Unchanged);
        assert_eq!(roster.apply_added(alice().with_video(true)), RosterChange::Merged);
        assert_eq!(roster.participants().len(), 1);
        assert!(roster.participant(&"u1".into()).unwrap().video_on);
    }

    #[test]
    fn each_delta_is_idempotent() {
        let deltas: Vec<Box<dyn Fn(&mut RosterManager)>> = vec![
            Box::new(|r| {
                r.apply_added(Participant::new("u2", "Bob").with_audio(true));
            }),
            Box::new(|r| {
                r.apply_removed(&"u1".into());
            }),
            Box::new(|r| {
                r.apply_updated(ParticipantUpdate::new("u1").video(true).display_name("Al"));
            }),
        ];

        for delta in deltas {
            let mut once = RosterManager::new();
            once.apply_added(alice());
            delta(&mut once);

            let mut twice = RosterManager::new();
            twice.apply_added(alice());
            delta(&mut twice);
            delta(&mut twice);

            assert_eq!(once.participants(), twice.participants());
        }
    }

    #[test]
    fn removing_unknown_id_is_noop() {
        let mut roster = RosterManager::new();
        roster.apply_added(alice());
        assert_eq!(roster.apply_removed(&"ghost".into()), RosterChange::Unchanged);
        assert_eq!(roster.participants().len(), 1);
    }

    #[test]
    fn update_before_add_inserts() {
        let mut roster = RosterManager::new();
        let change = roster.apply_updated(ParticipantUpdate::new("u3").video(true));
        assert_eq!(change, RosterChange::Inserted);
        assert!(roster.wants_surface(&"u3".into()));

        // The late add carries the authoritative name.
        roster.apply_added(Participant::new("u3", "Carol").with_video(true));
        assert_eq!(roster.participant(&"u3".into()).unwrap().display_name, "Carol");
        assert_eq!(roster.participants().len(), 1);
    }

    #[test]
    fn local_identity_is_not_remote() {
        let mut roster = RosterManager::new();
        roster.set_local_id("me".into());
        roster.apply_added(Participant::new("me", "Me").with_video(true));
        roster.apply_added(alice().with_video(true));

        let remote: Vec<_> = roster.remote_participants().map(|p| p.id.as_str()).collect();
        assert_eq!(remote, vec!["u1"]);
        assert!(!roster.wants_surface(&"me".into()));
        assert!(roster.wants_surface(&"u1".into()));
    }

    #[test]
    fn deltas_apply_in_delivery_order() {
        let mut roster = RosterManager::new();
        roster.apply_updated(ParticipantUpdate::new("u1").video(true));
        roster.apply_updated(ParticipantUpdate::new("u1").video(false));
        assert!(!roster.participant(&"u1".into()).unwrap().video_on);
    }

    #[test]
    fn clear_resets_everything() {
        let mut roster = RosterManager::new();
        roster.set_local_id("me".into());
        roster.apply_added(alice());
        roster.clear();
        assert!(roster.participants().is_empty());
        assert!(roster.local_id().is_none());
    }
}
