//! Render surfaces: one fixed-size drawable per participant with active video.
//!
//! Remote surfaces live in a [`SurfaceRegistry`], a slot arena indexed by
//! participant id. The local self-view uses the same [`RenderSurface`]
//! primitive but is owned directly by the session controller.

use std::collections::HashMap;

use uuid::Uuid;

use crate::capability::MediaStream;
use crate::events::ParticipantId;

pub const SURFACE_WIDTH: u32 = 640;
pub const SURFACE_HEIGHT: u32 = 360;

/// Layout container for remote participant tiles.
pub const PARTICIPANTS_CONTAINER: &str = "participants";
/// Layout container for the local camera preview.
pub const SELF_VIEW_CONTAINER: &str = "self-view";

/// Opaque drawable handle handed to the capability for painting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SurfaceTarget {
    id: Uuid,
    width: u32,
    height: u32,
}

impl SurfaceTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            width,
            height,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// The visible layout tree the surfaces get mounted into.
pub trait LayoutHost: Send + Sync {
    fn mount(&self, target: &SurfaceTarget, container: &str);
    fn unmount(&self, target: &SurfaceTarget, container: &str);
}

/// Layout host for headless use; mounts go nowhere.
#[derive(Debug, Default)]
pub struct DetachedLayout;

impl LayoutHost for DetachedLayout {
    fn mount(&self, _target: &SurfaceTarget, _container: &str) {}
    fn unmount(&self, _target: &SurfaceTarget, _container: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSurface {
    owner: ParticipantId,
    target: SurfaceTarget,
    container: Option<String>,
}

impl RenderSurface {
    pub fn new(owner: ParticipantId, width: u32, height: u32) -> Self {
        Self {
            owner,
            target: SurfaceTarget::new(width, height),
            container: None,
        }
    }

    pub fn owner(&self) -> &ParticipantId {
        &self.owner
    }

    pub fn target(&self) -> &SurfaceTarget {
        &self.target
    }

    pub fn is_attached(&self) -> bool {
        self.container.is_some()
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// Mount into `container`. Returns false without touching the layout if
    /// the surface is already mounted.
    pub fn attach(&mut self, container: &str, layout: &dyn LayoutHost) -> bool {
        if self.container.is_some() {
            return false;
        }
        layout.mount(&self.target, container);
        self.container = Some(container.to_string());
        true
    }

    pub fn detach(&mut self, layout: &dyn LayoutHost) -> bool {
        match self.container.take() {
            Some(container) => {
                layout.unmount(&self.target, &container);
                true
            }
            None => false,
        }
    }
}

/// Stable handle to a slot in the registry. Stale after the slot is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceKey {
    slot: usize,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    surface: Option<RenderSurface>,
}

/// Keyed arena of remote render surfaces.
#[derive(Debug)]
pub struct SurfaceRegistry {
    slots: Vec<Slot>,
    free: Vec<usize>,
    index: HashMap<ParticipantId, SurfaceKey>,
    width: u32,
    height: u32,
}

impl Default for SurfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::with_dimensions(SURFACE_WIDTH, SURFACE_HEIGHT)
    }

    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            width,
            height,
        }
    }

    /// Existing surface for `owner`, or a freshly allocated one.
    pub fn ensure_surface(&mut self, owner: &ParticipantId) -> SurfaceKey {
        if let Some(key) = self.index.get(owner) {
            return *key;
        }

        let surface = RenderSurface::new(owner.clone(), self.width, self.height);
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let key = match self.slots.get_mut(slot) {
            Some(entry) => {
                entry.surface = Some(surface);
                SurfaceKey {
                    slot,
                    generation: entry.generation,
                }
            }
            // Unreachable: `slot` was either just pushed or came off the free list.
            None => SurfaceKey { slot, generation: 0 },
        };
        tracing::debug!(participant = %owner, slot, "render surface allocated");
        self.index.insert(owner.clone(), key);
        key
    }

    pub fn get(&self, key: SurfaceKey) -> Option<&RenderSurface> {
        self.slots
            .get(key.slot)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.surface.as_ref())
    }

    fn get_mut(&mut self, key: SurfaceKey) -> Option<&mut RenderSurface> {
        self.slots
            .get_mut(key.slot)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.surface.as_mut())
    }

    pub fn key_for(&self, owner: &ParticipantId) -> Option<SurfaceKey> {
        self.index.get(owner).copied()
    }

    pub fn surface_for(&self, owner: &ParticipantId) -> Option<&RenderSurface> {
        self.key_for(owner).and_then(|key| self.get(key))
    }

    pub fn contains(&self, owner: &ParticipantId) -> bool {
        self.index.contains_key(owner)
    }

    /// Mount the surface exactly once. Returns true only when the layout was
    /// actually mutated.
    pub fn attach(&mut self, key: SurfaceKey, container: &str, layout: &dyn LayoutHost) -> bool {
        match self.get_mut(key) {
            Some(surface) => surface.attach(container, layout),
            None => false,
        }
    }

    /// Stop rendering, detach and free the surface owned by `owner`.
    ///
    /// Unknown owners are a no-op. A failing stop-render is logged and the
    /// surface is released anyway.
    pub async fn release(
        &mut self,
        owner: &ParticipantId,
        renderer: Option<&dyn MediaStream>,
        layout: &dyn LayoutHost,
    ) -> bool {
        let Some(key) = self.index.remove(owner) else {
            return false;
        };
        let Some(mut surface) = self.slots.get_mut(key.slot).and_then(|s| s.surface.take()) else {
            return false;
        };

        if let Some(renderer) = renderer {
            if let Err(e) = renderer.stop_render_video(surface.target(), owner).await {
                tracing::warn!(participant = %owner, "stop render failed: {e}");
            }
        }
        surface.detach(layout);

        if let Some(slot) = self.slots.get_mut(key.slot) {
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.free.push(key.slot);
        tracing::debug!(participant = %owner, slot = key.slot, "render surface released");
        true
    }

    /// Release every surface. Returns the owners that were released.
    pub async fn release_all(
        &mut self,
        renderer: Option<&dyn MediaStream>,
        layout: &dyn LayoutHost,
    ) -> Vec<ParticipantId> {
        let owners: Vec<ParticipantId> = self.index.keys().cloned().collect();
        for owner in &owners {
            self.release(owner, renderer, layout).await;
        }
        owners
    }

    pub fn owners(&self) -> impl Iterator<Item = &ParticipantId> {
        self.index.keys()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
