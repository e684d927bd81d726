/// Which physical camera the local video uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

impl CameraFacing {
    pub fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

/// Local media flags as observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlFlags {
    pub audio_on: bool,
    pub video_on: bool,
    pub camera_facing: CameraFacing,
    /// True exactly while a camera start/stop call is in flight.
    pub busy: bool,
}

/// A camera start/stop that has claimed the busy guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoToggle {
    /// The `video_on` value requested from the hardware.
    pub target: bool,
    pub facing: CameraFacing,
    epoch: u64,
}

impl VideoToggle {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Holder for the local participant's media state.
///
/// Flags only ever carry confirmed hardware state: callers read the current
/// value, perform the hardware call, and commit the new value on success.
/// Every commit carries the epoch it was started under so a result that
/// lands after [`AvControlState::reset`] is dropped. The busy guard is the
/// exception: it belongs to the outstanding hardware call and survives a
/// reset until that call finishes.
#[derive(Debug, Default)]
pub struct AvControlState {
    flags: ControlFlags,
    epoch: u64,
}

impl AvControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> ControlFlags {
        self.flags
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Claim the busy guard for a camera toggle. `None` while one is outstanding.
    pub fn begin_video_toggle(&mut self) -> Option<VideoToggle> {
        if self.flags.busy {
            return None;
        }
        self.flags.busy = true;
        Some(VideoToggle {
            target: !self.flags.video_on,
            facing: self.flags.camera_facing,
            epoch: self.epoch,
        })
    }

    /// Release the busy guard, committing `toggle.target` if the call succeeded.
    /// Returns false if the toggle outlived a reset; the guard is released
    /// but nothing is committed.
    pub fn finish_video_toggle(&mut self, toggle: VideoToggle, succeeded: bool) -> bool {
        self.flags.busy = false;
        if toggle.epoch != self.epoch {
            return false;
        }
        if succeeded {
            self.flags.video_on = toggle.target;
        }
        true
    }

    pub fn commit_audio(&mut self, epoch: u64, audio_on: bool) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.flags.audio_on = audio_on;
        true
    }

    pub fn commit_camera_facing(&mut self, epoch: u64, facing: CameraFacing) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.flags.camera_facing = facing;
        true
    }

    /// Back to defaults; results of calls started before this are discarded.
    /// `busy` stays set while a camera call is still outstanding.
    pub fn reset(&mut self) {
        self.flags = ControlFlags {
            busy: self.flags.busy,
            ..ControlFlags::default()
        };
        self.epoch += 1;
    }
}
