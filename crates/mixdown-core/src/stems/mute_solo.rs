//! Mute and solo state
//!
//! Solo is a layer on top of the mute set: while a stem is soloed only that
//! stem is audible, and the mute set underneath is left alone so un-soloing
//! brings it back. Toggling a mute while soloed first turns the solo into its
//! equivalent mute set (everything but the soloed stem muted) and leaves solo
//! mode, so the mute toggle applies to what the user currently hears.

use crate::types::StemId;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuteSolo {
    muted: HashSet<StemId>,
    soloed: Option<StemId>,
}

impl MuteSolo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the mute flag of `id`. `all_ids` is the current stem set.
    pub fn toggle_mute(&mut self, id: StemId, all_ids: impl IntoIterator<Item = StemId>) {
        if let Some(soloed) = self.soloed.take() {
            self.muted = all_ids.into_iter().filter(|&other| other != soloed).collect();
        }
        if !self.muted.remove(&id) {
            self.muted.insert(id);
        }
    }

    /// Solo `id`, or leave solo mode if `id` is the soloed stem
    pub fn toggle_solo(&mut self, id: StemId) {
        if self.soloed == Some(id) {
            self.soloed = None;
        } else {
            self.soloed = Some(id);
        }
    }

    pub fn unmute_all(&mut self) {
        self.muted.clear();
        self.soloed = None;
    }

    /// Mute flag of `id`, regardless of solo
    pub fn is_muted(&self, id: StemId) -> bool {
        self.muted.contains(&id)
    }

    pub fn is_soloed(&self, id: StemId) -> bool {
        self.soloed == Some(id)
    }

    /// Whether `id` should be heard
    pub fn is_audible(&self, id: StemId) -> bool {
        match self.soloed {
            Some(soloed) => soloed == id,
            None => !self.muted.contains(&id),
        }
    }

    /// Forget stems that no longer exist
    pub fn retain(&mut self, exists: impl Fn(StemId) -> bool) {
        self.muted.retain(|&id| exists(id));
        if self.soloed.is_some_and(|id| !exists(id)) {
            self.soloed = None;
        }
    }
}
