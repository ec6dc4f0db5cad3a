//! Per-slot label sets for filtered search.
//!
//! A filtered index attaches a small set of integer labels to each slot.
//! A query carrying a filter label only admits slots whose label set
//! contains that label (or the universal label, which matches every
//! filter). Each label keeps its own entry point so filtered traversals
//! start inside the matching subgraph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Slot;

/// Integer label attached to points and queries.
pub type Label = u32;

/// Label assignments for every slot plus per-label entry points.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelStore {
    /// Labels per slot, sorted ascending. Slots without labels hold an
    /// empty vec.
    slot_labels: Vec<Vec<Label>>,
    /// Label that matches every filter, if configured.
    universal_label: Option<Label>,
    /// Entry slot per label, set during build.
    entry_points: HashMap<Label, Slot>,
}

impl LabelStore {
    pub fn new(num_slots: usize, universal_label: Option<Label>) -> Self {
        Self {
            slot_labels: vec![Vec::new(); num_slots],
            universal_label,
            entry_points: HashMap::new(),
        }
    }

    pub fn universal_label(&self) -> Option<Label> {
        self.universal_label
    }

    /// Assign `labels` to `slot`, replacing any previous assignment.
    pub fn set_labels(&mut self, slot: Slot, mut labels: Vec<Label>) {
        labels.sort_unstable();
        labels.dedup();
        self.slot_labels[slot as usize] = labels;
    }

    pub fn labels_of(&self, slot: Slot) -> &[Label] {
        &self.slot_labels[slot as usize]
    }

    /// Whether `slot` is admissible for a query filtered on `filter`.
    #[inline]
    pub fn matches(&self, slot: Slot, filter: Label) -> bool {
        let labels = &self.slot_labels[slot as usize];
        if let Some(u) = self.universal_label {
            if labels.binary_search(&u).is_ok() {
                return true;
            }
        }
        labels.binary_search(&filter).is_ok()
    }

    pub fn clear_slot(&mut self, slot: Slot) {
        self.slot_labels[slot as usize].clear();
    }

    /// Record the traversal entry point for `label`.
    pub fn set_entry_point(&mut self, label: Label, slot: Slot) {
        self.entry_points.insert(label, slot);
    }

    pub fn entry_point(&self, label: Label) -> Option<Slot> {
        self.entry_points.get(&label).copied()
    }

    /// Distinct labels present across all slots.
    pub fn distinct_labels(&self) -> Vec<Label> {
        let mut all: Vec<Label> = self
            .slot_labels
            .iter()
            .flat_map(|ls| ls.iter().copied())
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    pub fn expand(&mut self, new_num_slots: usize) {
        if new_num_slots > self.slot_labels.len() {
            self.slot_labels.resize(new_num_slots, Vec::new());
        }
    }

    pub fn shrink(&mut self, new_num_slots: usize) {
        self.slot_labels.truncate(new_num_slots);
        self.entry_points.retain(|_, &mut s| (s as usize) < new_num_slots);
    }
}
