//! Party state and the effect reducer.
//!
//! All mutation goes through a few methods that keep the invariants:
//! - `0 <= hp <= hp_max`
//! - no two inventory entries are equal under case folding
//! - `actions_this_floor` resets exactly when the floor increments
//! - history is append-only

use crate::directive::Directive;
use roomapi::{HistoryEntry, Stats};
use serde::{Deserialize, Serialize};

/// Resolved actions needed to reach the next floor.
pub const FLOOR_THRESHOLD: u32 = 15;

/// Case-insensitive item set that remembers insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    items: Vec<String>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list, dropping blanks and case-insensitive duplicates.
    pub fn from_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inventory = Self::new();
        for item in items {
            inventory.insert(item.as_ref());
        }
        inventory
    }

    /// Insert unless a case-insensitive match exists. Returns whether the
    /// item was added.
    pub fn insert(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.contains(name) {
            return false;
        }
        self.items.push(name.to_string());
        true
    }

    /// Remove the first case-insensitive match. Returns the removed entry.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let key = fold(name);
        let index = self.items.iter().position(|item| fold(item) == key)?;
        Some(self.items.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = fold(name);
        self.items.iter().any(|item| fold(item) == key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.items.clone()
    }
}

fn fold(name: &str) -> String {
    name.trim().to_lowercase()
}

/// What applying one directive did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectOutcome {
    /// HP moved from `before` to `after` (after clamping).
    HpChanged { before: i32, after: i32 },
    ItemAdded(String),
    ItemRemoved(String),
    /// The directive had nothing to act on.
    NoOp { reason: String },
}

/// The client-held record of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyState {
    floor: u32,
    hp: i32,
    hp_max: i32,
    inventory: Inventory,
    actions_this_floor: u32,
    history: Vec<HistoryEntry>,
}

impl PartyState {
    /// Fresh state on floor 1 with full HP. `hp_max` is raised to at least 1.
    pub fn new(hp_max: i32, inventory: Inventory) -> Self {
        let hp_max = hp_max.max(1);
        Self {
            floor: 1,
            hp: hp_max,
            hp_max,
            inventory,
            actions_this_floor: 0,
            history: Vec::new(),
        }
    }

    /// Start below full HP; clamped into range.
    pub fn with_hp(mut self, hp: i32) -> Self {
        self.hp = hp.clamp(0, self.hp_max);
        self
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    pub fn hp(&self) -> i32 {
        self.hp
    }

    pub fn hp_max(&self) -> i32 {
        self.hp_max
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn actions_this_floor(&self) -> u32 {
        self.actions_this_floor
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn is_defeated(&self) -> bool {
        self.hp == 0
    }

    /// Apply effects in order, returning what each one did.
    pub fn apply_effects(&mut self, effects: &[Directive]) -> Vec<EffectOutcome> {
        effects.iter().map(|effect| self.apply_one(effect)).collect()
    }

    fn apply_one(&mut self, effect: &Directive) -> EffectOutcome {
        match effect {
            Directive::HealDamage(delta) => {
                let before = self.hp;
                self.hp = before.saturating_add(*delta).clamp(0, self.hp_max);
                EffectOutcome::HpChanged {
                    before,
                    after: self.hp,
                }
            }
            Directive::AddItem(name) => {
                if self.inventory.insert(name) {
                    EffectOutcome::ItemAdded(name.trim().to_string())
                } else {
                    EffectOutcome::NoOp {
                        reason: format!("'{}' already carried", name.trim()),
                    }
                }
            }
            Directive::RemoveItem(name) => match self.inventory.remove(name) {
                Some(removed) => EffectOutcome::ItemRemoved(removed),
                None => EffectOutcome::NoOp {
                    reason: format!("'{}' not carried", name.trim()),
                },
            },
        }
    }

    /// Count one resolved player action. Returns true when this action
    /// reached `threshold` and moved the party to the next floor.
    pub fn record_resolved_action(&mut self, threshold: u32) -> bool {
        self.actions_this_floor += 1;
        if self.actions_this_floor >= threshold.max(1) {
            self.advance_floor();
            true
        } else {
            false
        }
    }

    fn advance_floor(&mut self) {
        self.floor += 1;
        self.actions_this_floor = 0;
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Adopt the server's history after the room restarted its conversation.
    pub fn replace_history(&mut self, history: Vec<HistoryEntry>) {
        self.history = history;
    }

    /// Forget progress on the current floor (campaign restart).
    pub fn reset_floor_progress(&mut self) {
        self.actions_this_floor = 0;
    }

    /// Overwrite the server-authoritative scalars. Values are clamped and
    /// deduplicated so the invariants survive a bad snapshot.
    pub fn reconcile(&mut self, hp: i32, hp_max: Option<i32>, floor: u32, inventory: &[String]) {
        if let Some(hp_max) = hp_max {
            self.hp_max = hp_max.max(1);
        }
        self.hp = hp.clamp(0, self.hp_max);

        let floor = floor.max(1);
        if floor != self.floor {
            self.floor = floor;
            self.actions_this_floor = 0;
        }

        self.inventory = Inventory::from_items(inventory);
    }

    /// Stats snapshot sent with a turn resolution.
    pub fn stats(&self) -> Stats {
        Stats {
            hp: self.hp,
            floor: self.floor,
            inventory: self.inventory.to_vec(),
        }
    }
}

/// Pure reducer form of [`PartyState::apply_effects`].
pub fn apply(mut state: PartyState, effects: &[Directive]) -> PartyState {
    state.apply_effects(effects);
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(hp: i32, hp_max: i32) -> PartyState {
        PartyState::new(hp_max, Inventory::new()).with_hp(hp)
    }

    #[test]
    fn test_damage_clamps_to_zero() {
        for delta in [-8, -9, -50, i32::MIN] {
            let s = apply(state(7, 10), &[Directive::HealDamage(delta)]);
            assert_eq!(s.hp(), 0, "delta {delta}");
            assert!(s.is_defeated());
        }
    }

    #[test]
    fn test_heal_clamps_to_max() {
        for delta in [4, 5, 100, i32::MAX] {
            let s = apply(state(7, 10), &[Directive::HealDamage(delta)]);
            assert_eq!(s.hp(), 10, "delta {delta}");
        }
    }

    #[test]
    fn test_hp_effects_are_cumulative() {
        let s = apply(
            state(10, 10),
            &[
                Directive::HealDamage(-3),
                Directive::HealDamage(-4),
                Directive::HealDamage(2),
            ],
        );
        assert_eq!(s.hp(), 5);
    }

    #[test]
    fn test_clamping_happens_per_effect() {
        // Overheal is lost before the damage lands.
        let s = apply(
            state(9, 10),
            &[Directive::HealDamage(5), Directive::HealDamage(-4)],
        );
        assert_eq!(s.hp(), 6);
    }

    #[test]
    fn test_add_item_is_case_insensitive() {
        let mut s = state(10, 10);
        s.apply_effects(&[Directive::AddItem("Sword".to_string())]);
        let outcomes = s.apply_effects(&[Directive::AddItem("sword".to_string())]);

        assert_eq!(s.inventory().len(), 1);
        assert_eq!(s.inventory().iter().next(), Some("Sword"));
        assert!(matches!(outcomes[0], EffectOutcome::NoOp { .. }));
    }

    #[test]
    fn test_remove_absent_item_is_noop() {
        let mut s = state(10, 10);
        s.apply_effects(&[Directive::AddItem("Torch".to_string())]);
        let outcomes = s.apply_effects(&[Directive::RemoveItem("rope".to_string())]);

        assert_eq!(s.inventory().len(), 1);
        assert!(matches!(outcomes[0], EffectOutcome::NoOp { .. }));
    }

    #[test]
    fn test_remove_matches_case_insensitively() {
        let mut s = PartyState::new(10, Inventory::from_items(["Old Map", "Torch"]));
        let outcomes = s.apply_effects(&[Directive::RemoveItem("TORCH".to_string())]);

        assert_eq!(outcomes, vec![EffectOutcome::ItemRemoved("Torch".to_string())]);
        assert_eq!(s.inventory().to_vec(), vec!["Old Map"]);
    }

    #[test]
    fn test_inventory_keeps_insertion_order() {
        let inv = Inventory::from_items(["b", "a", "B", " ", "c"]);
        assert_eq!(inv.to_vec(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_floor_advances_after_threshold() {
        let mut s = state(10, 10);
        for _ in 0..FLOOR_THRESHOLD - 1 {
            assert!(!s.record_resolved_action(FLOOR_THRESHOLD));
        }
        assert_eq!(s.floor(), 1);
        assert_eq!(s.actions_this_floor(), FLOOR_THRESHOLD - 1);

        assert!(s.record_resolved_action(FLOOR_THRESHOLD));
        assert_eq!(s.floor(), 2);
        assert_eq!(s.actions_this_floor(), 0);

        for _ in 0..FLOOR_THRESHOLD - 1 {
            assert!(!s.record_resolved_action(FLOOR_THRESHOLD));
        }
        assert_eq!(s.floor(), 2);
        assert!(s.record_resolved_action(FLOOR_THRESHOLD));
        assert_eq!(s.floor(), 3);
    }

    #[test]
    fn test_reconcile_overwrites_and_clamps() {
        let mut s = state(10, 10);
        s.record_resolved_action(FLOOR_THRESHOLD);

        s.reconcile(
            25,
            None,
            3,
            &["Torch".to_string(), "torch".to_string(), "Map".to_string()],
        );
        assert_eq!(s.hp(), 10);
        assert_eq!(s.floor(), 3);
        assert_eq!(s.actions_this_floor(), 0);
        assert_eq!(s.inventory().to_vec(), vec!["Torch", "Map"]);

        s.reconcile(-4, Some(20), 3, &[]);
        assert_eq!(s.hp(), 0);
        assert_eq!(s.hp_max(), 20);
    }

    #[test]
    fn test_stats_snapshot() {
        let s = PartyState::new(20, Inventory::from_items(["old map", "torch"])).with_hp(12);
        let stats = s.stats();
        assert_eq!(stats.hp, 12);
        assert_eq!(stats.floor, 1);
        assert_eq!(stats.inventory, vec!["old map", "torch"]);
    }
}
