//! d20 rolls attached to player actions.
//!
//! Every action a player types and submits visibly gets one d20 roll. The
//! roll falls into a [`Tier`] and the action text is decorated with a marker
//! so the narrator can take the outcome into account. Hidden, system-made
//! actions (campaign start, new-floor prompts) are never annotated.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualitative outcome of a d20 roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    CriticalSuccess,
    CriticalFailure,
    Success,
    Normal,
    Failure,
}

impl Tier {
    /// Bucket a natural d20 value. Naturals take priority over thresholds.
    pub fn from_roll(roll: u32) -> Tier {
        match roll {
            20 => Tier::CriticalSuccess,
            1 => Tier::CriticalFailure,
            r if r >= 15 => Tier::Success,
            r if r >= 10 => Tier::Normal,
            _ => Tier::Failure,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::CriticalSuccess => "critical success",
            Tier::CriticalFailure => "critical failure",
            Tier::Success => "success",
            Tier::Normal => "normal",
            Tier::Failure => "failure",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One rolled d20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRoll {
    pub roll: u32,
    pub tier: Tier,
}

impl ActionRoll {
    pub fn new(roll: u32) -> Self {
        Self {
            roll,
            tier: Tier::from_roll(roll),
        }
    }

    /// Roll a d20 with the thread RNG.
    pub fn roll() -> Self {
        Self::roll_with_rng(&mut rand::thread_rng())
    }

    /// Roll a d20 with a specific RNG (useful for testing).
    pub fn roll_with_rng<R: Rng>(rng: &mut R) -> Self {
        Self::new(rng.gen_range(1..=20u32))
    }

    /// The marker appended to an action, e.g. `[Dice: success (17)]`.
    pub fn marker(&self, show_roll: bool) -> String {
        if show_roll {
            format!("[Dice: {} ({})]", self.tier, self.roll)
        } else {
            format!("[Dice: {}]", self.tier)
        }
    }

    /// The action text followed by this roll's marker.
    pub fn decorate(&self, action: &str, show_roll: bool) -> String {
        format!("{} {}", action.trim_end(), self.marker(show_roll))
    }
}

/// An action text with its roll attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotated {
    pub text: String,
    pub roll: ActionRoll,
}

impl Annotated {
    pub fn tier(&self) -> Tier {
        self.roll.tier
    }
}

/// Roll for an action and decorate it.
pub fn annotate(action: &str, show_roll: bool) -> Annotated {
    annotate_with_rng(action, show_roll, &mut rand::thread_rng())
}

/// [`annotate`] with a specific RNG.
pub fn annotate_with_rng<R: Rng>(action: &str, show_roll: bool, rng: &mut R) -> Annotated {
    let roll = ActionRoll::roll_with_rng(rng);
    Annotated {
        text: roll.decorate(action, show_roll),
        roll,
    }
}
