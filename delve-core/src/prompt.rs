//! System context and fixed prompts sent to the narrator.

use crate::party::PartyState;

/// Hidden action that opens a campaign.
pub const OPENING_PROMPT: &str = "START OF THE GAME.\n\
Describe ONLY the opening scene: the party wakes in a damp stone hall lit by torches, \
facing three unlocked doors:\n\
1. Yellow door (a magical hum)\n\
2. Red door (radiating heat)\n\
3. Green door (smells of the sea)\n\
Stop the description there and ask which door they choose. \
Do NOT narrate what happens after they go through.";

/// Hidden action sent after the party reaches a new floor.
pub const NEW_FLOOR_PROMPT: &str =
    "The party climbed the stairs. Describe the new floor and its dangers.";

const RULES: &str = "\
## Rules (follow strictly)
1. Use [HP: -X] for damage and [HP: +X] for healing. Example: \"The blow cuts you! [HP: -2]\"
2. Use [ITEM: Name] when giving an item. Example: \"In the chest there is a dagger. [ITEM: Dagger]\"
3. Use [REMOVE: Name] when an item is used up or lost.
4. Never repeat recent descriptions.
5. Keep answers short (at most 3 paragraphs).
6. Always end by asking what the players do, offering numbered options.
7. Never act for the players. Describe the outcome and STOP.
8. Player actions carry a [Dice: ...] marker; let the outcome follow it.
";

/// Build the system context for a generation request.
pub fn system_context(state: &PartyState, multiplayer: bool) -> String {
    let mut prompt = String::new();

    if multiplayer {
        prompt.push_str("You are the game master of a multiplayer dark fantasy dungeon crawl.\n");
        prompt.push_str("Each turn lists the actions of every party member; resolve them together.\n\n");
    } else {
        prompt.push_str("You are the game master of a dark medieval fantasy dungeon crawl.\n\n");
    }

    prompt.push_str("## Party\n");
    prompt.push_str(&format!("**HP:** {}/{}\n", state.hp(), state.hp_max()));
    if state.inventory().is_empty() {
        prompt.push_str("**Inventory:** (empty)\n");
    } else {
        let items: Vec<&str> = state.inventory().iter().collect();
        prompt.push_str(&format!("**Inventory:** {}\n", items.join(", ")));
    }
    prompt.push_str(&format!("**Dungeon floor:** {}\n\n", state.floor()));

    prompt.push_str(RULES);
    prompt
}
