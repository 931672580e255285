//! Directive parsing for generated narrative.
//!
//! The narrator embeds game effects in its prose as bracketed tags:
//! `[HP: -3]`, `[ITEM: Dagger]`, `[REMOVE: Torch]`. Tags are matched
//! case-insensitively, anywhere in the text, any number of times.
//!
//! Parsing is pure: it returns the effects in the order they appear and a
//! display document with every recognised tag replaced by an annotation.
//! Applying the effects is the party state's job (see [`crate::party`]).

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref TAG: Regex = Regex::new(r"(?i)\[\s*(HP|ITEM|REMOVE)\s*:\s*([^\]\n]*)\]")
        .expect("directive tag pattern");
    static ref BOLD: Regex = Regex::new(r"\*\*(.*?)\*\*").expect("bold pattern");
    static ref BULLET: Regex = Regex::new(r"(?m)^[*-][ \t]+").expect("bullet pattern");
    static ref CHOICE: Regex =
        Regex::new(r"(?m)^[ \t]*\d{1,2}\.[ \t]+(.+?)[ \t]*$").expect("choice pattern");
}

/// A game effect extracted from narrative text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    /// Signed HP change; negative is damage.
    HealDamage(i32),
    /// Grant an item. The name is trimmed but keeps its original case.
    AddItem(String),
    /// Remove an item, matched case-insensitively.
    RemoveItem(String),
}

/// A piece of display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Narrative prose, still carrying markdown-style markers.
    Text(String),
    /// Annotation for an HP change.
    Hp(i32),
    /// Annotation for a granted item.
    Obtained(String),
    /// Annotation for a removed item.
    Lost(String),
}

/// Result of parsing one narrative message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedNarrative {
    /// Effects in left-to-right order of appearance.
    pub effects: Vec<Directive>,
    /// Display document with tags replaced by annotations.
    pub segments: Vec<Segment>,
    /// Numbered options offered by the narrator, numbering stripped.
    pub choices: Vec<String>,
}

impl ParsedNarrative {
    /// Display text for the web clients (HTML).
    pub fn display_text(&self) -> String {
        self.to_html()
    }

    /// Render as HTML. Prose is escaped; `**bold**` becomes `<strong>`,
    /// leading `*`/`-` bullets become `•`, and newlines become `<br>`.
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => html.push_str(&escape_html(text)),
                Segment::Hp(delta) => {
                    let color = if *delta < 0 { "red" } else { "green" };
                    html.push_str(&format!(
                        "<span style=\"color:{color}; font-weight:bold\">({} HP)</span>",
                        signed(*delta)
                    ));
                }
                Segment::Obtained(name) => {
                    html.push_str(&format!("<br><em>(obtained: {})</em>", escape_html(name)));
                }
                Segment::Lost(name) => {
                    html.push_str(&format!("<br><em>(lost: {})</em>", escape_html(name)));
                }
            }
        }

        let html = BOLD.replace_all(&html, "<strong>$1</strong>");
        let html = BULLET.replace_all(&html, "• ");
        html.replace('\n', "<br>")
    }

    /// Render for a terminal: markers stripped, annotations in parentheses.
    pub fn to_plain(&self) -> String {
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => text.push_str(t),
                Segment::Hp(delta) => text.push_str(&format!("({} HP)", signed(*delta))),
                Segment::Obtained(name) => text.push_str(&format!("\n(obtained: {name})")),
                Segment::Lost(name) => text.push_str(&format!("\n(lost: {name})")),
            }
        }

        let text = BOLD.replace_all(&text, "$1");
        BULLET.replace_all(&text, "• ").into_owned()
    }

    /// Whether the narrative carried any recognised directive.
    pub fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }
}

/// Extract directives and build the display document.
///
/// Malformed tags (a non-integer HP value, an empty item name) are not
/// effects and stay in the text unchanged.
pub fn parse(narrative: &str) -> ParsedNarrative {
    let mut effects = Vec::new();
    let mut segments = Vec::new();
    let mut cursor = 0;

    for caps in TAG.captures_iter(narrative) {
        let (Some(whole), Some(kind), Some(value)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };

        let Some((directive, annotation)) = interpret(kind.as_str(), value.as_str()) else {
            continue;
        };

        push_text(&mut segments, &narrative[cursor..whole.start()]);
        segments.push(annotation);
        effects.push(directive);
        cursor = whole.end();
    }
    push_text(&mut segments, &narrative[cursor..]);

    ParsedNarrative {
        effects,
        segments,
        choices: extract_choices(narrative),
    }
}

fn interpret(kind: &str, value: &str) -> Option<(Directive, Segment)> {
    let value = value.trim();
    match kind.to_ascii_uppercase().as_str() {
        "HP" => {
            let delta = parse_signed(value)?;
            Some((Directive::HealDamage(delta), Segment::Hp(delta)))
        }
        "ITEM" if !value.is_empty() => Some((
            Directive::AddItem(value.to_string()),
            Segment::Obtained(value.to_string()),
        )),
        "REMOVE" if !value.is_empty() => Some((
            Directive::RemoveItem(value.to_string()),
            Segment::Lost(value.to_string()),
        )),
        _ => None,
    }
}

fn parse_signed(value: &str) -> Option<i32> {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(last)) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(Segment::Text(text.to_string()));
    }
}

fn extract_choices(narrative: &str) -> Vec<String> {
    CHOICE
        .captures_iter(narrative)
        .filter_map(|caps| caps.get(1))
        .map(|m| BOLD.replace_all(m.as_str(), "$1").trim().to_string())
        .filter(|choice| !choice.is_empty())
        .collect()
}

fn signed(delta: i32) -> String {
    if delta > 0 {
        format!("+{delta}")
    } else {
        delta.to_string()
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Split a room history line of the form `name: action` into speaker and text.
pub fn split_speaker(content: &str) -> Option<(&str, &str)> {
    let (speaker, text) = content.split_once(": ")?;
    let speaker = speaker.trim();
    if speaker.is_empty() || speaker.contains('\n') {
        return None;
    }
    Some((speaker, text))
}
