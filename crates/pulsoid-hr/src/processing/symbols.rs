//! Display catalogs: trend arrows, heart icons and the superscript alphabet
//! used for threshold annotations.

use serde::{Deserialize, Serialize};

/// An (upward, downward) trend symbol pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendSymbolSet {
    pub upward: String,
    pub downward: String,
}

impl Default for TrendSymbolSet {
    fn default() -> Self {
        Self::new("⤴️", "⤵️")
    }
}

impl TrendSymbolSet {
    pub fn new(upward: impl Into<String>, downward: impl Into<String>) -> Self {
        Self {
            upward: upward.into(),
            downward: downward.into(),
        }
    }

    /// Both symbols as one label, e.g. `"↑ - ↓"`. Used as the selection key.
    pub fn combined(&self) -> String {
        format!("{} - {}", self.upward, self.downward)
    }
}

/// The fixed catalog of trend symbol sets.
pub fn trend_symbol_catalog() -> Vec<TrendSymbolSet> {
    vec![
        TrendSymbolSet::new("⤴️", "⤵️"),
        TrendSymbolSet::new("⬆", "⬇"),
        TrendSymbolSet::new("↑", "↓"),
        TrendSymbolSet::new("↗", "↘"),
        TrendSymbolSet::new("🔺", "🔻"),
    ]
}

/// Re-select `selected` from `catalog` by its combined label, falling back to
/// the first catalog entry. Returns `selected` unchanged for an empty catalog.
pub fn resolve_trend_symbols(
    selected: &TrendSymbolSet,
    catalog: &[TrendSymbolSet],
) -> TrendSymbolSet {
    let key = selected.combined();
    catalog
        .iter()
        .find(|set| set.combined() == key)
        .or_else(|| catalog.first())
        .cloned()
        .unwrap_or_else(|| selected.clone())
}

/// Icons cycled through when icon cycling is on.
pub fn default_heart_icons() -> Vec<String> {
    ["❤️", "💖", "💗", "💙", "💚", "💛", "💜"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Render `text` with Unicode superscript characters where one exists.
/// Letters are lowercased first; characters without a superscript form are
/// kept as-is.
pub fn to_superscript(text: &str) -> String {
    text.chars()
        .map(|c| superscript_char(c.to_ascii_lowercase()).unwrap_or(c))
        .collect()
}

fn superscript_char(c: char) -> Option<char> {
    Some(match c {
        '0' => '⁰',
        '1' => '¹',
        '2' => '²',
        '3' => '³',
        '4' => '⁴',
        '5' => '⁵',
        '6' => '⁶',
        '7' => '⁷',
        '8' => '⁸',
        '9' => '⁹',
        'a' => 'ᵃ',
        'b' => 'ᵇ',
        'c' => 'ᶜ',
        'd' => 'ᵈ',
        'e' => 'ᵉ',
        'f' => 'ᶠ',
        'g' => 'ᵍ',
        'h' => 'ʰ',
        'i' => 'ⁱ',
        'j' => 'ʲ',
        'k' => 'ᵏ',
        'l' => 'ˡ',
        'm' => 'ᵐ',
        'n' => 'ⁿ',
        'o' => 'ᵒ',
        'p' => 'ᵖ',
        'r' => 'ʳ',
        's' => 'ˢ',
        't' => 'ᵗ',
        'u' => 'ᵘ',
        'v' => 'ᵛ',
        'w' => 'ʷ',
        'x' => 'ˣ',
        'y' => 'ʸ',
        'z' => 'ᶻ',
        '+' => '⁺',
        '-' => '⁻',
        '=' => '⁼',
        '(' => '⁽',
        ')' => '⁾',
        _ => return None,
    })
}
