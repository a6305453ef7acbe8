use serde::{Deserialize, Serialize};

/// Tunables for both review passes. Field defaults match the values the
/// engine was originally shipped with, so a config deserialized from a
/// partial JSON document behaves like a stock install.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SrsConfig {
    /// Ease assigned to never-reviewed items, in centesimal units (250 = 2.50x).
    #[serde(default = "default_base_ease")]
    pub base_ease: u32,
    /// Interval multiplier applied on a Hard response.
    #[serde(default = "default_lapses_interval_change")]
    pub lapses_interval_change: f32,
    /// Extra interval multiplier applied on an Easy response.
    #[serde(default = "default_easy_bonus")]
    pub easy_bonus: f32,
    /// Hard cap on any interval, in days.
    #[serde(default = "default_maximum_interval")]
    pub maximum_interval: u32,
    /// Confidence weight (0..1) given to link-derived ease for new notes.
    #[serde(default = "default_max_link_factor")]
    pub max_link_factor: f32,
    #[serde(default = "default_single_line_card_separator")]
    pub single_line_card_separator: String,
    #[serde(default = "default_multi_line_card_separator")]
    pub multi_line_card_separator: String,
    #[serde(default)]
    pub disable_cloze_cards: bool,
    #[serde(default = "default_true")]
    pub show_context_in_cards: bool,
    /// Derive deck paths from folder structure instead of tags.
    #[serde(default)]
    pub convert_folders_to_decks: bool,
    /// Notes carrying one of these tags (or a nested tag under one) enter
    /// the note review pass.
    #[serde(default = "default_tags_to_review")]
    pub tags_to_review: Vec<String>,
    /// Notes carrying one of these tags enter the flashcard pass.
    #[serde(default = "default_flashcard_tags")]
    pub flashcard_tags: Vec<String>,
}

fn default_base_ease() -> u32 {
    250
}

fn default_lapses_interval_change() -> f32 {
    0.5
}

fn default_easy_bonus() -> f32 {
    1.3
}

fn default_maximum_interval() -> u32 {
    36_525
}

fn default_max_link_factor() -> f32 {
    1.0
}

fn default_single_line_card_separator() -> String {
    "::".to_string()
}

fn default_multi_line_card_separator() -> String {
    "?".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tags_to_review() -> Vec<String> {
    vec!["#review".to_string()]
}

fn default_flashcard_tags() -> Vec<String> {
    vec!["#flashcards".to_string()]
}

impl Default for SrsConfig {
    fn default() -> Self {
        Self {
            base_ease: default_base_ease(),
            lapses_interval_change: default_lapses_interval_change(),
            easy_bonus: default_easy_bonus(),
            maximum_interval: default_maximum_interval(),
            max_link_factor: default_max_link_factor(),
            single_line_card_separator: default_single_line_card_separator(),
            multi_line_card_separator: default_multi_line_card_separator(),
            disable_cloze_cards: false,
            show_context_in_cards: true,
            convert_folders_to_decks: false,
            tags_to_review: default_tags_to_review(),
            flashcard_tags: default_flashcard_tags(),
        }
    }
}

/// True when `tag` is `wanted` itself or nested under it (`#review/math`).
pub fn tag_matches(tag: &str, wanted: &str) -> bool {
    tag == wanted || tag.starts_with(&format!("{}/", wanted))
}
