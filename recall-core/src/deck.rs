use crate::Card;
use serde::{Deserialize, Serialize};

/// One node of the deck tree. The tree is keyed by path segments ("/" is the
/// unnamed root-level deck) and rebuilt fresh on every flashcard pass.
/// Cards keep their insertion (source-text) order within a node.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Deck {
    pub name: String,
    pub due_cards: Vec<Card>,
    pub new_cards: Vec<Card>,
    /// Cards that belong to this deck but are not shown this pass
    /// (scheduled in the future, or buried).
    pub not_due_count: u32,
    pub subdecks: Vec<Deck>,
}

impl Deck {
    pub fn root() -> Self {
        Self {
            name: "root".to_string(),
            ..Self::default()
        }
    }

    /// Walk `path` from this node, creating missing segments.
    pub fn create_deck(&mut self, path: &[String]) {
        self.descend(path);
    }

    /// Insert at the leaf of `path`, filing by the card's scheduling state.
    /// Ancestor aggregates are derived on read, so the due-count invariant
    /// holds as soon as the insert returns.
    pub fn insert_card(&mut self, path: &[String], card: Card) {
        let leaf = self.descend(path);
        if card.is_due() {
            leaf.due_cards.push(card);
        } else {
            leaf.new_cards.push(card);
        }
    }

    /// Count a card toward the leaf deck without storing it.
    pub fn count_only(&mut self, path: &[String]) {
        self.descend(path).not_due_count += 1;
    }

    /// Own due cards plus all descendants'.
    pub fn due_count(&self) -> u32 {
        self.due_cards.len() as u32 + self.subdecks.iter().map(Deck::due_count).sum::<u32>()
    }

    pub fn new_count(&self) -> u32 {
        self.new_cards.len() as u32 + self.subdecks.iter().map(Deck::new_count).sum::<u32>()
    }

    pub fn not_due_count_total(&self) -> u32 {
        self.not_due_count
            + self
                .subdecks
                .iter()
                .map(Deck::not_due_count_total)
                .sum::<u32>()
    }

    pub fn total_count(&self) -> u32 {
        self.due_count() + self.new_count() + self.not_due_count_total()
    }

    /// Order children by name, case-insensitively, at every level. Card
    /// order within nodes is untouched.
    pub fn sort_subdecks(&mut self) {
        self.subdecks
            .sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        for sub in &mut self.subdecks {
            sub.sort_subdecks();
        }
    }

    fn descend(&mut self, path: &[String]) -> &mut Deck {
        let mut node = self;
        for segment in path {
            let idx = match node.subdecks.iter().position(|d| &d.name == segment) {
                Some(idx) => idx,
                None => {
                    node.subdecks.push(Deck {
                        name: segment.clone(),
                        ..Deck::default()
                    });
                    node.subdecks.len() - 1
                }
            };
            node = &mut node.subdecks[idx];
        }
        node
    }
}
