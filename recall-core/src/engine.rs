use crate::{
    days_until, due_datetime, schedule, tag_matches, Card, CardExtractor, CardId, CardState,
    CoreError, Deck, DueDateHistogram, LinkGraph, LinkStat, NoteMeta, ReviewResponse, SchedNote,
    SrsConfig, MS_PER_DAY,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Host boundary for the flashcard pass: the only place the engine touches
/// note text. Reads and writes are awaited before a pass completes.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn read_note(&self, path: &str) -> Result<String, CoreError>;
    async fn write_note(&self, path: &str, text: &str) -> Result<(), CoreError>;
}

/// At most one instance of a pass type runs at a time; a duplicate trigger
/// while the token is alive is dropped, never queued.
struct PassLock {
    running: AtomicBool,
}

struct PassToken<'a>(&'a PassLock);

impl PassLock {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    fn try_begin(&self) -> Option<PassToken<'_>> {
        if self.running.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(PassToken(self))
        }
    }
}

impl Drop for PassToken<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Published result of a note scheduling pass. Swapped in atomically at
/// pass end; readers never see a partially rebuilt queue.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ReviewQueue {
    /// Never-reviewed notes, ranked by importance for triage.
    pub new_notes: Vec<String>,
    /// Scheduled notes ranked by due date, then importance.
    pub scheduled_notes: Vec<SchedNote>,
    pub due_notes_count: usize,
    pub due_dates: DueDateHistogram,
    pub page_ranks: BTreeMap<String, f64>,
    pub ease_by_path: BTreeMap<String, u32>,
    pub incoming_links: BTreeMap<String, Vec<LinkStat>>,
}

impl ReviewQueue {
    /// The note to open next: the most overdue important note, else the
    /// most important new note.
    pub fn next_note(&self) -> Option<&str> {
        if self.due_notes_count > 0 {
            return self.scheduled_notes.first().map(|n| n.path.as_str());
        }
        self.new_notes.first().map(String::as_str)
    }
}

/// Published result of a flashcard pass.
#[derive(Clone, Debug, Serialize)]
pub struct FlashcardIndex {
    pub deck_tree: Deck,
    pub due_dates: DueDateHistogram,
    /// Arena of cloze sibling groups; cards reference entries here by
    /// `sibling_group` index.
    pub sibling_groups: Vec<Vec<CardId>>,
}

impl Default for FlashcardIndex {
    fn default() -> Self {
        Self {
            deck_tree: Deck::root(),
            due_dates: DueDateHistogram::new(),
            sibling_groups: Vec::new(),
        }
    }
}

/// Scheduling outcome of a single note review, for the host to persist.
#[derive(Clone, Debug, Serialize)]
pub struct NoteSchedule {
    pub due: DateTime<Utc>,
    /// `due` formatted the way annotations store it (`%Y-%m-%d`).
    pub due_string: String,
    pub interval: f32,
    pub ease: u32,
}

pub struct SrsEngine {
    config: SrsConfig,
    extractor: CardExtractor,
    notes_lock: PassLock,
    flashcards_lock: PassLock,
    /// Live histograms the fuzz step balances against between passes.
    note_histogram: Mutex<DueDateHistogram>,
    card_histogram: Mutex<DueDateHistogram>,
    review_queue: RwLock<Arc<ReviewQueue>>,
    flashcard_index: RwLock<Arc<FlashcardIndex>>,
}

impl SrsEngine {
    pub fn new(config: SrsConfig) -> Result<Self, CoreError> {
        let extractor = CardExtractor::new(&config)?;
        Ok(Self {
            config,
            extractor,
            notes_lock: PassLock::new(),
            flashcards_lock: PassLock::new(),
            note_histogram: Mutex::new(DueDateHistogram::new()),
            card_histogram: Mutex::new(DueDateHistogram::new()),
            review_queue: RwLock::new(Arc::new(ReviewQueue::default())),
            flashcard_index: RwLock::new(Arc::new(FlashcardIndex::default())),
        })
    }

    pub fn config(&self) -> &SrsConfig {
        &self.config
    }

    /// Latest published note queue.
    pub fn review_queue(&self) -> Arc<ReviewQueue> {
        self.review_queue.read().clone()
    }

    /// Latest published deck tree.
    pub fn flashcard_index(&self) -> Arc<FlashcardIndex> {
        self.flashcard_index.read().clone()
    }

    /// The note scheduling pass. Rebuilds the link graph and importance
    /// scores over the whole corpus, partitions reviewable notes into new
    /// and scheduled, and publishes the ranked queue. Returns `None` when a
    /// note pass is already running (the duplicate trigger is dropped).
    pub fn scan_notes(&self, notes: &[NoteMeta], now: DateTime<Utc>) -> Option<Arc<ReviewQueue>> {
        let _token = match self.notes_lock.try_begin() {
            Some(token) => token,
            None => {
                log::debug!("note pass already running, ignoring trigger");
                return None;
            }
        };

        let paths: HashSet<&str> = notes.iter().map(|n| n.path.as_str()).collect();

        let mut graph = LinkGraph::new();
        let mut incoming_links: BTreeMap<String, Vec<LinkStat>> = notes
            .iter()
            .map(|n| (n.path.clone(), Vec::new()))
            .collect();
        for note in notes {
            for (target, count) in &note.links {
                // only in-corpus targets participate; self-links never count
                if target == &note.path || !paths.contains(target.as_str()) {
                    continue;
                }
                incoming_links
                    .entry(target.clone())
                    .or_default()
                    .push(LinkStat {
                        source_path: note.path.clone(),
                        link_count: *count,
                    });
                graph.link(&note.path, target, *count as f64);
            }
        }
        let page_ranks = graph.rank();

        let mut new_notes: Vec<String> = Vec::new();
        let mut scheduled_notes: Vec<SchedNote> = Vec::new();
        let mut ease_by_path: BTreeMap<String, u32> = BTreeMap::new();
        let mut due_dates = DueDateHistogram::new();
        let mut due_notes_count = 0usize;

        for note in notes {
            let reviewable = note.tags.iter().any(|tag| {
                self.config
                    .tags_to_review
                    .iter()
                    .any(|wanted| tag_matches(tag, wanted))
            });
            if !reviewable {
                continue;
            }

            let (Some(due_str), Some(_), Some(ease)) = (&note.due, note.interval, note.ease)
            else {
                new_notes.push(note.path.clone());
                continue;
            };
            ease_by_path.insert(note.path.clone(), ease);

            match due_datetime(due_str) {
                Some(due) => {
                    let offset = days_until(due, now);
                    if due <= now {
                        due_notes_count += 1;
                    }
                    due_dates.record(offset);
                    scheduled_notes.push(SchedNote {
                        path: note.path.clone(),
                        due,
                        days_until_due: Some(offset),
                    });
                }
                None => {
                    // unparseable date: keep the note scheduled but never
                    // due, sorted after everything dated
                    scheduled_notes.push(SchedNote {
                        path: note.path.clone(),
                        due: DateTime::<Utc>::MAX_UTC,
                        days_until_due: None,
                    });
                }
            }
        }

        let rank = |path: &str| page_ranks.get(path).copied().unwrap_or(0.0);
        new_notes.sort_by(|a, b| rank(b).total_cmp(&rank(a)));
        scheduled_notes.sort_by(|a, b| {
            a.due
                .cmp(&b.due)
                .then_with(|| rank(&b.path).total_cmp(&rank(&a.path)))
        });

        log::debug!(
            "note pass: {} new, {} scheduled, {} due",
            new_notes.len(),
            scheduled_notes.len(),
            due_notes_count
        );

        let queue = Arc::new(ReviewQueue {
            new_notes,
            scheduled_notes,
            due_notes_count,
            due_dates: due_dates.clone(),
            page_ranks,
            ease_by_path,
            incoming_links,
        });
        *self.note_histogram.lock() = due_dates;
        *self.review_queue.write() = queue.clone();
        Some(queue)
    }

    /// Review a single note. Never-reviewed notes bootstrap their ease from
    /// the link graph of the last pass. The returned schedule is the host's
    /// to persist; `Reset` is a host-side clearing action, not interval
    /// math, and is rejected here.
    pub fn review_note(
        &self,
        note: &NoteMeta,
        response: ReviewResponse,
        now: DateTime<Utc>,
    ) -> Result<NoteSchedule, CoreError> {
        if response == ReviewResponse::Reset {
            return Err(CoreError::Invalid("reset clears scheduling state"));
        }

        let queue = self.review_queue();
        let (interval, ease, delay_ms) = if note.has_scheduling() {
            let delay_ms = note
                .due
                .as_deref()
                .and_then(due_datetime)
                .map(|due| now.timestamp_millis() - due.timestamp_millis())
                .unwrap_or(0);
            (
                note.interval.unwrap_or(1.0),
                note.ease.unwrap_or(self.config.base_ease),
                delay_ms,
            )
        } else {
            (1.0, self.initial_ease(note, &queue), 0)
        };

        let mut histogram = self.note_histogram.lock();
        let outcome = schedule(
            response,
            interval,
            ease,
            delay_ms,
            &self.config,
            Some(&mut histogram),
        );
        drop(histogram);

        let due = now + Duration::milliseconds((outcome.interval as f64 * MS_PER_DAY as f64) as i64);
        Ok(NoteSchedule {
            due,
            due_string: due.format("%Y-%m-%d").to_string(),
            interval: outcome.interval,
            ease: outcome.ease,
        })
    }

    /// Ease estimate for a never-reviewed note: neighbor eases weighted by
    /// link count and importance over both link directions, blended with
    /// `base_ease` by a confidence factor that grows with link volume.
    /// Zero weighted mass degrades to `base_ease` alone.
    fn initial_ease(&self, note: &NoteMeta, queue: &ReviewQueue) -> u32 {
        let mut link_total = 0.0f64;
        let mut link_pg_total = 0.0f64;
        let mut total_link_count = 0u64;

        let incoming = queue
            .incoming_links
            .get(&note.path)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        for stat in incoming {
            if let Some(ease) = queue.ease_by_path.get(&stat.source_path) {
                let rank = queue
                    .page_ranks
                    .get(&stat.source_path)
                    .copied()
                    .unwrap_or(0.0);
                link_total += stat.link_count as f64 * rank * *ease as f64;
                link_pg_total += rank * stat.link_count as f64;
                total_link_count += stat.link_count as u64;
            }
        }
        for (target, count) in &note.links {
            if let Some(ease) = queue.ease_by_path.get(target) {
                let rank = queue.page_ranks.get(target).copied().unwrap_or(0.0);
                link_total += *count as f64 * rank * *ease as f64;
                link_pg_total += rank * *count as f64;
                total_link_count += *count as u64;
            }
        }

        let base = self.config.base_ease as f64;
        let link_contribution = self.config.max_link_factor as f64
            * 1.0_f64.min((total_link_count as f64 + 0.5).ln() / 64.0_f64.ln());
        let linked = if total_link_count > 0 && link_pg_total > 0.0 {
            link_contribution * link_total / link_pg_total
        } else {
            link_contribution * base
        };
        ((1.0 - link_contribution) * base + linked).round() as u32
    }

    /// The flashcard extraction pass. Reads each flashcard-tagged note
    /// through the vault, extracts its cards into a fresh deck tree, and
    /// writes back any note whose stale cloze annotations were pruned.
    /// Failures are isolated per note; a duplicate trigger returns `None`.
    pub async fn scan_flashcards(
        &self,
        vault: &dyn Vault,
        notes: &[NoteMeta],
        buried: &HashSet<u64>,
        now: DateTime<Utc>,
    ) -> Option<Arc<FlashcardIndex>> {
        let _token = match self.flashcards_lock.try_begin() {
            Some(token) => token,
            None => {
                log::debug!("flashcard pass already running, ignoring trigger");
                return None;
            }
        };

        let mut deck_tree = Deck::root();
        let mut due_dates = DueDateHistogram::new();
        let mut sibling_groups: Vec<Vec<CardId>> = Vec::new();

        for note in notes {
            let Some(deck_path) = self.deck_path(note) else {
                continue;
            };
            let text = match vault.read_note(&note.path).await {
                Ok(text) => text,
                Err(err) => {
                    log::warn!("skipping {}: {}", note.path, err);
                    continue;
                }
            };

            let extraction =
                self.extractor
                    .extract_note(&note.path, &text, &note.headings, buried, now);

            for offset in &extraction.due_offsets {
                due_dates.record(*offset);
            }
            if !extraction.cards.is_empty() || extraction.skipped > 0 {
                deck_tree.create_deck(&deck_path);
            }
            for _ in 0..extraction.skipped {
                deck_tree.count_only(&deck_path);
            }

            let group_base = sibling_groups.len();
            for group in &extraction.sibling_groups {
                sibling_groups.push(group.iter().map(|idx| extraction.cards[*idx].id).collect());
            }
            for mut card in extraction.cards {
                if let Some(group) = card.sibling_group {
                    card.sibling_group = Some(group_base + group);
                }
                deck_tree.insert_card(&deck_path, card);
            }

            if let Some(new_text) = extraction.rewritten_text {
                if let Err(err) = vault.write_note(&note.path, &new_text).await {
                    log::warn!("could not persist pruned annotations for {}: {}", note.path, err);
                }
            }
        }

        deck_tree.sort_subdecks();
        log::debug!(
            "flashcard pass: {} due, {} new cards",
            deck_tree.due_count(),
            deck_tree.new_count()
        );

        let index = Arc::new(FlashcardIndex {
            deck_tree,
            due_dates: due_dates.clone(),
            sibling_groups,
        });
        *self.card_histogram.lock() = due_dates;
        *self.flashcard_index.write() = index.clone();
        Some(index)
    }

    /// Deck a note's cards land in: its folder path when folder decks are
    /// on (root-level notes go to "/"), else its first matching flashcard
    /// tag. Notes matching neither are skipped.
    fn deck_path(&self, note: &NoteMeta) -> Option<Vec<String>> {
        if self.config.convert_folders_to_decks {
            let mut segments: Vec<String> = note.path.split('/').map(str::to_string).collect();
            segments.pop();
            if segments.is_empty() {
                return Some(vec!["/".to_string()]);
            }
            return Some(segments);
        }

        let tag = note.tags.iter().find(|tag| {
            self.config
                .flashcard_tags
                .iter()
                .any(|wanted| tag_matches(tag, wanted))
        })?;
        let trimmed = tag.trim_start_matches('#');
        if trimmed.is_empty() {
            return Some(vec!["/".to_string()]);
        }
        Some(trimmed.split('/').map(str::to_string).collect())
    }

    /// Review a single card against the live flashcard histogram, so card
    /// reviews between passes keep balancing the same due-date
    /// distribution the pass built. New cards start at one day and
    /// `base_ease`.
    pub fn review_card(
        &self,
        card: &Card,
        response: ReviewResponse,
        now: DateTime<Utc>,
    ) -> Result<NoteSchedule, CoreError> {
        if response == ReviewResponse::Reset {
            return Err(CoreError::Invalid("reset clears scheduling state"));
        }
        let (interval, ease, delay_ms) = match card.state {
            CardState::Due {
                interval,
                ease,
                delay_ms,
            } => (interval, ease, delay_ms),
            CardState::New => (1.0, self.config.base_ease, 0),
        };
        let mut histogram = self.card_histogram.lock();
        let outcome = schedule(
            response,
            interval,
            ease,
            delay_ms,
            &self.config,
            Some(&mut histogram),
        );
        drop(histogram);

        let due = now + Duration::milliseconds((outcome.interval as f64 * MS_PER_DAY as f64) as i64);
        Ok(NoteSchedule {
            due,
            due_string: due.format("%Y-%m-%d").to_string(),
            interval: outcome.interval,
            ease: outcome.ease,
        })
    }
}
