use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use recall_core::{
    fingerprint, schedule, sr_annotation, CardState, CardType, CoreError, NoteMeta,
    ReviewResponse, SrsConfig, SrsEngine, Vault,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 5, 1, 12, 0, 0).unwrap()
}

fn note(path: &str, tags: &[&str]) -> NoteMeta {
    let mut n = NoteMeta::new(path);
    n.tags = tags.iter().map(|t| t.to_string()).collect();
    n
}

fn scheduled_note(path: &str, due: &str, interval: f32, ease: u32) -> NoteMeta {
    let mut n = note(path, &["#review"]);
    n.due = Some(due.to_string());
    n.interval = Some(interval);
    n.ease = Some(ease);
    n
}

fn link(note: &mut NoteMeta, target: &str, count: u32) {
    note.links.insert(target.to_string(), count);
}

/// Corpus used by the note-pass tests: `hub.md` is linked from everything,
/// `b.md` and `c.md` are scheduled on the same day, `x.md` is untagged.
fn corpus() -> Vec<NoteMeta> {
    let hub = note("hub.md", &["#review"]);

    let mut a = note("a.md", &["#review"]);
    link(&mut a, "hub.md", 2);

    let mut b = scheduled_note("b.md", "2021-04-28", 10.0, 250);
    link(&mut b, "hub.md", 1);

    let mut c = scheduled_note("c.md", "2021-04-28", 8.0, 250);
    link(&mut c, "hub.md", 1);
    link(&mut c, "b.md", 1);

    let mut x = note("x.md", &["#journal"]);
    link(&mut x, "hub.md", 1);
    link(&mut x, "missing.md", 3);

    vec![hub, a, b, c, x]
}

#[test]
fn note_pass_ranks_new_by_importance_and_scheduled_by_due_then_importance() {
    let engine = SrsEngine::new(SrsConfig::default()).unwrap();
    let queue = engine.scan_notes(&corpus(), now()).unwrap();

    // hub.md collects the most weighted inlinks, so it leads triage
    assert_eq!(queue.new_notes, vec!["hub.md".to_string(), "a.md".to_string()]);

    // same due date: c.md links into b.md, so b.md ranks higher
    let order: Vec<&str> = queue
        .scheduled_notes
        .iter()
        .map(|n| n.path.as_str())
        .collect();
    assert_eq!(order, vec!["b.md", "c.md"]);
    assert_eq!(queue.due_notes_count, 2);
    assert_eq!(queue.scheduled_notes[0].days_until_due, Some(-3));
    assert_eq!(queue.due_dates.count(-3), 2);

    // untagged notes feed the graph but never the queues
    assert!(!queue.new_notes.iter().any(|p| p == "x.md"));
    assert!(queue.page_ranks.contains_key("hub.md"));

    assert_eq!(queue.next_note(), Some("b.md"));
}

#[test]
fn published_queue_is_replaced_atomically() {
    let engine = SrsEngine::new(SrsConfig::default()).unwrap();
    assert!(engine.review_queue().new_notes.is_empty());

    engine.scan_notes(&corpus(), now()).unwrap();
    let snapshot = engine.review_queue();
    assert_eq!(snapshot.new_notes.len(), 2);

    // a later pass over a smaller corpus fully replaces the snapshot
    engine.scan_notes(&[note("solo.md", &["#review"])], now()).unwrap();
    assert_eq!(engine.review_queue().new_notes, vec!["solo.md".to_string()]);
    // the old Arc still reads consistently
    assert_eq!(snapshot.new_notes.len(), 2);
}

#[test]
fn review_new_note_bootstraps_ease_from_links() {
    let engine = SrsEngine::new(SrsConfig::default()).unwrap();
    engine.scan_notes(&corpus(), now()).unwrap();

    // hub.md's scheduled neighbors all sit at ease 250, so the blend is
    // exactly base ease regardless of the confidence factor
    let hub = note("hub.md", &["#review"]);
    let sched = engine.review_note(&hub, ReviewResponse::Good, now()).unwrap();
    assert_eq!(sched.ease, 250);
    assert_eq!(sched.interval, 3.0);
    assert_eq!(sched.due_string, "2021-05-04");
}

#[test]
fn review_note_without_any_links_falls_back_to_base_ease() {
    let engine = SrsEngine::new(SrsConfig::default()).unwrap();
    engine.scan_notes(&[note("lonely.md", &["#review"])], now()).unwrap();

    let lonely = note("lonely.md", &["#review"]);
    let sched = engine
        .review_note(&lonely, ReviewResponse::Good, now())
        .unwrap();
    assert_eq!(sched.ease, 250);
}

#[test]
fn review_scheduled_note_applies_delay() {
    let engine = SrsEngine::new(SrsConfig::default()).unwrap();
    engine.scan_notes(&corpus(), now()).unwrap();

    // due 2021-04-28, reviewed 3.5 days late: delay floors to 3 days
    let b = scheduled_note("b.md", "2021-04-28", 10.0, 250);
    let sched = engine.review_note(&b, ReviewResponse::Good, now()).unwrap();
    // (10 + 3/2) * 2.5 = 28.75, fuzzed over an empty window stays at 29
    assert_eq!(sched.interval, 29.0);
    assert_eq!(sched.ease, 250);
    assert_eq!(sched.due_string, "2021-05-30");
}

#[test]
fn reset_is_rejected_as_interval_math() {
    let engine = SrsEngine::new(SrsConfig::default()).unwrap();
    let err = engine
        .review_note(&note("n.md", &["#review"]), ReviewResponse::Reset, now())
        .unwrap_err();
    assert!(matches!(err, CoreError::Invalid(_)));
}

#[derive(Default)]
struct MemoryVault {
    notes: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
}

impl MemoryVault {
    fn with(notes: &[(&str, &str)]) -> Self {
        let vault = Self::default();
        {
            let mut m = vault.notes.lock().unwrap();
            for (path, text) in notes {
                m.insert(path.to_string(), text.to_string());
            }
        }
        vault
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn read_note(&self, path: &str) -> Result<String, CoreError> {
        self.notes
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or(CoreError::NotFound("note"))
    }

    async fn write_note(&self, path: &str, text: &str) -> Result<(), CoreError> {
        self.notes
            .lock()
            .unwrap()
            .insert(path.to_string(), text.to_string());
        self.writes
            .lock()
            .unwrap()
            .push((path.to_string(), text.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn flashcard_pass_builds_deck_tree_and_histogram() {
    let engine = SrsEngine::new(SrsConfig::default()).unwrap();
    let text = "\
# Cells

Q::A

X::Y <!--SR:2021-04-27,10,250-->

F::G
<!--SR:2021-06-01,10,250-->

B::C
<!--SR:2021-04-27,5,250-->
";
    let vault = MemoryVault::with(&[("bio.md", text), ("misc.md", "Q::A\n")]);

    let mut bio = note("bio.md", &["#flashcards/bio"]);
    bio.headings = vec![recall_core::Heading {
        level: 1,
        text: "Cells".to_string(),
        offset: 0,
    }];
    let misc = note("misc.md", &["#journal"]);

    let buried: HashSet<u64> =
        [fingerprint("B::C\n<!--SR:2021-04-27,5,250-->")].into_iter().collect();

    let index = engine
        .scan_flashcards(&vault, &[bio, misc], &buried, now())
        .await
        .unwrap();

    let root = &index.deck_tree;
    assert_eq!(root.due_count(), 1);
    assert_eq!(root.new_count(), 1);

    let flashcards = &root.subdecks[0];
    assert_eq!(flashcards.name, "flashcards");
    let bio_deck = &flashcards.subdecks[0];
    assert_eq!(bio_deck.name, "bio");
    assert_eq!(bio_deck.due_cards.len(), 1);
    assert_eq!(bio_deck.due_cards[0].front, "X");
    assert_eq!(bio_deck.due_cards[0].context, "Cells");
    assert_eq!(bio_deck.new_cards.len(), 1);
    assert_eq!(bio_deck.new_cards[0].front, "Q");
    // future card and buried card both count as not due
    assert_eq!(bio_deck.not_due_count, 2);

    // the buried card's annotation still lands in the histogram
    assert_eq!(index.due_dates.count(-4), 2);
    assert_eq!(index.due_dates.count(31), 1);
}

#[tokio::test]
async fn cloze_pruning_writes_back_through_the_vault() {
    let engine = SrsEngine::new(SrsConfig::default()).unwrap();
    let text = "==a== and ==b==\n<!--SR:!2021-04-27,3,250!2021-04-28,4,230!2021-04-29,5,210-->\n";
    let vault = MemoryVault::with(&[("cloze.md", text)]);

    let index = engine
        .scan_flashcards(
            &vault,
            &[note("cloze.md", &["#flashcards"])],
            &HashSet::new(),
            now(),
        )
        .await
        .unwrap();

    let writes = vault.writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, "cloze.md");
    assert!(writes[0].1.contains("<!--SR:!2021-04-27,3,250!2021-04-28,4,230-->"));
    assert!(!writes[0].1.contains("2021-04-29"));

    // both remaining siblings are due and share one sibling group
    assert_eq!(index.sibling_groups.len(), 1);
    assert_eq!(index.sibling_groups[0].len(), 2);
    let deck = &index.deck_tree.subdecks[0];
    assert_eq!(deck.due_cards.len(), 2);
    assert_eq!(deck.due_cards[0].sibling_group, Some(0));
    assert_eq!(deck.due_cards[0].sibling_idx, Some(0));
    assert_eq!(deck.due_cards[1].sibling_idx, Some(1));
}

#[tokio::test]
async fn pass_guard_releases_after_completion() {
    let engine = SrsEngine::new(SrsConfig::default()).unwrap();
    let vault = MemoryVault::with(&[("n.md", "Q::A\n")]);
    let notes = [note("n.md", &["#flashcards"])];

    let first = engine
        .scan_flashcards(&vault, &notes, &HashSet::new(), now())
        .await;
    assert!(first.is_some());
    let second = engine
        .scan_flashcards(&vault, &notes, &HashSet::new(), now())
        .await;
    assert!(second.is_some());
}

#[tokio::test]
async fn scheduled_card_round_trips_through_annotation() {
    let config = SrsConfig::default();
    let engine = SrsEngine::new(config.clone()).unwrap();
    let vault = MemoryVault::with(&[("atp.md", "What is ATP::adenosine triphosphate\n")]);
    let notes = [note("atp.md", &["#flashcards"])];

    let index = engine
        .scan_flashcards(&vault, &notes, &HashSet::new(), now())
        .await
        .unwrap();
    let card = &index.deck_tree.subdecks[0].new_cards[0];
    assert_eq!(card.state, CardState::New);

    // host reviews the new card: 4-day seed, Good -> 10 days
    let outcome = schedule(ReviewResponse::Good, 4.0, 250, 0, &config, None);
    assert_eq!(outcome.interval, 10.0);
    let due = (now() + chrono::Duration::days(10)).date_naive();
    let rewritten = format!(
        "What is ATP::adenosine triphosphate {}\n",
        sr_annotation(due, outcome.interval, outcome.ease)
    );
    vault.notes.lock().unwrap().insert("atp.md".to_string(), rewritten);

    // twelve days later the card comes back due with the same schedule
    let later = now() + chrono::Duration::days(12);
    let index = engine
        .scan_flashcards(&vault, &notes, &HashSet::new(), later)
        .await
        .unwrap();
    let card = &index.deck_tree.subdecks[0].due_cards[0];
    assert_eq!(card.front, "What is ATP");
    assert_eq!(card.back, "adenosine triphosphate");
    assert_eq!(card.card_type, CardType::SingleLineBasic);
    match &card.state {
        CardState::Due { interval, ease, .. } => {
            assert_eq!(*interval, 10.0);
            assert_eq!(*ease, 250);
        }
        other => panic!("expected due card, got {:?}", other),
    }
}
