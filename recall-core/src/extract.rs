use crate::{
    days_until, due_datetime, fingerprint, Card, CardState, CardType, CoreError, Heading,
    SrsConfig,
};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::collections::HashSet;
use uuid::Uuid;

/// Everything one note contributed to a flashcard pass. `due_offsets` holds
/// the day offset of every embedded annotation (recorded even for buried or
/// future cards); `skipped` counts cards filed as not-due; `rewritten_text`
/// is present when stale cloze annotations were pruned and the host must
/// persist the new text.
#[derive(Clone, Debug, Default)]
pub struct NoteExtraction {
    pub cards: Vec<Card>,
    /// Sibling arena: each entry lists indices into `cards` of the cloze
    /// cards materialized from one source block.
    pub sibling_groups: Vec<Vec<usize>>,
    pub due_offsets: Vec<i64>,
    pub skipped: u32,
    pub rewritten_text: Option<String>,
}

/// Parses note text into typed flashcards. Patterns are compiled once from
/// the configured separators and reused for every note in a pass.
pub struct CardExtractor {
    singleline: Regex,
    multiline: Regex,
    back_annotation: Regex,
    codeblock: Regex,
    inline_code: Regex,
    cloze_deletion: Regex,
    multi_sched: Regex,
    disable_cloze_cards: bool,
    show_context_in_cards: bool,
}

impl CardExtractor {
    pub fn new(config: &SrsConfig) -> Result<Self, CoreError> {
        let singleline = Regex::new(&format!(
            r"(?m)^(.+){}(.+?)\n?(?:<!--SR:(.+),(\d+),(\d+)-->|$)",
            regex::escape(&config.single_line_card_separator)
        ))?;
        // Greedy back runs to the end of the paragraph; a trailing
        // annotation is detached afterwards so multi-line answers survive.
        let multiline = Regex::new(&format!(
            r"(?m)^((?:.+\n)+){}\n((?:.+\n?)+)",
            regex::escape(&config.multi_line_card_separator)
        ))?;
        let back_annotation = Regex::new(r"(?s)^(.*?)\n?<!--SR:(.+),(\d+),(\d+)-->\s*$")?;
        let codeblock = Regex::new(r"(?s)```.*?```")?;
        let inline_code = Regex::new(r"`.+?`")?;
        let cloze_deletion = Regex::new(r"==(.+?)==")?;
        let multi_sched = Regex::new(r"!([\d-]+),(\d+),(\d+)")?;
        Ok(Self {
            singleline,
            multiline,
            back_annotation,
            codeblock,
            inline_code,
            cloze_deletion,
            multi_sched,
            disable_cloze_cards: config.disable_cloze_cards,
            show_context_in_cards: config.show_context_in_cards,
        })
    }

    pub fn extract_note(
        &self,
        note_path: &str,
        text: &str,
        headings: &[Heading],
        buried: &HashSet<u64>,
        now: DateTime<Utc>,
    ) -> NoteExtraction {
        let mut out = NoteExtraction::default();
        let code_spans = self.code_spans(text);

        self.extract_basic(note_path, text, headings, buried, now, &code_spans, &mut out);
        if !self.disable_cloze_cards {
            self.extract_cloze(note_path, text, headings, buried, now, &code_spans, &mut out);
        }
        out
    }

    /// Verbatim regions: fenced blocks and inline code. A match fully
    /// contained in one never becomes a card.
    fn code_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans: Vec<(usize, usize)> = Vec::new();
        for regex in [&self.codeblock, &self.inline_code] {
            for m in regex.find_iter(text) {
                spans.push((m.start(), m.end()));
            }
        }
        spans
    }

    fn extract_basic(
        &self,
        note_path: &str,
        text: &str,
        headings: &[Heading],
        buried: &HashSet<u64>,
        now: DateTime<Utc>,
        code_spans: &[(usize, usize)],
        out: &mut NoteExtraction,
    ) {
        for (regex, card_type) in [
            (&self.singleline, CardType::SingleLineBasic),
            (&self.multiline, CardType::MultiLineBasic),
        ] {
            for caps in regex.captures_iter(text) {
                let Some(m) = caps.get(0) else { continue };
                if in_code_span(m.start(), m.as_str().trim().len(), code_spans) {
                    continue;
                }

                let card_text = m.as_str().trim().to_string();
                let card_fingerprint = fingerprint(&card_text);
                let front = caps
                    .get(1)
                    .map(|g| g.as_str().trim().to_string())
                    .unwrap_or_default();
                let (back, annotation) = match card_type {
                    CardType::SingleLineBasic => {
                        let back = caps
                            .get(2)
                            .map(|g| g.as_str().trim().to_string())
                            .unwrap_or_default();
                        let annotation = caps.get(3).map(|due| {
                            (
                                due.as_str().to_string(),
                                caps.get(4).map(|g| g.as_str()).unwrap_or_default().to_string(),
                                caps.get(5).map(|g| g.as_str()).unwrap_or_default().to_string(),
                            )
                        });
                        (back, annotation)
                    }
                    _ => {
                        let raw_back = caps.get(2).map(|g| g.as_str()).unwrap_or_default();
                        self.detach_annotation(raw_back)
                    }
                };

                let context = if self.show_context_in_cards {
                    card_context(m.start(), headings)
                } else {
                    String::new()
                };

                let state = match annotation {
                    None => CardState::New,
                    Some((due_str, interval_str, ease_str)) => {
                        let parsed = interval_str
                            .parse::<f32>()
                            .ok()
                            .zip(ease_str.parse::<u32>().ok());
                        match parsed {
                            // out-of-range numbers mean the annotation is
                            // malformed; the card has no scheduling state
                            None => CardState::New,
                            Some((interval, ease)) => match due_datetime(&due_str) {
                                None => {
                                    // unparseable due date: not yet due
                                    out.skipped += 1;
                                    continue;
                                }
                                Some(due) => {
                                    out.due_offsets.push(days_until(due, now));
                                    if buried.contains(&card_fingerprint) {
                                        out.skipped += 1;
                                        continue;
                                    }
                                    if due > now {
                                        out.skipped += 1;
                                        continue;
                                    }
                                    CardState::Due {
                                        interval,
                                        ease,
                                        delay_ms: (now - due).num_milliseconds(),
                                    }
                                }
                            },
                        }
                    }
                };

                out.cards.push(Card {
                    id: Uuid::new_v4(),
                    note_path: note_path.to_string(),
                    card_type,
                    front,
                    back,
                    text: card_text,
                    fingerprint: card_fingerprint,
                    context,
                    state,
                    sibling_idx: None,
                    sibling_group: None,
                });
            }
        }
    }

    /// Split a trailing `<!--SR:...-->` off a multi-line back.
    fn detach_annotation(&self, raw_back: &str) -> (String, Option<(String, String, String)>) {
        if let Some(caps) = self.back_annotation.captures(raw_back) {
            let back = caps
                .get(1)
                .map(|g| g.as_str().trim().to_string())
                .unwrap_or_default();
            let annotation = (
                caps.get(2).map(|g| g.as_str()).unwrap_or_default().to_string(),
                caps.get(3).map(|g| g.as_str()).unwrap_or_default().to_string(),
                caps.get(4).map(|g| g.as_str()).unwrap_or_default().to_string(),
            );
            (back, Some(annotation))
        } else {
            (raw_back.trim().to_string(), None)
        }
    }

    fn extract_cloze(
        &self,
        note_path: &str,
        text: &str,
        headings: &[Heading],
        buried: &HashSet<u64>,
        now: DateTime<Utc>,
        code_spans: &[(usize, usize)],
        out: &mut NoteExtraction,
    ) {
        for (block_start, block_end) in paragraph_spans(text) {
            let block = text[block_start..block_end].trim_end();
            if !self.cloze_deletion.is_match(block) {
                continue;
            }

            let deletions: Vec<(usize, usize)> = self
                .cloze_deletion
                .find_iter(block)
                .filter(|m| {
                    !in_code_span(block_start + m.start(), m.as_str().trim().len(), code_spans)
                })
                .map(|m| (m.start(), m.end()))
                .collect();

            let scheduling: Vec<(String, String, String)> = self
                .multi_sched
                .captures_iter(block)
                .map(|caps| {
                    (
                        caps.get(1).map(|g| g.as_str()).unwrap_or_default().to_string(),
                        caps.get(2).map(|g| g.as_str()).unwrap_or_default().to_string(),
                        caps.get(3).map(|g| g.as_str()).unwrap_or_default().to_string(),
                    )
                })
                .collect();

            // Deletions were removed from the source since last scheduling:
            // drop the excess entries, in order, and surface the rewrite.
            if scheduling.len() > deletions.len() {
                if let Some(idx) = block.rfind("<!--SR:") {
                    let mut new_block = block[..idx + "<!--SR:".len()].to_string();
                    for (due, interval, ease) in scheduling.iter().take(deletions.len()) {
                        new_block.push_str(&format!("!{},{},{}", due, interval, ease));
                    }
                    new_block.push_str("-->\n");
                    let current = out.rewritten_text.take().unwrap_or_else(|| text.to_string());
                    out.rewritten_text = Some(current.replace(block, &new_block));
                }
            }

            if deletions.is_empty() {
                continue;
            }

            let context = if self.show_context_in_cards {
                card_context(block_start, headings)
            } else {
                String::new()
            };

            let group_id = out.sibling_groups.len();
            out.sibling_groups.push(Vec::new());
            let block_fingerprint = fingerprint(block);

            for (i, (del_start, del_end)) in deletions.iter().enumerate() {
                let front = format!("{}[...]{}", &block[..*del_start], &block[*del_end..])
                    .replace("==", "");
                let back = format!(
                    "{}**{}**{}",
                    &block[..*del_start],
                    &block[*del_start..*del_end],
                    &block[*del_end..]
                )
                .replace("==", "");

                let state = if let Some((due_str, interval_str, ease_str)) = scheduling.get(i) {
                    let parsed = interval_str
                        .parse::<f32>()
                        .ok()
                        .zip(ease_str.parse::<u32>().ok());
                    match parsed {
                        None => CardState::New,
                        Some((interval, ease)) => match due_datetime(due_str) {
                            None => {
                                out.skipped += 1;
                                continue;
                            }
                            Some(due) => {
                                out.due_offsets.push(days_until(due, now));
                                if buried.contains(&block_fingerprint) {
                                    out.skipped += 1;
                                    continue;
                                }
                                if due > now {
                                    out.skipped += 1;
                                    continue;
                                }
                                CardState::Due {
                                    interval,
                                    ease,
                                    delay_ms: (now - due).num_milliseconds(),
                                }
                            }
                        },
                    }
                } else {
                    CardState::New
                };

                let card_idx = out.cards.len();
                out.cards.push(Card {
                    id: Uuid::new_v4(),
                    note_path: note_path.to_string(),
                    card_type: CardType::Cloze,
                    front,
                    back,
                    text: block.to_string(),
                    fingerprint: block_fingerprint,
                    context: context.clone(),
                    state,
                    sibling_idx: Some(i),
                    sibling_group: Some(group_id),
                });
                out.sibling_groups[group_id].push(card_idx);
            }
        }
    }
}

/// Breadcrumb of the headings enclosing `offset`: a stack of headings with
/// strictly increasing level, joined with " > ".
pub fn card_context(offset: usize, headings: &[Heading]) -> String {
    let mut stack: Vec<&Heading> = Vec::new();
    for heading in headings {
        if heading.offset > offset {
            break;
        }
        while stack.last().is_some_and(|top| top.level >= heading.level) {
            stack.pop();
        }
        stack.push(heading);
    }
    stack
        .iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Serialize the annotation a host appends to a reviewed basic card.
/// Intervals are stored whole-day in annotations; the one-decimal value
/// lives in scheduling state.
pub fn sr_annotation(due: NaiveDate, interval: f32, ease: u32) -> String {
    format!(
        "<!--SR:{},{},{}-->",
        due.format("%Y-%m-%d"),
        interval.round() as i64,
        ease
    )
}

/// Multi-entry form for cloze blocks, one sub-entry per scheduled sibling.
pub fn sr_multi_annotation(entries: &[(NaiveDate, f32, u32)]) -> String {
    let mut s = String::from("<!--SR:");
    for (due, interval, ease) in entries {
        s.push_str(&format!(
            "!{},{},{}",
            due.format("%Y-%m-%d"),
            interval.round() as i64,
            ease
        ));
    }
    s.push_str("-->");
    s
}

fn in_code_span(start: usize, len: usize, spans: &[(usize, usize)]) -> bool {
    spans
        .iter()
        .any(|(span_start, span_end)| start >= *span_start && start + len <= *span_end)
}

/// Byte spans of contiguous runs of non-empty lines.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;
    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                spans.push((s, pos));
            }
        } else if start.is_none() {
            start = Some(pos);
        }
        pos += line.len();
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}
