//! Context Assembler (C4): compose episodic history and semantic search
//! hits into a single bounded context block for the LLM call.
//!
//! A context-pack builder might truncate each section's content by keeping
//! its *head* and apply a total budget by walking sections in declaration
//! order, dropping the tail once the budget runs out. This assembler
//! inverts both: conversational context is only useful if the *most
//! recent* turns survive, so per-section truncation keeps the tail, and
//! the total-budget pass walks sections newest-first, dropping the oldest
//! first.

use sa_domain::plan::SearchHit;
use sa_domain::tool::Message;
use serde::Serialize;

/// One labeled block of text headed into the final context string.
#[derive(Debug, Clone)]
pub struct Section {
    pub title: String,
    pub body: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub title: String,
    pub chars: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextReport {
    pub sections: Vec<SectionReport>,
    pub total_chars: usize,
    pub truncated_total_cap: bool,
}

pub struct ContextAssembler {
    pub episodic_turns: usize,
    pub semantic_top_k: usize,
    pub snippet_max_chars: usize,
    pub budget_chars: usize,
}

impl ContextAssembler {
    pub fn new(
        episodic_turns: usize,
        semantic_top_k: usize,
        snippet_max_chars: usize,
        budget_chars: usize,
    ) -> Self {
        Self {
            episodic_turns,
            semantic_top_k,
            snippet_max_chars,
            budget_chars,
        }
    }

    /// Build the final context string plus a report describing what was
    /// kept and what was trimmed. `history` is the session's full
    /// conversation log (already in chronological order); `hits` are
    /// semantic search results ordered by descending relevance.
    pub fn build(&self, goal: &str, history: &[Message], hits: &[SearchHit]) -> (String, ContextReport) {
        let mut sections = Vec::new();

        if !goal.trim().is_empty() {
            sections.push(Section {
                title: "goal".into(),
                body: goal.trim().to_string(),
                truncated: false,
            });
        }

        let tail_start = history.len().saturating_sub(self.episodic_turns);
        if tail_start < history.len() {
            let body = history[tail_start..]
                .iter()
                .map(|m| format!("{:?}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(Section {
                title: "recent_conversation".into(),
                body,
                truncated: false,
            });
        }

        if !hits.is_empty() {
            let top = &hits[..hits.len().min(self.semantic_top_k)];
            let body = top
                .iter()
                .map(|h| {
                    let (snippet, _) = truncate_keep_tail(&h.snippet, self.snippet_max_chars);
                    format!("[{}#{}] {}", h.source_id, h.chunk_id, snippet)
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            sections.push(Section {
                title: "semantic_recall".into(),
                body,
                truncated: false,
            });
        }

        let truncated_total_cap = apply_total_cap(&mut sections, self.budget_chars);

        let report = ContextReport {
            sections: sections
                .iter()
                .map(|s| SectionReport {
                    title: s.title.clone(),
                    chars: s.body.chars().count(),
                    truncated: s.truncated,
                })
                .collect(),
            total_chars: sections.iter().map(|s| s.body.chars().count()).sum(),
            truncated_total_cap,
        };

        let assembled = sections
            .iter()
            .filter(|s| !s.body.is_empty())
            .map(|s| format!("## {}\n{}", s.title, s.body))
            .collect::<Vec<_>>()
            .join("\n\n");

        (assembled, report)
    }
}

/// Keep the *tail* of `content` when it exceeds `max_chars`, prefixing a
/// truncation marker. Respects UTF-8 char boundaries.
pub fn truncate_keep_tail(content: &str, max_chars: usize) -> (String, bool) {
    let total = content.chars().count();
    if total <= max_chars {
        return (content.to_string(), false);
    }
    let skip = total - max_chars;
    let tail: String = content.chars().skip(skip).collect();
    (format!("[TRUNCATED]\n{tail}"), true)
}

/// Enforce a global character budget across sections, newest (last) first.
/// Once the budget is exhausted, earlier sections are truncated or dropped
/// entirely. Returns whether anything was cut.
fn apply_total_cap(sections: &mut [Section], total_max_chars: usize) -> bool {
    let mut remaining = total_max_chars;
    let mut any_cut = false;

    for section in sections.iter_mut().rev() {
        let len = section.body.chars().count();
        if len <= remaining {
            remaining -= len;
            continue;
        }
        if remaining == 0 {
            section.body.clear();
            section.truncated = true;
            any_cut = true;
            continue;
        }
        let (kept, cut) = truncate_keep_tail(&section.body, remaining);
        section.body = kept;
        section.truncated = section.truncated || cut;
        any_cut = any_cut || cut;
        remaining = 0;
    }

    any_cut
}
