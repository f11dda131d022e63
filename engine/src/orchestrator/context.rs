//! Context bundle assembly
//!
//! Packs goal analysis, memory search results, research, recalled lessons,
//! user notes, and the running transcript into one text bundle under the
//! configured byte ceiling. When the bundle overflows, the oldest transcript
//! entries go first; as a last resort the rendered text is cut at the
//! ceiling with an explicit truncation marker.

use crate::learning::LearningEntry;
use serde::{Deserialize, Serialize};

/// Marker appended when the bundle was hard-cut
const TRUNCATION_MARKER: &str = "\n[context truncated]";

/// One transcript line summarising an earlier agent call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub iteration: u32,
    pub role: String,
    pub summary: String,
}

/// Rendered bundle plus its truncation flag
#[derive(Debug, Clone)]
pub struct RenderedBundle {
    pub text: String,
    pub truncated: bool,
}

/// Accumulates the session's context between agent calls
#[derive(Debug, Clone)]
pub struct ContextBundle {
    goal: String,
    ceiling: usize,
    analysis: Option<serde_json::Value>,
    memory: Option<serde_json::Value>,
    research: Option<serde_json::Value>,
    lessons: Vec<LearningEntry>,
    notes: Vec<String>,
    transcript: Vec<TranscriptEntry>,
}

impl ContextBundle {
    pub fn new(goal: impl Into<String>, ceiling: usize) -> Self {
        Self {
            goal: goal.into(),
            ceiling,
            analysis: None,
            memory: None,
            research: None,
            lessons: Vec::new(),
            notes: Vec::new(),
            transcript: Vec::new(),
        }
    }

    pub fn set_analysis(&mut self, analysis: serde_json::Value) {
        self.analysis = Some(analysis);
    }

    pub fn set_memory(&mut self, memory: serde_json::Value) {
        self.memory = Some(memory);
    }

    pub fn set_research(&mut self, research: serde_json::Value) {
        self.research = Some(research);
    }

    pub fn set_lessons(&mut self, lessons: Vec<LearningEntry>) {
        self.lessons = lessons;
    }

    /// Attach a user note (gate edits, revise notes)
    pub fn push_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Record an agent call in the running transcript
    pub fn push_transcript(&mut self, iteration: u32, role: &str, summary: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            iteration,
            role: role.to_string(),
            summary: summary.into(),
        });
    }

    /// Render the bundle within the ceiling.
    ///
    /// A bundle of exactly the ceiling size passes untouched; one byte over
    /// triggers truncation (transcript-first, then a hard cut) and sets the
    /// marker flag.
    pub fn render(&self) -> RenderedBundle {
        // Drop oldest transcript entries until the text fits
        let mut skip = 0;
        loop {
            let text = self.render_with_transcript(&self.transcript[skip..]);
            if text.len() <= self.ceiling {
                return RenderedBundle {
                    text,
                    truncated: skip > 0,
                };
            }
            if skip < self.transcript.len() {
                skip += 1;
                continue;
            }

            // Transcript is gone and the text still overflows: hard cut
            let budget = self.ceiling.saturating_sub(TRUNCATION_MARKER.len());
            let mut cut = budget;
            while cut > 0 && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            let mut truncated_text = text[..cut].to_string();
            truncated_text.push_str(TRUNCATION_MARKER);
            return RenderedBundle {
                text: truncated_text,
                truncated: true,
            };
        }
    }

    fn render_with_transcript(&self, transcript: &[TranscriptEntry]) -> String {
        let mut out = String::new();
        out.push_str(&format!("Goal: {}\n", self.goal));

        if let Some(analysis) = &self.analysis {
            out.push_str(&format!("Analysis: {}\n", analysis));
        }

        if !self.lessons.is_empty() {
            out.push_str("Lessons from earlier sessions:\n");
            for lesson in &self.lessons {
                out.push_str(&format!(
                    "- [{}] {}\n",
                    match lesson.kind {
                        crate::learning::LessonKind::Pattern => "worked",
                        crate::learning::LessonKind::Error => "failed",
                    },
                    lesson.summary
                ));
            }
        }

        if let Some(memory) = &self.memory {
            out.push_str(&format!("Memory search:\n{}\n", memory));
        }

        if let Some(research) = &self.research {
            out.push_str(&format!("Research:\n{}\n", research));
        }

        if !self.notes.is_empty() {
            out.push_str("User notes:\n");
            for note in &self.notes {
                out.push_str(&format!("- {}\n", note));
            }
        }

        if !transcript.is_empty() {
            out.push_str("Transcript:\n");
            for entry in transcript {
                out.push_str(&format!(
                    "[i{} {}] {}\n",
                    entry.iteration, entry.role, entry.summary
                ));
            }
        }

        out
    }
}
