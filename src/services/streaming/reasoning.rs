//! Reasoning/answer splitting
//!
//! Models that stream their chain of thought before the answer get the reasoning
//! rendered as a markdown quote: the first reasoning fragment opens with `>`,
//! paragraph breaks inside it are collapsed so the quote stays continuous, and
//! the first answer fragment is separated from the quote by a blank line.
//!
//! A splitter is created inside each streaming call and never shared.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    NotStarted,
    Reasoning,
    AnswerStarted,
}

/// Per-call reasoning/answer state machine
#[derive(Debug, Default)]
pub struct ReasoningSplitter {
    phase: Phase,
}

impl ReasoningSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a reasoning fragment
    pub fn reasoning(&mut self, fragment: &str) -> String {
        let text = fragment.replace("\n\n", "\n");
        match self.phase {
            Phase::NotStarted => {
                self.phase = Phase::Reasoning;
                format!(">{text}")
            }
            // reasoning after the answer started is rendered inline
            Phase::Reasoning | Phase::AnswerStarted => text,
        }
    }

    /// Render an answer fragment
    pub fn answer(&mut self, fragment: &str) -> String {
        match self.phase {
            Phase::Reasoning => {
                self.phase = Phase::AnswerStarted;
                format!("\n\n{fragment}")
            }
            Phase::NotStarted => {
                self.phase = Phase::AnswerStarted;
                fragment.to_string()
            }
            Phase::AnswerStarted => fragment.to_string(),
        }
    }

    /// Render a complete non-streamed response
    #[must_use]
    pub fn render_complete(reasoning: Option<&str>, content: &str) -> String {
        match reasoning {
            Some(reasoning) => format!(">{reasoning}\n\n{content}"),
            None => content.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_then_answer() {
        let mut splitter = ReasoningSplitter::new();
        let out: String = [
            splitter.reasoning("think"),
            splitter.reasoning("ing\n\nmore"),
            splitter.answer("Hello"),
            splitter.answer(" world"),
        ]
        .concat();
        assert_eq!(out, ">thinking\nmore\n\nHello world");
    }

    #[test]
    fn test_answer_without_reasoning_passes_through() {
        let mut splitter = ReasoningSplitter::new();
        assert_eq!(splitter.answer("Hi"), "Hi");
        assert_eq!(splitter.answer("!"), "!");
    }

    #[test]
    fn test_fresh_splitter_per_call() {
        let mut first = ReasoningSplitter::new();
        first.reasoning("a");
        first.answer("b");

        let mut second = ReasoningSplitter::new();
        assert_eq!(second.reasoning("c"), ">c");
    }

    #[test]
    fn test_render_complete() {
        assert_eq!(ReasoningSplitter::render_complete(Some("r"), "c"), ">r\n\nc");
        assert_eq!(ReasoningSplitter::render_complete(None, "c"), "c");
    }
}
