//! Response extraction once generation is complete.
//!
//! Strategies run in order and the first one yielding text wins:
//! structured response nodes, a strict line scan over the page text, a
//! relaxed line scan, and finally a fixed placeholder. The placeholder is a
//! soft failure: the query still succeeds.

use tracing::{debug, warn};

use crate::driver::PageDriver;
use crate::selectors::RESPONSE_SELECTORS;

/// Structured node texts shorter than this are UI fragments.
pub const MIN_NODE_CHARS: usize = 20;

pub const PLACEHOLDER: &str = "No response text could be extracted from the page. \
Re-run with --debug to keep the browser visible and capture a screenshot for diagnosis.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    StructuredNodes,
    LineScan,
    RelaxedLineScan,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionCandidate {
    pub text: String,
    pub strategy: ExtractionStrategy,
    pub len: usize,
}

impl ExtractionCandidate {
    fn new(text: String, strategy: ExtractionStrategy) -> Self {
        let len = text.chars().count();
        Self {
            text,
            strategy,
            len,
        }
    }
}

/// Bounds and deny-list for one line-scan pass.
#[derive(Debug)]
pub struct LineFilter {
    pub min_chars: usize,
    pub max_chars: usize,
    /// a line needs strictly more words than this
    pub min_words: usize,
    pub deny: &'static [&'static str],
}

// navigation labels, tool and API mentions, model banners
const UI_CHROME: &[&str] = &[
    "Google AI Studio",
    "Get API key",
    "API key",
    "API",
    "Run settings",
    "System instructions",
    "Token count",
    "Temperature",
    "Grounding with Google Search",
    "Code execution",
    "Function calling",
    "Structured output",
    "Prompt gallery",
    "New chat",
    "Terms of Service",
    "Privacy Policy",
    "Gemini 2.5 Pro",
    "Gemini 2.5 Flash",
    "Thinking budget",
];

const UI_CHROME_SHORT: &[&str] = &[
    "Google AI Studio",
    "Get API key",
    "Run settings",
    "Token count",
];

pub const STRICT_LINES: LineFilter = LineFilter {
    min_chars: 50,
    max_chars: 2000,
    min_words: 10,
    deny: UI_CHROME,
};

pub const RELAXED_LINES: LineFilter = LineFilter {
    min_chars: 100,
    max_chars: 1500,
    min_words: 15,
    deny: UI_CHROME_SHORT,
};

impl LineFilter {
    pub fn accepts(&self, line: &str) -> bool {
        let chars = line.chars().count();
        chars >= self.min_chars
            && chars <= self.max_chars
            && line.split_whitespace().count() > self.min_words
            && !self.deny.iter().any(|d| line.contains(d))
    }

    pub fn first_match<'t>(&self, page_text: &'t str) -> Option<&'t str> {
        page_text.lines().map(str::trim).find(|l| self.accepts(l))
    }
}

/// Pick the answer among the texts one response selector matched.
pub fn pick_structured(texts: &[String], primary_chunk: bool) -> Option<String> {
    let kept: Vec<&str> = texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| t.chars().count() >= MIN_NODE_CHARS)
        .collect();
    if kept.is_empty() {
        return None;
    }
    if primary_chunk {
        Some(kept.join("\n\n"))
    } else {
        kept.into_iter()
            .max_by_key(|t| t.chars().count())
            .map(str::to_string)
    }
}

async fn structured_nodes<D>(driver: &D) -> Option<ExtractionCandidate>
where
    D: PageDriver + ?Sized,
{
    for rs in RESPONSE_SELECTORS {
        let texts = match driver.query_texts(rs.selector).await {
            Ok(texts) => texts,
            Err(e) => {
                debug!(selector = rs.selector, "response query failed: {e:#}");
                continue;
            }
        };
        if texts.is_empty() {
            continue;
        }
        // the first selector with any match decides, even if all of it is noise
        debug!(selector = rs.selector, matches = texts.len(), "response nodes found");
        return pick_structured(&texts, rs.primary_chunk)
            .map(|t| ExtractionCandidate::new(t, ExtractionStrategy::StructuredNodes));
    }
    None
}

/// Run the strategy chain. Always yields a candidate.
pub async fn extract<D>(driver: &D) -> ExtractionCandidate
where
    D: PageDriver + ?Sized,
{
    let mut candidate = match structured_nodes(driver).await {
        Some(c) => c,
        None => {
            let page_text = match driver.body_text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!("could not read page text for extraction: {e:#}");
                    String::new()
                }
            };
            scan_lines(&page_text)
        }
    };

    candidate.text = format_response(&candidate.text);
    debug!(strategy = ?candidate.strategy, len = candidate.len, "response extracted");
    candidate
}

/// Line-scan fallbacks over the full page text, ending in the placeholder.
pub fn scan_lines(page_text: &str) -> ExtractionCandidate {
    if let Some(line) = STRICT_LINES.first_match(page_text) {
        return ExtractionCandidate::new(line.to_string(), ExtractionStrategy::LineScan);
    }
    if let Some(line) = RELAXED_LINES.first_match(page_text) {
        return ExtractionCandidate::new(line.to_string(), ExtractionStrategy::RelaxedLineScan);
    }
    warn!("no response text matched any extraction strategy");
    ExtractionCandidate::new(PLACEHOLDER.to_string(), ExtractionStrategy::Placeholder)
}

const FORMAT_REPLACEMENTS: &[(&str, &str)] = &[
    ("\n• ", "\n- "),
    ("\n◦ ", "\n  - "),
    ("\n▪ ", "\n  - "),
    ("\nSummary\n", "\n## Summary\n"),
    ("\nKey Points\n", "\n## Key Points\n"),
    ("\nConclusion\n", "\n## Conclusion\n"),
    ("\nNote: ", "\n**Note:** "),
    ("\nExample: ", "\n**Example:** "),
    ("\nImportant: ", "\n**Important:** "),
];

/// Cosmetic markdown pass: fixed replacements, then at most one blank line in a row.
pub fn format_response(text: &str) -> String {
    // every pattern is anchored on a newline, so lead with one for the first line
    let mut out = format!("\n{text}");
    for (from, to) in FORMAT_REPLACEMENTS {
        out = out.replace(from, to);
    }
    collapse_blank_lines(&out[1..])
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPage;

    const ANSWER: &str = "Rust ownership means every value has a single owner that frees it when dropped.";
    const NOISY_LINE: &str = "This is a long enough line of ordinary prose that would pass the heuristic scan filter easily.";

    #[test]
    fn test_line_filter_bounds() {
        assert!(STRICT_LINES.accepts(NOISY_LINE));
        assert!(!STRICT_LINES.accepts("too short to count"));
        // long enough but not enough words
        assert!(!STRICT_LINES.accepts(&"x".repeat(80)));
        assert!(!STRICT_LINES.accepts(&"word ".repeat(500)));
        assert!(!STRICT_LINES.accepts(
            "Open Run settings to change the temperature and other generation parameters today"
        ));
    }

    #[test]
    fn test_relaxed_scan_uses_short_deny_list() {
        let line = "You can call the API from any language, and the client libraries cover \
                    Python, Go, Node and Java with the same request shape for every model.";
        assert!(!STRICT_LINES.accepts(line));
        assert!(RELAXED_LINES.accepts(line));
        let candidate = scan_lines(&format!("Home\n{line}\nSettings"));
        assert_eq!(candidate.strategy, ExtractionStrategy::RelaxedLineScan);
        assert_eq!(candidate.text, line);
    }

    #[test]
    fn test_pick_structured_longest_and_chunked() {
        let texts = vec![
            "short".to_string(),
            "A medium sized response text.".to_string(),
            "A noticeably longer response text than the other one.".to_string(),
        ];
        assert_eq!(
            pick_structured(&texts, false).unwrap(),
            "A noticeably longer response text than the other one."
        );
        assert_eq!(
            pick_structured(&texts, true).unwrap(),
            "A medium sized response text.\n\nA noticeably longer response text than the other one."
        );
        assert!(pick_structured(&["tiny".to_string()], true).is_none());
    }

    #[test]
    fn test_format_response() {
        let raw = "Intro\n• one\n• two\n\n\n\nSummary\nNote: keep it\n\n\n";
        assert_eq!(
            format_response(raw),
            "Intro\n- one\n- two\n\n## Summary\n**Note:** keep it\n\n"
        );
    }

    #[test]
    fn test_format_response_converts_first_line() {
        assert_eq!(format_response("• one\nSummary\nx"), "- one\n## Summary\nx");
        assert_eq!(format_response("Summary\nNote: y"), "## Summary\n**Note:** y");
        assert_eq!(format_response(""), "");
    }

    #[tokio::test]
    async fn test_structured_nodes_win_over_body_text() {
        let page = ScriptedPage::new()
            .with_texts(RESPONSE_SELECTORS[1].selector, &[ANSWER])
            .with_body(&format!("{NOISY_LINE}\n{ANSWER}"));

        let candidate = extract(&page).await;
        assert_eq!(candidate.strategy, ExtractionStrategy::StructuredNodes);
        assert_eq!(candidate.text, ANSWER);
    }

    #[tokio::test]
    async fn test_primary_chunks_are_joined_in_order() {
        let page = ScriptedPage::new().with_texts(
            RESPONSE_SELECTORS[0].selector,
            &["First paragraph of the answer.", "ok", "Second paragraph of the answer."],
        );
        let candidate = extract(&page).await;
        assert_eq!(
            candidate.text,
            "First paragraph of the answer.\n\nSecond paragraph of the answer."
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_line_scan() {
        let page = ScriptedPage::new().with_body(&format!("New chat\nRun\n{NOISY_LINE}\nFooter"));
        let candidate = extract(&page).await;
        assert_eq!(candidate.strategy, ExtractionStrategy::LineScan);
        assert_eq!(candidate.text, NOISY_LINE);
    }

    #[tokio::test]
    async fn test_placeholder_when_nothing_matches() {
        let page = ScriptedPage::new().with_body("Home\nSettings\nRun");
        let candidate = extract(&page).await;
        assert_eq!(candidate.strategy, ExtractionStrategy::Placeholder);
        assert_eq!(candidate.text, PLACEHOLDER);
    }
}
