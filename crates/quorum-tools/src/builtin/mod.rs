//! Built-in tools. `terminate` is the only one the reasoning loop depends
//! on; the rest are replaceable plugins used by the default agent profiles.

pub mod analysis;
pub mod summary;
pub mod terminate;
pub mod web_search;

pub use analysis::{DataAnalysisTool, StatisticsReportTool};
pub use summary::{ExtractKeyPointsTool, TextSummaryTool};
pub use terminate::{TerminateTool, TERMINATE_TOOL};
pub use web_search::WebSearchTool;

/// Cut `text` to at most `limit` characters, ending in `...` when shortened.
pub fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn preview_stays_within_limit() {
        assert_eq!(preview("short", 100), "short");
        assert_eq!(preview(&"x".repeat(100), 100), "x".repeat(100));

        let cut = preview(&"x".repeat(150), 100);
        assert_eq!(cut.chars().count(), 100);
        assert_eq!(cut, format!("{}...", "x".repeat(97)));

        assert_eq!(preview(&"字".repeat(101), 100).chars().count(), 100);
        assert_eq!(preview("abcdef", 2), "...");
    }
}
