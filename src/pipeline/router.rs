//! Tool-use markup in generated sentences

use regex::Regex;
use std::sync::LazyLock;

/// Matches `<use-tool name="..." parameter="..."></use-tool>`
static TOOL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<use-tool\s+name="([^"]+)"\s+parameter="([^"]+)"\s*>\s*</use-tool>"#)
        .expect("valid regex")
});

/// A tool the model asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub name: String,
    pub parameter: String,
}

/// A finished sentence split into a tool call and speakable text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedSentence {
    /// First tool markup in the sentence, if any
    pub tool: Option<ToolInvocation>,
    /// Trimmed text left after removing that markup; `None` if nothing is left to say
    pub speech: Option<String>,
}

/// Extract tool markup from a sentence
///
/// Only the first well-formed markup counts. Both attributes must be
/// non-empty; anything else is left in the text.
#[must_use]
pub fn route_sentence(sentence: &str) -> RoutedSentence {
    let tool = TOOL_REGEX.captures(sentence).map(|c| ToolInvocation {
        name: c[1].to_string(),
        parameter: c[2].to_string(),
    });

    let stripped = TOOL_REGEX.replace(sentence, "");
    let stripped = stripped.trim();
    RoutedSentence {
        tool,
        speech: (!stripped.is_empty()).then(|| stripped.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_sentence_is_trimmed() {
        let routed = route_sentence("  Hello world. ");
        assert!(routed.tool.is_none());
        assert_eq!(routed.speech.as_deref(), Some("Hello world."));
    }

    #[test]
    fn markup_only_sentence_is_silent() {
        let routed = route_sentence(r#"<use-tool name="screenshot" parameter="full"></use-tool>"#);
        assert_eq!(
            routed.tool,
            Some(ToolInvocation {
                name: "screenshot".to_string(),
                parameter: "full".to_string(),
            })
        );
        assert!(routed.speech.is_none());
    }

    #[test]
    fn markup_is_removed_from_speech() {
        let routed = route_sentence(
            r#"Let me look that up. <use-tool name="search" parameter="rust traits"></use-tool>"#,
        );
        assert_eq!(
            routed.tool.map(|t| t.parameter).as_deref(),
            Some("rust traits")
        );
        assert_eq!(routed.speech.as_deref(), Some("Let me look that up."));
    }

    #[test]
    fn empty_attribute_is_not_a_tool_call() {
        let sentence = r#"<use-tool name="screenshot" parameter=""></use-tool>"#;
        let routed = route_sentence(sentence);
        assert!(routed.tool.is_none());
        assert_eq!(routed.speech.as_deref(), Some(sentence));
    }

    #[test]
    fn only_the_first_markup_is_taken() {
        let routed = route_sentence(concat!(
            r#"<use-tool name="a" parameter="1"></use-tool> "#,
            r#"<use-tool name="b" parameter="2"></use-tool>"#,
        ));
        assert_eq!(routed.tool.map(|t| t.name).as_deref(), Some("a"));
        assert_eq!(
            routed.speech.as_deref(),
            Some(r#"<use-tool name="b" parameter="2"></use-tool>"#)
        );
    }

    #[test]
    fn blank_sentence_is_silent() {
        assert!(route_sentence("   ").speech.is_none());
    }
}
