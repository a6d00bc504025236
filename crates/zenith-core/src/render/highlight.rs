use std::sync::LazyLock;

use syntect::easy::HighlightLines;
use syntect::highlighting::ThemeSet;
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

// Syntax highlighting resources (loaded once)
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

const THEME_NAME: &str = "base16-ocean.dark";

/// Language tag used when a fence declares nothing or something unknown
pub const PLAIN_TEXT: &str = "plaintext";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightedToken {
    pub text: String,
    pub fg: [u8; 3],
}

/// A fenced or indented code block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSegment {
    /// Resolved language tag, `plaintext` when unrecognized
    pub language: String,
    /// Info string as written after the fence
    pub declared: Option<String>,
    pub source: String,
    /// One entry per source line
    pub lines: Vec<Vec<HighlightedToken>>,
}

impl CodeSegment {
    pub fn new(declared: Option<&str>, source: String) -> Self {
        let declared = declared
            .and_then(|info| info.split_whitespace().next())
            .filter(|token| !token.is_empty())
            .map(str::to_string);

        let (syntax, language) = resolve_language(declared.as_deref());
        let lines = highlight(&source, syntax);

        Self {
            language,
            declared,
            source,
            lines,
        }
    }
}

fn resolve_language(declared: Option<&str>) -> (&'static SyntaxReference, String) {
    match declared.and_then(|token| SYNTAX_SET.find_syntax_by_token(token)) {
        Some(syntax) => (syntax, declared.unwrap_or(PLAIN_TEXT).to_ascii_lowercase()),
        None => (SYNTAX_SET.find_syntax_plain_text(), PLAIN_TEXT.to_string()),
    }
}

fn highlight(source: &str, syntax: &SyntaxReference) -> Vec<Vec<HighlightedToken>> {
    let Some(theme) = THEME_SET.themes.get(THEME_NAME) else {
        return plain_lines(source);
    };
    let mut highlighter = HighlightLines::new(syntax, theme);
    let mut lines = Vec::new();

    for line in LinesWithEndings::from(source) {
        match highlighter.highlight_line(line, &SYNTAX_SET) {
            Ok(ranges) => {
                let tokens = ranges
                    .into_iter()
                    .map(|(style, text)| HighlightedToken {
                        text: text.trim_end_matches(['\n', '\r']).to_string(),
                        fg: [style.foreground.r, style.foreground.g, style.foreground.b],
                    })
                    .filter(|token| !token.text.is_empty())
                    .collect();
                lines.push(tokens);
            }
            Err(e) => {
                tracing::debug!("highlighting failed, falling back to plain text: {}", e);
                return plain_lines(source);
            }
        }
    }

    lines
}

fn plain_lines(source: &str) -> Vec<Vec<HighlightedToken>> {
    source
        .lines()
        .map(|line| {
            vec![HighlightedToken {
                text: line.to_string(),
                fg: [192, 197, 206],
            }]
        })
        .collect()
}
