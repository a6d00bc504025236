//! Transcript rendering
//!
//! Assistant replies go through math delimiter normalization, Markdown parsing
//! and code highlighting, producing a [`RenderedBlock`] of typed segments. Math
//! typesetting is a separate pass run by whoever owns an optional
//! [`MathTypesetter`], after the block has been placed in the transcript.

pub mod highlight;
pub mod markdown;
pub mod math;

pub use highlight::{CodeSegment, HighlightedToken, PLAIN_TEXT};
pub use math::{normalize_math, MathTypesetter, UnicodeTypesetter};

/// Inline styling flags for a run of text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanStyle {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub code: bool,
    pub math: bool,
    pub link: bool,
    pub heading: bool,
    /// List bullets, quote bars, table separators
    pub marker: bool,
}

impl SpanStyle {
    fn merges_with(&self, other: &SpanStyle) -> bool {
        self == other && !self.code && !self.math && !self.marker
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub style: SpanStyle,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: SpanStyle::default(),
        }
    }

    pub fn styled(text: impl Into<String>, style: SpanStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A block of prose: paragraph, heading, list item, quote line or table row
    Text(Vec<Span>),
    Code(CodeSegment),
    /// Display math, typeset in place by [`RenderedBlock::typeset`]
    Math(String),
}

/// Typed output for one transcript entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedBlock {
    pub segments: Vec<Segment>,
}

impl RenderedBlock {
    /// Literal text, bypassing every rendering step
    pub fn literal(text: &str) -> Self {
        Self {
            segments: vec![Segment::Text(vec![Span::plain(text)])],
        }
    }

    /// Number of inline and display math items in the block
    pub fn math_count(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(spans) => spans.iter().filter(|s| s.style.math).count(),
                Segment::Math(_) => 1,
                Segment::Code(_) => 0,
            })
            .sum()
    }

    /// Rewrite every math item through `typesetter`. Returns how many were
    /// rewritten; blocks without math are left untouched.
    pub fn typeset(&mut self, typesetter: &dyn MathTypesetter) -> usize {
        let mut count = 0;
        for segment in &mut self.segments {
            match segment {
                Segment::Text(spans) => {
                    for span in spans.iter_mut().filter(|s| s.style.math) {
                        span.text = typesetter.typeset(&span.text, false);
                        count += 1;
                    }
                }
                Segment::Math(tex) => {
                    *tex = typesetter.typeset(tex, true);
                    count += 1;
                }
                Segment::Code(_) => {}
            }
        }
        count
    }

    /// Concatenated text of all segments, one segment per line
    pub fn plain_text(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(spans) => spans.iter().map(|s| s.text.as_str()).collect::<String>(),
                Segment::Code(code) => code.source.clone(),
                Segment::Math(tex) => tex.clone(),
            })
            .collect::<Vec<String>>()
            .join("\n")
    }
}

/// Render assistant Markdown into typed segments
pub fn render(text: &str) -> RenderedBlock {
    let normalized = normalize_math(text);
    markdown::parse(&normalized)
}
