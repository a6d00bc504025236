use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

use super::{CodeSegment, RenderedBlock, Segment, Span, SpanStyle};

/// Parse normalized Markdown into segments. Math markers (`$…$`, `$$…$$`) are
/// expected to be in place already.
pub fn parse(text: &str) -> RenderedBlock {
    let mut builder = Builder::default();
    for event in Parser::new_ext(text, options()) {
        builder.event(event);
    }
    builder.finish()
}

pub(crate) fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_MATH);
    options
}

#[derive(Default)]
struct Builder {
    segments: Vec<Segment>,
    spans: Vec<Span>,

    // Style stack for nested formatting
    bold: usize,
    italic: usize,
    strikethrough: usize,
    link: usize,
    heading: bool,
    quote_depth: usize,

    // Open lists: next number for ordered lists, None for bullets
    lists: Vec<Option<u64>>,
    code: Option<(Option<String>, String)>,
    table_cell: usize,
}

impl Builder {
    fn event(&mut self, event: Event<'_>) {
        if let Some((_, buffer)) = self.code.as_mut() {
            match event {
                Event::Text(text) => buffer.push_str(&text),
                Event::End(TagEnd::CodeBlock) => self.close_code_block(),
                _ => {}
            }
            return;
        }

        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),

            Event::Text(text) => self.push(&text, self.style()),
            Event::Code(code) => self.push(
                &code,
                SpanStyle {
                    code: true,
                    ..self.style()
                },
            ),
            Event::InlineMath(tex) => self.push(
                &tex,
                SpanStyle {
                    math: true,
                    ..SpanStyle::default()
                },
            ),
            Event::DisplayMath(tex) => {
                self.flush();
                self.segments.push(Segment::Math(tex.trim().to_string()));
            }
            Event::Html(html) | Event::InlineHtml(html) => self.push(&html, self.style()),

            Event::SoftBreak | Event::HardBreak => self.push("\n", self.style()),
            Event::Rule => {
                self.flush();
                self.segments
                    .push(Segment::Text(vec![Span::styled("────────", marker())]));
            }
            Event::TaskListMarker(checked) => {
                self.push(if checked { "[x] " } else { "[ ] " }, marker());
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {}
            Tag::Heading { .. } => {
                self.flush();
                self.heading = true;
            }
            Tag::BlockQuote { .. } => {
                self.flush();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                self.flush();
                let declared = match kind {
                    CodeBlockKind::Fenced(info) if !info.trim().is_empty() => {
                        Some(info.to_string())
                    }
                    _ => None,
                };
                self.code = Some((declared, String::new()));
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                let depth = self.lists.len().saturating_sub(1);
                let bullet = match self.lists.last_mut() {
                    Some(Some(number)) => {
                        let bullet = format!("{}. ", number);
                        *number += 1;
                        bullet
                    }
                    _ => "• ".to_string(),
                };
                self.push(&format!("{}{}", "  ".repeat(depth), bullet), marker());
            }
            Tag::Emphasis => self.italic += 1,
            Tag::Strong => self.bold += 1,
            Tag::Strikethrough => self.strikethrough += 1,
            Tag::Link { .. } => self.link += 1,
            Tag::Table(_) | Tag::TableHead | Tag::TableRow => {
                self.flush();
                self.table_cell = 0;
            }
            Tag::TableCell => {
                if self.table_cell > 0 {
                    self.push(" │ ", marker());
                }
                self.table_cell += 1;
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph
            | TagEnd::Item
            | TagEnd::TableHead
            | TagEnd::TableRow
            | TagEnd::HtmlBlock => self.flush(),
            TagEnd::Heading(_) => {
                self.flush();
                self.heading = false;
            }
            TagEnd::BlockQuote { .. } => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
            }
            TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
            TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
            TagEnd::Strikethrough => self.strikethrough = self.strikethrough.saturating_sub(1),
            TagEnd::Link => self.link = self.link.saturating_sub(1),
            _ => {}
        }
    }

    fn style(&self) -> SpanStyle {
        SpanStyle {
            bold: self.bold > 0 || self.heading,
            italic: self.italic > 0 || self.quote_depth > 0,
            strikethrough: self.strikethrough > 0,
            link: self.link > 0,
            heading: self.heading,
            ..SpanStyle::default()
        }
    }

    fn push(&mut self, text: &str, style: SpanStyle) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.spans.last_mut() {
            if last.style.merges_with(&style) {
                last.text.push_str(text);
                return;
            }
        }
        self.spans.push(Span::styled(text, style));
    }

    fn flush(&mut self) {
        if self.spans.is_empty() {
            return;
        }

        let mut spans = std::mem::take(&mut self.spans);
        if self.quote_depth > 0 {
            spans.insert(0, Span::styled("│ ".repeat(self.quote_depth), marker()));
        }
        self.segments.push(Segment::Text(spans));
    }

    fn close_code_block(&mut self) {
        if let Some((declared, source)) = self.code.take() {
            self.segments
                .push(Segment::Code(CodeSegment::new(declared.as_deref(), source)));
        }
    }

    fn finish(mut self) -> RenderedBlock {
        self.close_code_block();
        self.flush();
        RenderedBlock {
            segments: self.segments,
        }
    }
}

fn marker() -> SpanStyle {
    SpanStyle {
        marker: true,
        ..SpanStyle::default()
    }
}
