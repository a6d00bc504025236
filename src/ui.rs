use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
};
use unicode_width::UnicodeWidthStr;
use zenith_core::render::{CodeSegment, SpanStyle};
use zenith_core::{Entry, EntryBody, RenderedBlock, Role, Segment};

use crate::app::{App, MAX_INPUT_CHARS};

/// Rows the input box grows to before it scrolls
const MAX_INPUT_ROWS: usize = 5;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let input_rows = app.input.split('\n').count().clamp(1, MAX_INPUT_ROWS) as u16;

    // Main layout: header, transcript, input, footer
    let [header_area, transcript_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(input_rows + 2),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_transcript(app, frame, transcript_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" Zenith ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!("[{}]", app.model), Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = if app.is_sending() {
        (" SENDING ", Style::default().bg(Color::Yellow).fg(Color::Black))
    } else {
        (" READY ", Style::default().bg(Color::Blue).fg(Color::White))
    };

    let footer = Line::from(vec![
        Span::styled(mode_text, mode_style),
        Span::styled(
            " Enter send │ Alt+Enter newline │ Ctrl+L new chat │ PgUp/PgDn scroll │ Esc quit ",
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(
            format!("{} turns", app.controller.conversation().len()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    frame.render_widget(Paragraph::new(footer), area);
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    app.transcript_area = Some(area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Chat ");

    let mut lines: Vec<Line<'static>> = Vec::new();
    for entry in app.controller.transcript().entries() {
        entry_lines(entry, app.animation_frame, &mut lines);
    }

    let inner_width = area.width.saturating_sub(2);
    let inner_height = area.height.saturating_sub(2);
    // Measure with the same wrapping the paragraph renders with
    let total = Paragraph::new(Text::from(lines.clone()))
        .wrap(Wrap { trim: false })
        .line_count(inner_width)
        .min(u16::MAX as usize) as u16;

    app.max_scroll = total.saturating_sub(inner_height);
    app.scroll = if app.follow_tail {
        app.max_scroll
    } else {
        app.scroll.min(app.max_scroll)
    };

    let transcript = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));
    frame.render_widget(transcript, area);

    if app.max_scroll > 0 {
        let mut state = ScrollbarState::new(app.max_scroll as usize).position(app.scroll as usize);
        frame.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight),
            area,
            &mut state,
        );
    }
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let surface = app.controller.input();
    let (title, border_color) = if surface.is_enabled() {
        (
            format!(" Message ({}/{}) ", app.input.chars().count(), MAX_INPUT_CHARS),
            Color::Yellow,
        )
    } else {
        (" Waiting for reply ".to_string(), Color::DarkGray)
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Scroll both ways so the cursor stays visible; columns are display cells
    let inner_width = area.width.saturating_sub(2) as usize;
    let inner_height = area.height.saturating_sub(2) as usize;
    let (row, col) = cursor_position(&app.input, app.cursor);
    let row_offset = keep_visible(row, inner_height);
    let col_offset = keep_visible(col, inner_width);

    let lines: Vec<Line> = app.input.split('\n').map(Line::raw).collect();
    let input = Paragraph::new(lines)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block)
        .scroll((row_offset as u16, col_offset as u16));
    frame.render_widget(input, area);

    if surface.is_focused() {
        let x = (col - col_offset) as u16;
        let y = (row - row_offset) as u16;
        frame.set_cursor_position((area.x + x + 1, area.y + y + 1));
    }
}

/// Row and display column of the cursor, given as a char index into `input`
fn cursor_position(input: &str, cursor: usize) -> (usize, usize) {
    let before: String = input.chars().take(cursor).collect();
    let row = before.matches('\n').count();
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    (row, before[line_start..].width())
}

/// Smallest offset that keeps `pos` inside a window of `size`
fn keep_visible(pos: usize, size: usize) -> usize {
    if size > 0 && pos >= size {
        pos - size + 1
    } else {
        0
    }
}

fn entry_lines(entry: &Entry, animation_frame: u8, lines: &mut Vec<Line<'static>>) {
    let (label, label_color) = match entry.role {
        Role::User => ("You:", Color::Cyan),
        Role::Assistant => ("AI:", Color::Yellow),
    };
    lines.push(Line::from(vec![
        Span::styled(label, Style::default().fg(label_color).add_modifier(Modifier::BOLD)),
        Span::styled(
            format!(" {}", entry.timestamp.format("%H:%M")),
            Style::default().fg(Color::DarkGray),
        ),
    ]));

    match &entry.body {
        EntryBody::Literal(text) => {
            let style = if entry.is_error {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            lines.extend(text.lines().map(|line| Line::styled(line.to_string(), style)));
        }
        EntryBody::Rendered(block) => block_lines(block, lines),
        EntryBody::Pending => {
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }
    }

    lines.push(Line::default());
}

fn block_lines(block: &RenderedBlock, lines: &mut Vec<Line<'static>>) {
    for segment in &block.segments {
        match segment {
            Segment::Text(spans) => {
                let mut current: Vec<Span<'static>> = Vec::new();
                for span in spans {
                    let style = span_style(&span.style);
                    let mut parts = span.text.split('\n');
                    if let Some(first) = parts.next() {
                        if !first.is_empty() {
                            current.push(Span::styled(first.to_string(), style));
                        }
                    }
                    for part in parts {
                        lines.push(Line::from(std::mem::take(&mut current)));
                        if !part.is_empty() {
                            current.push(Span::styled(part.to_string(), style));
                        }
                    }
                }
                lines.push(Line::from(current));
            }
            Segment::Code(code) => code_lines(code, lines),
            Segment::Math(tex) => lines.push(Line::styled(
                format!("    {}", tex),
                Style::default().fg(Color::Magenta).add_modifier(Modifier::ITALIC),
            )),
        }
    }
}

fn code_lines(code: &CodeSegment, lines: &mut Vec<Line<'static>>) {
    let frame_style = Style::default().fg(Color::DarkGray);
    lines.push(Line::styled(format!("┌─ {} ", code.language), frame_style));
    for tokens in &code.lines {
        let mut spans = vec![Span::styled("│ ", frame_style)];
        spans.extend(tokens.iter().map(|token| {
            let [r, g, b] = token.fg;
            Span::styled(token.text.clone(), Style::default().fg(Color::Rgb(r, g, b)))
        }));
        lines.push(Line::from(spans));
    }
    lines.push(Line::styled("└─", frame_style));
}

fn span_style(style: &SpanStyle) -> Style {
    let mut out = Style::default();
    if style.heading {
        out = out.fg(Color::Cyan);
    }
    if style.bold {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.italic {
        out = out.add_modifier(Modifier::ITALIC);
    }
    if style.strikethrough {
        out = out.add_modifier(Modifier::CROSSED_OUT);
    }
    if style.link {
        out = out.fg(Color::Blue).add_modifier(Modifier::UNDERLINED);
    }
    if style.code {
        out = out.fg(Color::Green);
    }
    if style.math {
        out = out.fg(Color::Magenta).add_modifier(Modifier::ITALIC);
    }
    if style.marker {
        out = out.fg(Color::DarkGray);
    }
    out
}
