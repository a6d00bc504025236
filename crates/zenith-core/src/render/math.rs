use std::ops::Range;
use std::sync::LazyLock;

use pulldown_cmark::{Event, Options, Parser, Tag};
use regex::{Captures, Regex};

use super::markdown;

static DISPLAY_DELIMITERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\\\[(.+?)\\\]").expect("valid display math pattern"));
static INLINE_DELIMITERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\\\((.+?)\\\)").expect("valid inline math pattern"));

static FRACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\frac\{([^{}]*)\}\{([^{}]*)\}").expect("valid fraction pattern"));
static COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\([A-Za-z]+)").expect("valid command pattern"));
static SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\^_])(?:\{([^{}]*)\}|([0-9A-Za-z+\-=()]))").expect("valid script pattern"));

/// Rewrite `\( … \)` to `$…$` and `\[ … \]` to `$$…$$` so the Markdown parser
/// sees math markers instead of escaped brackets. Dollar signs already in the
/// prose are escaped so they stay literal. Code spans and code blocks are
/// copied through untouched.
pub fn normalize_math(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prose_start = 0;

    for range in code_ranges(text) {
        if range.start < prose_start {
            continue;
        }
        out.push_str(&rewrite_prose(&text[prose_start..range.start]));
        out.push_str(&text[range.clone()]);
        prose_start = range.end;
    }

    out.push_str(&rewrite_prose(&text[prose_start..]));
    out
}

/// Byte ranges of inline code and code blocks, in document order
fn code_ranges(text: &str) -> Vec<Range<usize>> {
    let mut options = markdown::options();
    options.remove(Options::ENABLE_MATH);

    Parser::new_ext(text, options)
        .into_offset_iter()
        .filter_map(|(event, range)| match event {
            Event::Code(_) | Event::Start(Tag::CodeBlock(_)) => Some(range),
            _ => None,
        })
        .collect()
}

fn rewrite_prose(text: &str) -> String {
    let escaped = escape_dollars(text);
    let display = DISPLAY_DELIMITERS.replace_all(&escaped, |caps: &Captures| {
        format!("$${}$$", caps[1].trim())
    });
    INLINE_DELIMITERS
        .replace_all(&display, |caps: &Captures| format!("${}$", caps[1].trim()))
        .into_owned()
}

/// `$` becomes `\$`; existing backslash escapes are kept as they are
fn escape_dollars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '$' => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out
}

/// Optional capability that turns TeX source into displayable text
pub trait MathTypesetter: Send + Sync {
    fn typeset(&self, tex: &str, display: bool) -> String;
}

/// Best-effort TeX to Unicode conversion for terminals
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeTypesetter;

impl MathTypesetter for UnicodeTypesetter {
    fn typeset(&self, tex: &str, _display: bool) -> String {
        let text = FRACTION.replace_all(tex, |caps: &Captures| {
            format!("{}/{}", group(&caps[1]), group(&caps[2]))
        });
        let text = COMMAND.replace_all(&text, |caps: &Captures| {
            symbol(&caps[1])
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        });
        let text = SCRIPT.replace_all(&text, |caps: &Captures| {
            let superscript = &caps[1] == "^";
            let body = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            convert_script(body, superscript)
                .unwrap_or_else(|| format!("{}({})", &caps[1], body))
        });
        text.into_owned()
    }
}

fn group(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > 1 && !text.chars().all(|c| c.is_ascii_alphanumeric()) {
        format!("({})", text)
    } else {
        text.to_string()
    }
}

fn convert_script(body: &str, superscript: bool) -> Option<String> {
    body.chars()
        .map(|c| {
            if superscript {
                superscript_char(c)
            } else {
                subscript_char(c)
            }
        })
        .collect()
}

fn superscript_char(c: char) -> Option<char> {
    Some(match c {
        '0' => '⁰',
        '1' => '¹',
        '2' => '²',
        '3' => '³',
        '4' => '⁴',
        '5' => '⁵',
        '6' => '⁶',
        '7' => '⁷',
        '8' => '⁸',
        '9' => '⁹',
        '+' => '⁺',
        '-' => '⁻',
        '=' => '⁼',
        '(' => '⁽',
        ')' => '⁾',
        'n' => 'ⁿ',
        'i' => 'ⁱ',
        _ => return None,
    })
}

fn subscript_char(c: char) -> Option<char> {
    Some(match c {
        '0' => '₀',
        '1' => '₁',
        '2' => '₂',
        '3' => '₃',
        '4' => '₄',
        '5' => '₅',
        '6' => '₆',
        '7' => '₇',
        '8' => '₈',
        '9' => '₉',
        '+' => '₊',
        '-' => '₋',
        '=' => '₌',
        '(' => '₍',
        ')' => '₎',
        'i' => 'ᵢ',
        'j' => 'ⱼ',
        'n' => 'ₙ',
        'x' => 'ₓ',
        _ => return None,
    })
}

fn symbol(command: &str) -> Option<&'static str> {
    Some(match command {
        "alpha" => "α",
        "beta" => "β",
        "gamma" => "γ",
        "delta" => "δ",
        "epsilon" => "ε",
        "theta" => "θ",
        "lambda" => "λ",
        "mu" => "μ",
        "pi" => "π",
        "rho" => "ρ",
        "sigma" => "σ",
        "tau" => "τ",
        "phi" => "φ",
        "omega" => "ω",
        "Gamma" => "Γ",
        "Delta" => "Δ",
        "Sigma" => "Σ",
        "Omega" => "Ω",
        "times" => "×",
        "cdot" => "·",
        "div" => "÷",
        "pm" => "±",
        "leq" | "le" => "≤",
        "geq" | "ge" => "≥",
        "neq" | "ne" => "≠",
        "approx" => "≈",
        "infty" => "∞",
        "sum" => "∑",
        "prod" => "∏",
        "int" => "∫",
        "sqrt" => "√",
        "partial" => "∂",
        "nabla" => "∇",
        "to" | "rightarrow" => "→",
        "leftarrow" => "←",
        "Rightarrow" => "⇒",
        "in" => "∈",
        "forall" => "∀",
        "exists" => "∃",
        "left" | "right" => "",
        _ => return None,
    })
}
