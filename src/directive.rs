//! Directive syntax recognized in paragraph text.
//!
//! [`scan`] returns every directive kind present in a paragraph, ordered by
//! precedence; the paragraph processor acts on the first one that applies.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::condition::Operator;
use crate::model::{ChartKind, DirectiveKind};

pub const PAGE_BREAK: &str = "{%pagebreak}";

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($re).unwrap())
        }
    };
}

pattern!(conditional_re, r"(?s)\{#if\s+([^}]+)\}(.*?)\{/if\}");
pattern!(table_re, r"\{%\s*table:(\w+)\s*\}");
pattern!(chart_re, r"\{%\s*chart:(bar|line|pie):(\w+)\s*\}");
pattern!(image_re, r"\{%\s*(\w+)(?:\.(\w+))?\s*\}");
pattern!(format_re, r"\{format:(\w+):([\w-]+)\}");
pattern!(loop_re, r"(?s)\{#each\s+(\w+)\s+as\s+(\w+)\}(.*?)\{/each\}");
pattern!(text_re, r"\{([^%#/{}][^{}]*)\}");
pattern!(format_table_re, r"\{format-table:(\w+)?\}");
pattern!(row_condition_re, r"\{if:(\w+)(==|!=|>=|<=|>|<)([^}]+)\}(\w+)\{/if\}");

#[derive(Clone, Debug, PartialEq)]
pub struct ConditionalBlock {
    pub condition: String,
    pub content: String,
    pub span: Range<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Placeholder {
    pub key: String,
    pub span: Range<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormatDirective {
    pub key: String,
    pub style: String,
    pub span: Range<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoopBlock {
    pub array_key: String,
    pub item_name: String,
    pub template: String,
    pub span: Range<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    Table { key: String, span: Range<usize> },
    Chart { kind: ChartKind, key: String, span: Range<usize> },
    Image { key: String, property: Option<String>, span: Range<usize> },
    Format(Vec<FormatDirective>),
    Loop(LoopBlock),
    Text(Vec<Placeholder>),
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Directive::Table { .. } => DirectiveKind::Table,
            Directive::Chart { .. } => DirectiveKind::Chart,
            Directive::Image { .. } => DirectiveKind::Image,
            Directive::Format(_) => DirectiveKind::Format,
            Directive::Loop(_) => DirectiveKind::Loop,
            Directive::Text(_) => DirectiveKind::Text,
        }
    }
}

/// Every `{#if cond}...{/if}` block, left to right.
pub fn conditional_blocks(text: &str) -> Vec<ConditionalBlock> {
    conditional_re()
        .captures_iter(text)
        .map(|caps| ConditionalBlock {
            condition: caps[1].trim().to_string(),
            content: caps[2].to_string(),
            span: caps.get(0).map_or(0..0, |m| m.range()),
        })
        .collect()
}

/// All directives present in `text`, in precedence order.
pub fn scan(text: &str) -> Vec<Directive> {
    let mut found = Vec::new();

    if let Some(caps) = table_re().captures(text) {
        found.push(Directive::Table {
            key: caps[1].to_string(),
            span: caps.get(0).map_or(0..0, |m| m.range()),
        });
    }

    if let Some(caps) = chart_re().captures(text)
        && let Some(kind) = ChartKind::parse(&caps[1])
    {
        found.push(Directive::Chart {
            kind,
            key: caps[2].to_string(),
            span: caps.get(0).map_or(0..0, |m| m.range()),
        });
    }

    if let Some(caps) = image_re()
        .captures_iter(text)
        .find(|caps| !(&caps[1] == "pagebreak" && caps.get(2).is_none()))
    {
        found.push(Directive::Image {
            key: caps[1].to_string(),
            property: caps.get(2).map(|m| m.as_str().to_string()),
            span: caps.get(0).map_or(0..0, |m| m.range()),
        });
    }

    let formats: Vec<FormatDirective> = format_re()
        .captures_iter(text)
        .map(|caps| FormatDirective {
            key: caps[1].to_string(),
            style: caps[2].to_string(),
            span: caps.get(0).map_or(0..0, |m| m.range()),
        })
        .collect();
    if !formats.is_empty() {
        found.push(Directive::Format(formats));
    }

    if let Some(caps) = loop_re().captures(text) {
        found.push(Directive::Loop(LoopBlock {
            array_key: caps[1].to_string(),
            item_name: caps[2].to_string(),
            template: caps[3].to_string(),
            span: caps.get(0).map_or(0..0, |m| m.range()),
        }));
    }

    let placeholders = placeholders(text);
    if !placeholders.is_empty() {
        found.push(Directive::Text(placeholders));
    }

    found
}

/// Plain `{key}` placeholders; keys starting with `%`, `#` or `/` are excluded.
pub fn placeholders(text: &str) -> Vec<Placeholder> {
    text_re()
        .captures_iter(text)
        .map(|caps| Placeholder {
            key: caps[1].trim().to_string(),
            span: caps.get(0).map_or(0..0, |m| m.range()),
        })
        .collect()
}

/// `{item.prop}` references inside a loop template: (prop, span).
pub fn item_references(template: &str, item_name: &str) -> Vec<(String, Range<usize>)> {
    let Ok(re) = Regex::new(&format!(r"\{{{}\.(\w+)\}}", regex::escape(item_name))) else {
        return Vec::new();
    };
    re.captures_iter(template)
        .map(|caps| (caps[1].to_string(), caps.get(0).map_or(0..0, |m| m.range())))
        .collect()
}

pub fn is_page_break(text: &str) -> bool {
    text.trim() == PAGE_BREAK
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormatTable {
    pub key: Option<String>,
    /// The directive is the whole (trimmed) cell content.
    pub sole: bool,
}

pub fn format_table(cell_text: &str) -> Option<FormatTable> {
    let caps = format_table_re().captures(cell_text)?;
    Some(FormatTable {
        key: caps.get(1).map(|m| m.as_str().to_string()),
        sole: &caps[0] == cell_text.trim(),
    })
}

pub fn format_table_span(text: &str) -> Option<Range<usize>> {
    format_table_re().find(text).map(|m| m.range())
}

pub fn row_condition_span(text: &str) -> Option<Range<usize>> {
    row_condition_re().find(text).map(|m| m.range())
}

#[derive(Clone, Debug, PartialEq)]
pub struct RowCondition {
    pub field: String,
    pub op: Operator,
    pub value: String,
    pub style: String,
    pub span: Range<usize>,
}

pub fn row_condition(cell_text: &str) -> Option<RowCondition> {
    let caps = row_condition_re().captures(cell_text)?;
    Some(RowCondition {
        field: caps[1].to_string(),
        op: Operator::parse(&caps[2])?,
        value: caps[3].trim().to_string(),
        style: caps[4].to_string(),
        span: caps.get(0).map_or(0..0, |m| m.range()),
    })
}
