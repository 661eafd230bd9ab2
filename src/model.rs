use std::fmt;

pub const DEFAULT_FILE_NAME: &str = "generated-document.docx";

/// Per-call settings for [`crate::Engine::generate`].
#[derive(Clone, Debug, Default)]
pub struct GenerateOptions {
    /// Output file name, `generated-document.docx` when unset.
    pub file_name: Option<String>,
    /// Text (may contain directives) written into every header part.
    pub header: Option<String>,
    /// Text (may contain directives) written into every footer part.
    pub footer: Option<String>,
    pub watermark: Option<WatermarkOptions>,
}

impl GenerateOptions {
    pub fn resolved_file_name(&self) -> &str {
        self.file_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_FILE_NAME)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WatermarkOptions {
    pub text: String,
    /// Hex RGB without `#`.
    pub color: String,
    /// Points.
    pub font_size: u32,
    /// Degrees, clockwise.
    pub angle: u32,
}

impl WatermarkOptions {
    pub fn new(text: impl Into<String>) -> Self {
        WatermarkOptions {
            text: text.into(),
            color: "CCCCCC".to_string(),
            font_size: 60,
            angle: 45,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Text,
    Image,
    Table,
    Chart,
    Conditional,
    Loop,
    Format,
    PageBreak,
    FormatTable,
    RowCondition,
    Header,
    Footer,
    Watermark,
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirectiveKind::Text => "text",
            DirectiveKind::Image => "image",
            DirectiveKind::Table => "table",
            DirectiveKind::Chart => "chart",
            DirectiveKind::Conditional => "conditional",
            DirectiveKind::Loop => "loop",
            DirectiveKind::Format => "format",
            DirectiveKind::PageBreak => "pagebreak",
            DirectiveKind::FormatTable => "format-table",
            DirectiveKind::RowCondition => "row-condition",
            DirectiveKind::Header => "header",
            DirectiveKind::Footer => "footer",
            DirectiveKind::Watermark => "watermark",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
}

impl ChartKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bar" => Some(ChartKind::Bar),
            "line" => Some(ChartKind::Line),
            "pie" => Some(ChartKind::Pie),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Skipped(String),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportEntry {
    /// Package part the directive was found in, e.g. `word/document.xml`.
    pub part: String,
    pub kind: DirectiveKind,
    pub key: String,
    pub outcome: Outcome,
}

/// What happened to every directive during one generation run.
#[derive(Clone, Debug, Default)]
pub struct GenerationReport {
    pub entries: Vec<ReportEntry>,
}

impl GenerationReport {
    pub(crate) fn record(&mut self, part: &str, kind: DirectiveKind, key: &str, outcome: Outcome) {
        match &outcome {
            Outcome::Failed(reason) => log::warn!("{kind} directive '{key}' in {part} failed: {reason}"),
            Outcome::Skipped(reason) => log::debug!("{kind} directive '{key}' in {part} skipped: {reason}"),
            Outcome::Applied => log::debug!("{kind} directive '{key}' in {part} applied"),
        }
        self.entries.push(ReportEntry {
            part: part.to_string(),
            kind,
            key: key.to_string(),
            outcome,
        });
    }

    pub fn applied(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.outcome == Outcome::Applied)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Failed(_)))
    }

    pub fn count(&self, kind: DirectiveKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}

/// A finished package ready to be saved.
#[derive(Debug)]
pub struct Generated {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub report: GenerationReport,
}
