use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use serde_json::Value;

use crate::directive;
use crate::error::Error;
use crate::image::{HttpFetcher, ImageFetcher};
use crate::model::{
    DirectiveKind, GenerateOptions, Generated, GenerationReport, Outcome, WatermarkOptions,
};
use crate::opc::{CONTENT_TYPES_PART, ContentTypes, Relationships, rels_path_for};
use crate::package::{DOCUMENT_PART, Package};
use crate::paragraph::{self, Counters, PartContext, joined_text, text_nodes};
use crate::table;
use crate::xml::{NodeId, QName, XmlTree, escape};

pub const WML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub const WPD_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
pub const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
pub const PIC_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";
pub const C_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/chart";
pub const WPS_NS: &str = "http://schemas.microsoft.com/office/word/2010/wordprocessingShape";

const WATERMARK_ID_BASE: usize = 3000;

fn wml(local: &str) -> QName {
    QName::new(WML_NS, "w", local)
}

fn header_footer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^word/(header|footer)\d+\.xml$").unwrap())
}

/// Fills DOCX templates. Holds only the image source; every call to
/// [`Engine::generate`] gets fresh counters and manifests.
pub struct Engine<F: ImageFetcher = HttpFetcher> {
    fetcher: F,
}

impl Engine<HttpFetcher> {
    pub fn from_env() -> Result<Self, Error> {
        Ok(Engine { fetcher: HttpFetcher::from_env()? })
    }
}

impl<F: ImageFetcher> Engine<F> {
    pub fn new(fetcher: F) -> Self {
        Engine { fetcher }
    }

    /// Fill `template` with `data`. Directive failures end up in the report;
    /// only package-level problems (not a zip, no main document part,
    /// malformed XML) are errors.
    pub fn generate(
        &self,
        template: &[u8],
        data: &Value,
        options: &GenerateOptions,
    ) -> Result<Generated, Error> {
        let start = Instant::now();
        let mut package = Package::from_bytes(template)?;
        let mut document = XmlTree::parse(&package.part_text(DOCUMENT_PART)?)?;
        let mut content_types = match package.part_text(CONTENT_TYPES_PART) {
            Ok(xml) => ContentTypes::parse(&xml)?,
            Err(Error::MissingPart(_)) => ContentTypes::default(),
            Err(e) => return Err(e),
        };
        let content_types_before = content_types.to_xml();

        let mut run = Generation {
            data,
            fetcher: &self.fetcher,
            package: &mut package,
            content_types: &mut content_types,
            counters: Counters::default(),
            report: GenerationReport::default(),
        };

        run.headers_and_footers(options)?;

        let mut rels = run.load_rels(DOCUMENT_PART)?;
        let rels_before = rels.len();
        if let Some(root) = document.root_element() {
            run.page_breaks(&mut document, root)?;
            let mut ctx = run.context(DOCUMENT_PART, &mut rels);
            process_part(&mut ctx, &mut document, root);
        }
        if rels.len() != rels_before {
            run.package
                .set_part(&rels_path_for(DOCUMENT_PART), rels.to_xml().into_bytes());
        }

        let report = run.report;
        package.set_part(DOCUMENT_PART, document.to_xml().into_bytes());
        let content_types_after = content_types.to_xml();
        if content_types_after != content_types_before {
            package.set_part(CONTENT_TYPES_PART, content_types_after.into_bytes());
        }

        let bytes = package.to_bytes()?;
        let file_name = options.resolved_file_name().to_string();
        log::info!(
            "Generated {file_name} in {:.1?}: {} directives applied, {} failed",
            start.elapsed(),
            report.applied().count(),
            report.failures().count()
        );
        Ok(Generated { bytes, file_name, report })
    }

    /// Best-effort generation to `out_dir`. Failures are logged and yield
    /// `None`; nothing is written unless the whole package was produced.
    pub fn generate_docx(
        &self,
        template: &Path,
        data: &Value,
        options: &GenerateOptions,
        out_dir: &Path,
    ) -> Option<PathBuf> {
        let result = std::fs::read(template)
            .map_err(Error::from)
            .and_then(|bytes| self.generate(&bytes, data, options))
            .and_then(|generated| {
                let path = out_dir.join(&generated.file_name);
                std::fs::create_dir_all(out_dir)?;
                std::fs::write(&path, &generated.bytes)?;
                Ok(path)
            });
        match result {
            Ok(path) => Some(path),
            Err(e) => {
                log::error!("Document generation from {} failed: {e}", template.display());
                None
            }
        }
    }
}

/// Per-call state shared by all parts of one package.
struct Generation<'a> {
    data: &'a Value,
    fetcher: &'a dyn ImageFetcher,
    package: &'a mut Package,
    content_types: &'a mut ContentTypes,
    counters: Counters,
    report: GenerationReport,
}

impl Generation<'_> {
    fn context<'b>(&'b mut self, part: &'b str, rels: &'b mut Relationships) -> PartContext<'b> {
        PartContext {
            part,
            data: self.data,
            fetcher: self.fetcher,
            package: &mut *self.package,
            content_types: &mut *self.content_types,
            rels,
            counters: &mut self.counters,
            report: &mut self.report,
        }
    }

    fn load_rels(&self, part: &str) -> Result<Relationships, Error> {
        let path = rels_path_for(part);
        match self.package.part_text(&path) {
            Ok(xml) => Relationships::parse(&xml),
            Err(Error::MissingPart(_)) => {
                log::debug!("{path} not found, starting an empty relationship manifest");
                Ok(Relationships::default())
            }
            Err(e) => Err(e),
        }
    }

    /// A paragraph whose text is exactly `{%pagebreak}` becomes a page break.
    fn page_breaks(&mut self, tree: &mut XmlTree, root: NodeId) -> Result<(), Error> {
        for p in tree.descendants(root, WML_NS, "p") {
            let text = joined_text(tree, &text_nodes(tree, p));
            if !directive::is_page_break(&text) {
                continue;
            }
            let page_break = tree.import_fragment(&format!(
                r#"<w:p xmlns:w="{WML_NS}"><w:r><w:br w:type="page"/></w:r></w:p>"#
            ))?;
            tree.replace(p, page_break);
            self.report
                .record(DOCUMENT_PART, DirectiveKind::PageBreak, "pagebreak", Outcome::Applied);
        }
        Ok(())
    }

    fn headers_and_footers(&mut self, options: &GenerateOptions) -> Result<(), Error> {
        if options.header.is_none() && options.footer.is_none() && options.watermark.is_none() {
            return Ok(());
        }
        let parts: Vec<String> = self
            .package
            .part_names()
            .filter(|name| header_footer_re().is_match(name))
            .map(str::to_string)
            .collect();

        let has_headers = parts.iter().any(|p| p.starts_with("word/header"));
        let has_footers = parts.iter().any(|p| p.starts_with("word/footer"));
        let missing = [
            (DirectiveKind::Header, options.header.is_some() && !has_headers),
            (DirectiveKind::Footer, options.footer.is_some() && !has_footers),
            (DirectiveKind::Watermark, options.watermark.is_some() && !has_headers),
        ];
        for (kind, is_missing) in missing {
            if is_missing {
                self.report.record(
                    DOCUMENT_PART,
                    kind,
                    &kind.to_string(),
                    Outcome::Skipped(format!("template has no {kind} part")),
                );
            }
        }

        for part in &parts {
            let is_header = part.starts_with("word/header");
            let (kind, text) = if is_header {
                (DirectiveKind::Header, options.header.as_deref())
            } else {
                (DirectiveKind::Footer, options.footer.as_deref())
            };
            let watermark = options.watermark.as_ref().filter(|_| is_header);
            if text.is_none() && watermark.is_none() {
                continue;
            }

            let mut tree = XmlTree::parse(&self.package.part_text(part)?)?;
            let Some(root) = tree.root_element() else {
                continue;
            };
            let mut rels = self.load_rels(part)?;
            let rels_before = rels.len();

            if let Some(text) = text {
                write_part_text(&mut tree, root, text);
                let mut ctx = self.context(part, &mut rels);
                process_part(&mut ctx, &mut tree, root);
                ctx.record(kind, part, Outcome::Applied);
            }
            if let Some(watermark) = watermark {
                self.counters.watermark += 1;
                let doc_pr_id = WATERMARK_ID_BASE + self.counters.watermark;
                let mark = tree.import_fragment(&watermark_paragraph(watermark, doc_pr_id))?;
                tree.insert(root, 0, mark);
                self.report
                    .record(part, DirectiveKind::Watermark, &watermark.text, Outcome::Applied);
            }

            self.package.set_part(part, tree.to_xml().into_bytes());
            if rels.len() != rels_before {
                self.package
                    .set_part(&rels_path_for(part), rels.to_xml().into_bytes());
            }
        }
        Ok(())
    }
}

/// Put the header/footer option text into the part as a paragraph styled
/// like the part's first text paragraph, which it replaces. Directives in
/// the text are applied later, together with the rest of the part.
fn write_part_text(tree: &mut XmlTree, root: NodeId, text: &str) {
    let template = tree
        .descendants(root, WML_NS, "p")
        .into_iter()
        .find(|&p| !text_nodes(tree, p).is_empty());

    let paragraph = tree.new_element(wml("p"));
    let run = tree.new_element(wml("r"));
    if let Some(template) = template {
        if let Some(p_pr) = tree.child(template, WML_NS, "pPr") {
            let copy = tree.deep_clone(p_pr);
            tree.append(paragraph, copy);
        }
        let first_text = text_nodes(tree, template)[0];
        if let Some(r_pr) = tree
            .parent(first_text)
            .and_then(|r| tree.child(r, WML_NS, "rPr"))
        {
            let copy = tree.deep_clone(r_pr);
            tree.append(run, copy);
        }
    }
    let t = tree.new_element(wml("t"));
    tree.append(run, t);
    tree.append(paragraph, run);
    paragraph::write_text(tree, &[t], text);

    match template {
        Some(template) => tree.replace(template, paragraph),
        None => {
            let container = tree.child(root, WML_NS, "sdtContent").unwrap_or(root);
            tree.append(container, paragraph);
        }
    }
}

/// Body paragraphs outside tables first, then every table: row formatting,
/// then the table's own cell paragraphs.
fn process_part(ctx: &mut PartContext, tree: &mut XmlTree, root: NodeId) {
    let tables = tree.descendants(root, WML_NS, "tbl");
    let paragraphs: Vec<NodeId> = tree
        .descendants(root, WML_NS, "p")
        .into_iter()
        .filter(|&p| tree.nearest_ancestor(p, WML_NS, "tbl").is_none())
        .collect();
    for p in paragraphs {
        paragraph::process_paragraph(ctx, tree, p);
    }

    for table in tables {
        if !tree.is_attached(table) {
            continue;
        }
        table::apply_table_formatting(tree, table, ctx.data, ctx.part, ctx.report);
        let cell_paragraphs: Vec<NodeId> = tree
            .descendants(table, WML_NS, "p")
            .into_iter()
            .filter(|&p| tree.nearest_ancestor(p, WML_NS, "tbl") == Some(table))
            .collect();
        for p in cell_paragraphs {
            paragraph::process_paragraph(ctx, tree, p);
        }
    }
}

fn watermark_paragraph(options: &WatermarkOptions, doc_pr_id: usize) -> String {
    let text = escape(&options.text);
    let color = escape(options.color.trim_start_matches('#'));
    let rotation = u64::from(options.angle % 360) * 60000;
    let size = options.font_size * 2;
    format!(
        r#"<w:p xmlns:w="{WML_NS}" xmlns:wp="{WPD_NS}" xmlns:a="{A_NS}" xmlns:wps="{WPS_NS}"><w:r><w:rPr><w:noProof/></w:rPr><w:drawing><wp:anchor distT="0" distB="0" distL="0" distR="0" simplePos="0" relativeHeight="251658240" behindDoc="1" locked="0" layoutInCell="1" allowOverlap="1"><wp:simplePos x="0" y="0"/><wp:positionH relativeFrom="margin"><wp:align>center</wp:align></wp:positionH><wp:positionV relativeFrom="margin"><wp:align>center</wp:align></wp:positionV><wp:extent cx="5400000" cy="3600000"/><wp:effectExtent l="0" t="0" r="0" b="0"/><wp:wrapNone/><wp:docPr id="{doc_pr_id}" name="Watermark {doc_pr_id}" descr="Watermark"/><wp:cNvGraphicFramePr/><a:graphic><a:graphicData uri="http://schemas.microsoft.com/office/word/2010/wordprocessingShape"><wps:wsp><wps:cNvSpPr txBox="1"/><wps:spPr><a:xfrm rot="{rotation}"><a:off x="0" y="0"/><a:ext cx="5400000" cy="3600000"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom><a:noFill/><a:ln><a:noFill/></a:ln></wps:spPr><wps:txbx><w:txbxContent><w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:rPr><w:color w:val="{color}"/><w:sz w:val="{size}"/><w:szCs w:val="{size}"/></w:rPr><w:t xml:space="preserve">{text}</w:t></w:r></w:p></w:txbxContent></wps:txbx><wps:bodyPr rot="0" vert="horz" wrap="none" anchor="ctr"><a:noAutofit/></wps:bodyPr></wps:wsp></a:graphicData></a:graphic></wp:anchor></w:drawing></w:r></w:p>"#
    )
}
