//! Applies the directive found in one paragraph's text to the tree.

use serde_json::Value;

use crate::chart;
use crate::condition;
use crate::directive::{self, Directive, FormatDirective, LoopBlock, Placeholder};
use crate::docx::WML_NS;
use crate::error::Error;
use crate::image::{self, ImageFetcher};
use crate::model::{DirectiveKind, GenerationReport, Outcome};
use crate::opc::{ContentTypes, Relationships};
use crate::package::Package;
use crate::resolve::{resolve, stringify};
use crate::table;
use crate::xml::{NodeId, QName, XML_NS, XmlTree};

/// Image, chart and watermark numbering for one generation run.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub image: usize,
    pub chart: usize,
    pub watermark: usize,
}

/// Everything a directive handler may touch while one part is processed.
pub(crate) struct PartContext<'a> {
    pub part: &'a str,
    pub data: &'a Value,
    pub fetcher: &'a dyn ImageFetcher,
    pub package: &'a mut Package,
    pub content_types: &'a mut ContentTypes,
    pub rels: &'a mut Relationships,
    pub counters: &'a mut Counters,
    pub report: &'a mut GenerationReport,
}

impl PartContext<'_> {
    pub fn record(&mut self, kind: DirectiveKind, key: &str, outcome: Outcome) {
        self.report.record(self.part, kind, key, outcome);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    Deleted,
    Replaced,
    Rewritten,
    Unchanged,
}

/// `w:t` nodes belonging to `paragraph` itself, not to nested paragraphs
/// (text boxes, nested tables).
pub(crate) fn text_nodes(tree: &XmlTree, paragraph: NodeId) -> Vec<NodeId> {
    tree.descendants(paragraph, WML_NS, "t")
        .into_iter()
        .filter(|&t| tree.nearest_ancestor(t, WML_NS, "p") == Some(paragraph))
        .collect()
}

pub(crate) fn joined_text(tree: &XmlTree, texts: &[NodeId]) -> String {
    texts.iter().map(|&t| tree.text(t)).collect()
}

/// Put `text` into the first text node and empty the others.
pub(crate) fn write_text(tree: &mut XmlTree, texts: &[NodeId], text: &str) {
    let Some((&first, rest)) = texts.split_first() else {
        return;
    };
    tree.set_text(first, text);
    tree.set_attribute(first, QName::new(XML_NS, "xml", "space"), "preserve");
    for &t in rest {
        tree.set_text(t, "");
    }
}

/// Remove the first `find` match from each paragraph under `scope`.
pub(crate) fn strip_text(
    tree: &mut XmlTree,
    scope: NodeId,
    find: fn(&str) -> Option<std::ops::Range<usize>>,
) {
    for paragraph in tree.descendants(scope, WML_NS, "p") {
        let texts = text_nodes(tree, paragraph);
        let mut text = joined_text(tree, &texts);
        if let Some(span) = find(&text) {
            text.replace_range(span, "");
            write_text(tree, &texts, &text);
        }
    }
}

/// A table cell must end with a paragraph; give `cell` an empty one if it
/// no longer does.
fn close_cell(tree: &mut XmlTree, cell: NodeId) {
    if !tree.is(cell, WML_NS, "tc") {
        return;
    }
    let last = tree
        .children(cell)
        .iter()
        .rev()
        .copied()
        .find(|&c| tree.element(c).is_some());
    if last.is_none_or(|c| !tree.is(c, WML_NS, "p")) {
        let p = tree.new_element(QName::new(WML_NS, "w", "p"));
        tree.append(cell, p);
    }
}

fn delete_paragraph(tree: &mut XmlTree, paragraph: NodeId) -> Transition {
    let parent = tree.parent(paragraph);
    tree.detach(paragraph);
    if let Some(parent) = parent {
        close_cell(tree, parent);
    }
    Transition::Deleted
}

/// Drop everything but the paragraph properties and append `run`.
fn replace_content(tree: &mut XmlTree, paragraph: NodeId, run: NodeId) {
    for child in tree.children(paragraph).to_vec() {
        if !tree.is(child, WML_NS, "pPr") {
            tree.detach(child);
        }
    }
    tree.append(paragraph, run);
}

pub(crate) fn process_paragraph(
    ctx: &mut PartContext,
    tree: &mut XmlTree,
    paragraph: NodeId,
) -> Transition {
    if !tree.is_attached(paragraph) {
        return Transition::Unchanged;
    }
    let texts = text_nodes(tree, paragraph);
    if texts.is_empty() {
        return Transition::Unchanged;
    }
    let mut text = joined_text(tree, &texts);

    let mut changed = false;
    while let Some(block) = directive::conditional_blocks(&text).into_iter().next() {
        match condition::evaluate(&block.condition, ctx.data) {
            Ok(true) => {
                ctx.record(DirectiveKind::Conditional, &block.condition, Outcome::Applied);
                text.replace_range(block.span, &block.content);
                changed = true;
            }
            Ok(false) => {
                ctx.record(DirectiveKind::Conditional, &block.condition, Outcome::Applied);
                return delete_paragraph(tree, paragraph);
            }
            Err(e) => {
                ctx.record(
                    DirectiveKind::Conditional,
                    &block.condition,
                    Outcome::Failed(e.to_string()),
                );
                return delete_paragraph(tree, paragraph);
            }
        }
    }

    let unchanged = |tree: &mut XmlTree, text: &str| {
        if changed {
            write_text(tree, &texts, text);
            Transition::Rewritten
        } else {
            Transition::Unchanged
        }
    };

    for found in directive::scan(&text) {
        match found {
            Directive::Table { key, .. } => {
                return match insert_table(ctx, tree, paragraph, &key) {
                    Some(transition) => transition,
                    None => unchanged(tree, &text),
                };
            }
            Directive::Chart { kind, key, .. } => {
                let Some(run_xml) = chart::embed_chart(ctx, kind, &key) else {
                    return unchanged(tree, &text);
                };
                return match tree.import_fragment(&run_xml) {
                    Ok(run) => {
                        replace_content(tree, paragraph, run);
                        Transition::Replaced
                    }
                    Err(e) => {
                        ctx.record(DirectiveKind::Chart, &key, Outcome::Failed(e.to_string()));
                        unchanged(tree, &text)
                    }
                };
            }
            Directive::Image { key, property, .. } => {
                return match insert_image(ctx, tree, paragraph, &key, property.as_deref()) {
                    Some(transition) => transition,
                    None => unchanged(tree, &text),
                };
            }
            Directive::Format(formats) => {
                let output = apply_formats(ctx, &text, &formats);
                write_text(tree, &texts, &output);
                return Transition::Rewritten;
            }
            Directive::Loop(block) => {
                if let Some(output) = expand_loop(ctx, &text, &block) {
                    write_text(tree, &texts, &output);
                    return Transition::Rewritten;
                }
            }
            Directive::Text(placeholders) => {
                let output = substitute(ctx, &text, &placeholders);
                write_text(tree, &texts, &output);
                return Transition::Rewritten;
            }
        }
    }

    unchanged(tree, &text)
}

fn insert_table(
    ctx: &mut PartContext,
    tree: &mut XmlTree,
    paragraph: NodeId,
    key: &str,
) -> Option<Transition> {
    let Some(rows) = resolve(key, ctx.data).as_array() else {
        ctx.record(DirectiveKind::Table, key, Outcome::Skipped("not an array".into()));
        return None;
    };
    let built = table::generate_table(rows).and_then(|xml| tree.import_fragment(&xml));
    match built {
        Ok(tbl) => {
            tree.replace(paragraph, tbl);
            if let Some(parent) = tree.parent(tbl) {
                close_cell(tree, parent);
            }
            ctx.record(DirectiveKind::Table, key, Outcome::Applied);
            Some(Transition::Replaced)
        }
        Err(e) => {
            ctx.record(DirectiveKind::Table, key, Outcome::Failed(e.to_string()));
            None
        }
    }
}

fn insert_image(
    ctx: &mut PartContext,
    tree: &mut XmlTree,
    paragraph: NodeId,
    key: &str,
    property: Option<&str>,
) -> Option<Transition> {
    let Some(url) = image::image_url(key, ctx.data) else {
        ctx.record(DirectiveKind::Image, key, Outcome::Skipped("no image URL".into()));
        return None;
    };
    let bytes = match ctx.fetcher.fetch(&url) {
        Ok(bytes) if bytes.is_empty() => {
            let e = Error::Fetch(format!("{url}: empty response body"));
            ctx.record(DirectiveKind::Image, key, Outcome::Failed(e.to_string()));
            return None;
        }
        Ok(bytes) => bytes,
        Err(e) => {
            ctx.record(DirectiveKind::Image, key, Outcome::Failed(e.to_string()));
            return None;
        }
    };

    ctx.counters.image += 1;
    let size = image::image_size(key, property, ctx.data);
    let embedded = image::embed(
        ctx.package,
        ctx.content_types,
        ctx.rels,
        ctx.counters.image,
        &url,
        bytes,
        size,
    );
    match tree.import_fragment(&embedded.run_xml) {
        Ok(run) => {
            replace_content(tree, paragraph, run);
            log::debug!("Embedded {url} as {} ({})", embedded.part_name, embedded.rel_id);
            ctx.record(DirectiveKind::Image, key, Outcome::Applied);
            Some(Transition::Replaced)
        }
        Err(e) => {
            ctx.record(DirectiveKind::Image, key, Outcome::Failed(e.to_string()));
            None
        }
    }
}

/// The style tag is kept for run-level formatting; the text is the value's
/// plain stringification whatever the style.
fn apply_formats(ctx: &mut PartContext, text: &str, formats: &[FormatDirective]) -> String {
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for format in formats {
        output.push_str(&text[last..format.span.start]);
        output.push_str(&stringify(resolve(&format.key, ctx.data)));
        last = format.span.end;
        log::debug!("{{format:{}:{}}} written as plain text", format.key, format.style);
        ctx.record(DirectiveKind::Format, &format.key, Outcome::Applied);
    }
    output.push_str(&text[last..]);
    output
}

/// `None` when the array is missing or empty, so lower-precedence rules run.
fn expand_loop(ctx: &mut PartContext, text: &str, block: &LoopBlock) -> Option<String> {
    let items = match resolve(&block.array_key, ctx.data).as_array() {
        Some(items) if !items.is_empty() => items,
        _ => {
            ctx.record(
                DirectiveKind::Loop,
                &block.array_key,
                Outcome::Skipped("missing or empty array".into()),
            );
            return None;
        }
    };

    let references = directive::item_references(&block.template, &block.item_name);
    let mut rendered = String::new();
    for item in items {
        let mut last = 0;
        for (prop, span) in &references {
            rendered.push_str(&block.template[last..span.start]);
            rendered.push_str(&item.get(prop).map(stringify).unwrap_or_default());
            last = span.end;
        }
        rendered.push_str(&block.template[last..]);
    }
    ctx.record(DirectiveKind::Loop, &block.array_key, Outcome::Applied);

    Some(format!(
        "{}{rendered}{}",
        &text[..block.span.start],
        &text[block.span.end..]
    ))
}

fn substitute(ctx: &mut PartContext, text: &str, placeholders: &[Placeholder]) -> String {
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for placeholder in placeholders {
        output.push_str(&text[last..placeholder.span.start]);
        let value = stringify(resolve(&placeholder.key, ctx.data));
        let outcome = if value.is_empty() {
            Outcome::Skipped("no value".into())
        } else {
            Outcome::Applied
        };
        output.push_str(&value);
        last = placeholder.span.end;
        ctx.record(DirectiveKind::Text, &placeholder.key, outcome);
    }
    output.push_str(&text[last..]);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn no_fetch(_: &str) -> Result<Vec<u8>, Error> {
        Err(Error::Fetch("offline".into()))
    }

    struct Harness {
        package: Package,
        content_types: ContentTypes,
        rels: Relationships,
        counters: Counters,
        report: GenerationReport,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                package: Package::blank(),
                content_types: ContentTypes::default(),
                rels: Relationships::default(),
                counters: Counters::default(),
                report: GenerationReport::default(),
            }
        }

        /// Run the processor over the single paragraph `<w:p>{runs}</w:p>`.
        fn run(&mut self, runs: &str, data: &Value) -> (Transition, XmlTree, NodeId) {
            let xml = format!(r#"<w:body xmlns:w="{WML_NS}"><w:p>{runs}</w:p></w:body>"#);
            let mut tree = XmlTree::parse(&xml).unwrap();
            let body = tree.root_element().unwrap();
            let paragraph = tree.child(body, WML_NS, "p").unwrap();
            let mut ctx = PartContext {
                part: "word/document.xml",
                data,
                fetcher: &no_fetch,
                package: &mut self.package,
                content_types: &mut self.content_types,
                rels: &mut self.rels,
                counters: &mut self.counters,
                report: &mut self.report,
            };
            let transition = process_paragraph(&mut ctx, &mut tree, paragraph);
            (transition, tree, body)
        }
    }

    fn body_text(tree: &XmlTree, body: NodeId) -> String {
        tree.text(body)
    }

    #[test]
    fn split_runs_are_flattened_into_first_text_node() {
        let mut h = Harness::new();
        let data = json!({"invoice": {"number": "INV-1"}});
        let (transition, tree, body) = h.run(
            "<w:r><w:t>No. {invoice.</w:t></w:r><w:r><w:t>number}</w:t></w:r>",
            &data,
        );
        assert_eq!(transition, Transition::Rewritten);
        let texts = tree.descendants(body, WML_NS, "t");
        assert_eq!(tree.text(texts[0]), "No. INV-1");
        assert_eq!(tree.text(texts[1]), "");
        assert_eq!(tree.attribute(texts[0], Some(XML_NS), "space"), Some("preserve"));
    }

    #[test]
    fn substitution_is_idempotent() {
        let mut h = Harness::new();
        let data = json!({"name": "Ada"});
        let (_, tree, body) = h.run("<w:r><w:t>Hi {name}</w:t></w:r>", &data);
        let once = body_text(&tree, body);
        let (transition, tree, body) = h.run(&format!("<w:r><w:t>{once}</w:t></w:r>"), &data);
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(body_text(&tree, body), "Hi Ada");
    }

    #[test]
    fn false_condition_deletes_paragraph() {
        let mut h = Harness::new();
        let (transition, tree, body) =
            h.run("<w:r><w:t>{#if age > 18}Adult{/if}</w:t></w:r>", &json!({"age": 15}));
        assert_eq!(transition, Transition::Deleted);
        assert!(tree.children(body).is_empty());
    }

    #[test]
    fn true_conditions_strip_markers_then_substitute() {
        let mut h = Harness::new();
        let data = json!({"age": 20, "name": "Bo", "vip": true});
        let (transition, tree, body) = h.run(
            "<w:r><w:t>{#if age > 18}{name} is adult{/if}{#if vip}, VIP{/if}</w:t></w:r>",
            &data,
        );
        assert_eq!(transition, Transition::Rewritten);
        assert_eq!(body_text(&tree, body), "Bo is adult, VIP");
        assert_eq!(h.report.count(DirectiveKind::Conditional), 2);
    }

    #[test]
    fn malformed_condition_is_false() {
        let mut h = Harness::new();
        let (transition, _, _) =
            h.run("<w:r><w:t>{#if age >}x{/if}</w:t></w:r>", &json!({"age": 1}));
        assert_eq!(transition, Transition::Deleted);
        assert_eq!(h.report.failures().count(), 1);
    }

    #[test]
    fn loop_keeps_surrounding_text() {
        let mut h = Harness::new();
        let data = json!({"items": [{"name": "A"}, {"name": "B"}]});
        let (_, tree, body) = h.run(
            "<w:r><w:t>Items: {#each items as item}{item.name};{/each}!</w:t></w:r>",
            &data,
        );
        assert_eq!(body_text(&tree, body), "Items: A;B;!");
    }

    #[test]
    fn empty_loop_falls_through_to_text_rule() {
        let mut h = Harness::new();
        let data = json!({"items": [], "title": "T"});
        let (_, tree, body) =
            h.run("<w:r><w:t>{title}{#each items as item}{item.name}{/each}</w:t></w:r>", &data);
        assert_eq!(body_text(&tree, body), "T{#each items as item}{/each}");
        assert_eq!(h.report.count(DirectiveKind::Loop), 1);
    }

    #[test]
    fn image_without_url_is_left_alone() {
        let mut h = Harness::new();
        let parts_before = h.package.part_names().count();
        let (transition, tree, body) = h.run("<w:r><w:t>{%logo}</w:t></w:r>", &json!({}));
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(body_text(&tree, body), "{%logo}");
        assert_eq!(h.package.part_names().count(), parts_before);
        assert_eq!(h.rels.len(), 0);
    }

    #[test]
    fn failed_fetch_is_reported_and_text_kept() {
        let mut h = Harness::new();
        let data = json!({"logo": "https://example.com/logo.png"});
        let (transition, tree, body) = h.run("<w:r><w:t>{%logo}</w:t></w:r>", &data);
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(body_text(&tree, body), "{%logo}");
        let failure = h.report.failures().next().unwrap();
        assert_eq!(failure.kind, DirectiveKind::Image);
        assert_eq!(h.counters.image, 0);
    }

    #[test]
    fn table_directive_replaces_paragraph() {
        let mut h = Harness::new();
        let data = json!({"rows": [{"a": 1}]});
        let (transition, tree, body) = h.run("<w:r><w:t>{%table:rows}</w:t></w:r>", &data);
        assert_eq!(transition, Transition::Replaced);
        assert!(tree.child(body, WML_NS, "tbl").is_some());
        assert!(tree.child(body, WML_NS, "p").is_none());
    }

    #[test]
    fn table_directive_with_non_array_is_noop() {
        let mut h = Harness::new();
        let (transition, tree, body) =
            h.run("<w:r><w:t>{%table:rows}</w:t></w:r>", &json!({"rows": "x"}));
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(body_text(&tree, body), "{%table:rows}");
    }

    #[test]
    fn format_style_only_stringifies() {
        let mut h = Harness::new();
        let data = json!({"name": "ada", "total": 1234567.5, "tags": ["a", "b"]});
        let (_, tree, body) = h.run(
            "<w:r><w:t>{format:name:upper} owes {format:total:number} {format:tags:italic}</w:t></w:r>",
            &data,
        );
        assert_eq!(body_text(&tree, body), r#"ada owes 1234567.5 ["a","b"]"#);
        assert_eq!(h.report.count(DirectiveKind::Format), 3);
    }
}
