//! Generated tables for `{%table:key}` and row styling for template tables.

use std::fmt::Write as _;

use serde_json::Value;

use crate::condition::evaluate_row_rule;
use crate::directive;
use crate::docx::WML_NS;
use crate::error::Error;
use crate::model::{DirectiveKind, GenerationReport, Outcome};
use crate::paragraph::{joined_text, strip_text, text_nodes};
use crate::resolve::{resolve, stringify};
use crate::xml::{NodeId, QName, XmlTree, escape};

const GRID_COL_WIDTH: u32 = 2500;

const TABLE_PROPERTIES: &str = r#"<w:tblPr><w:tblStyle w:val="TableGrid"/><w:tblW w:w="0" w:type="auto"/><w:tblBorders><w:top w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:left w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:bottom w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:right w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideH w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideV w:val="single" w:sz="4" w:space="0" w:color="auto"/></w:tblBorders><w:tblLook w:val="04A0"/></w:tblPr>"#;

/// `tcPr` children that must follow `w:shd`.
const AFTER_SHD: [&str; 11] = [
    "noWrap",
    "tcMar",
    "textDirection",
    "tcFitText",
    "vAlign",
    "hideMark",
    "headers",
    "cellIns",
    "cellDel",
    "cellMerge",
    "tcPrChange",
];

/// `rPr` children that must precede `w:b`.
const BEFORE_BOLD: [&str; 2] = ["rStyle", "rFonts"];

/// Build a `w:tbl` with a bold header row. Columns are the keys of the first
/// row; later rows missing a key get an empty cell.
pub fn generate_table(rows: &[Value]) -> Result<String, Error> {
    let Some(Value::Object(first)) = rows.first() else {
        return Err(Error::EmptyTableData);
    };
    let columns: Vec<&str> = first.keys().map(String::as_str).collect();
    if columns.is_empty() {
        return Err(Error::EmptyTableData);
    }

    let mut xml = format!(r#"<w:tbl xmlns:w="{WML_NS}">{TABLE_PROPERTIES}<w:tblGrid>"#);
    for _ in &columns {
        let _ = write!(xml, r#"<w:gridCol w:w="{GRID_COL_WIDTH}"/>"#);
    }
    xml.push_str("</w:tblGrid><w:tr>");
    for column in &columns {
        push_cell(&mut xml, column, true);
    }
    xml.push_str("</w:tr>");
    for row in rows {
        xml.push_str("<w:tr>");
        for column in &columns {
            let value = row.get(*column).map(stringify).unwrap_or_default();
            push_cell(&mut xml, &value, false);
        }
        xml.push_str("</w:tr>");
    }
    xml.push_str("</w:tbl>");
    Ok(xml)
}

fn push_cell(xml: &mut String, text: &str, bold: bool) {
    let run_props = if bold { "<w:rPr><w:b/></w:rPr>" } else { "" };
    let _ = write!(
        xml,
        r#"<w:tc><w:tcPr/><w:p><w:r>{run_props}<w:t xml:space="preserve">{}</w:t></w:r></w:p></w:tc>"#,
        escape(text)
    );
}

fn cell_text(tree: &XmlTree, cell: NodeId) -> String {
    tree.descendants(cell, WML_NS, "p")
        .into_iter()
        .map(|p| joined_text(tree, &text_nodes(tree, p)))
        .collect()
}

fn first_cell(tree: &XmlTree, row: NodeId) -> Option<NodeId> {
    tree.child(row, WML_NS, "tc")
}

/// Handle `{format-table:key}` in the table's first cell and the
/// `{if:field op value}style{/if}` rules in the first cell of later rows.
/// Directive text is removed from the cells once read.
pub(crate) fn apply_table_formatting(
    tree: &mut XmlTree,
    table: NodeId,
    data: &Value,
    part: &str,
    report: &mut GenerationReport,
) {
    let rows = tree.child_elements(table, WML_NS, "tr");
    let Some(&header) = rows.first() else {
        return;
    };

    let mut items: Option<&Vec<Value>> = None;
    if let Some(cell) = first_cell(tree, header)
        && let Some(binding) = directive::format_table(&cell_text(tree, cell))
    {
        let key = binding.key.unwrap_or_default();
        items = resolve(&key, data).as_array();
        match items {
            Some(_) if binding.sole => tree.detach(header),
            _ => strip_text(tree, cell, directive::format_table_span),
        }
        let outcome = match items {
            Some(_) => Outcome::Applied,
            None => Outcome::Skipped(format!("'{key}' is not an array")),
        };
        report.record(part, DirectiveKind::FormatTable, &key, outcome);
    }

    let rows = tree.child_elements(table, WML_NS, "tr");
    for (index, &row) in rows.iter().enumerate().skip(1) {
        let Some(cell) = first_cell(tree, row) else {
            continue;
        };
        let Some(rule) = directive::row_condition(&cell_text(tree, cell)) else {
            continue;
        };
        strip_text(tree, cell, directive::row_condition_span);

        let outcome = match items.map(|items| items.get(index - 1)) {
            None => Outcome::Skipped("table has no format-table binding".into()),
            Some(None) => Outcome::Skipped(format!("no data for row {index}")),
            Some(Some(item)) => {
                if !evaluate_row_rule(item.get(&rule.field), rule.op, &rule.value) {
                    Outcome::Skipped("condition is false".into())
                } else if apply_row_style(tree, row, &rule.style) {
                    Outcome::Applied
                } else {
                    Outcome::Skipped(format!("unknown style '{}'", rule.style))
                }
            }
        };
        report.record(part, DirectiveKind::RowCondition, &rule.field, outcome);
    }
}

/// Apply a named style to every cell of `row`. Returns false for unknown styles.
pub fn apply_row_style(tree: &mut XmlTree, row: NodeId, style: &str) -> bool {
    let fill = match style {
        "highlight" => "FFFF00",
        "red" => "FF0000",
        "green" => "00FF00",
        "bold" => {
            for cell in tree.child_elements(row, WML_NS, "tc") {
                for run in tree.descendants(cell, WML_NS, "r") {
                    set_bold(tree, run);
                }
            }
            return true;
        }
        _ => return false,
    };
    for cell in tree.child_elements(row, WML_NS, "tc") {
        set_shading(tree, cell, fill);
    }
    true
}

fn set_shading(tree: &mut XmlTree, cell: NodeId, fill: &str) {
    let tc_pr = tree.child_or_insert(cell, QName::new(WML_NS, "w", "tcPr"), 0);
    for old in tree.child_elements(tc_pr, WML_NS, "shd") {
        tree.detach(old);
    }
    let shd = tree.new_element(QName::new(WML_NS, "w", "shd"));
    tree.set_attribute(shd, QName::new(WML_NS, "w", "val"), "clear");
    tree.set_attribute(shd, QName::new(WML_NS, "w", "color"), "auto");
    tree.set_attribute(shd, QName::new(WML_NS, "w", "fill"), fill);

    let successor = tree
        .children(tc_pr)
        .iter()
        .copied()
        .find(|&c| AFTER_SHD.iter().any(|name| tree.is(c, WML_NS, name)));
    match successor {
        Some(next) => tree.insert_before(next, shd),
        None => tree.append(tc_pr, shd),
    }
}

fn set_bold(tree: &mut XmlTree, run: NodeId) {
    let r_pr = tree.child_or_insert(run, QName::new(WML_NS, "w", "rPr"), 0);
    if tree.child(r_pr, WML_NS, "b").is_some() {
        return;
    }
    let index = tree
        .children(r_pr)
        .iter()
        .rposition(|&c| BEFORE_BOLD.iter().any(|name| tree.is(c, WML_NS, name)))
        .map_or(0, |i| i + 1);
    let b = tree.new_element(QName::new(WML_NS, "w", "b"));
    tree.insert(r_pr, index, b);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse_table(xml: &str) -> (XmlTree, NodeId) {
        let tree = XmlTree::parse(xml).unwrap();
        let table = tree.root_element().unwrap();
        (tree, table)
    }

    fn row_texts(tree: &XmlTree, table: NodeId) -> Vec<Vec<String>> {
        tree.child_elements(table, WML_NS, "tr")
            .into_iter()
            .map(|row| {
                tree.child_elements(row, WML_NS, "tc")
                    .into_iter()
                    .map(|cell| tree.text(cell))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn columns_come_from_first_row() {
        let rows = json!([{"a": 1, "b": 2}, {"a": 3}]);
        let xml = generate_table(rows.as_array().unwrap()).unwrap();
        let (tree, table) = parse_table(&xml);
        assert_eq!(
            row_texts(&tree, table),
            vec![vec!["a", "b"], vec!["1", "2"], vec!["3", ""]]
        );
        assert_eq!(tree.descendants(table, WML_NS, "gridCol").len(), 2);

        let header = tree.child_elements(table, WML_NS, "tr")[0];
        assert_eq!(tree.descendants(header, WML_NS, "b").len(), 2);
    }

    #[test]
    fn empty_or_keyless_data_is_rejected() {
        assert!(matches!(generate_table(&[]), Err(Error::EmptyTableData)));
        assert!(matches!(generate_table(&[json!({})]), Err(Error::EmptyTableData)));
        assert!(matches!(generate_table(&[json!(5)]), Err(Error::EmptyTableData)));
    }

    #[test]
    fn cell_text_is_escaped() {
        let xml = generate_table(&[json!({"q": "a < b & c"})]).unwrap();
        let (tree, table) = parse_table(&xml);
        assert_eq!(row_texts(&tree, table)[1], vec!["a < b & c"]);
    }

    fn template_table(first_cells: &[&str]) -> String {
        let rows: String = first_cells
            .iter()
            .map(|text| {
                format!(
                    r#"<w:tr><w:tc><w:tcPr><w:vAlign w:val="center"/></w:tcPr><w:p><w:r><w:t>{text}</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:rPr><w:rFonts w:ascii="Arial"/><w:sz w:val="20"/></w:rPr><w:t>x</w:t></w:r></w:p></w:tc></w:tr>"#
                )
            })
            .collect();
        format!(r#"<w:tbl xmlns:w="{WML_NS}">{rows}</w:tbl>"#)
    }

    #[test]
    fn format_table_binding_styles_matching_rows() {
        let data = json!({"orders": [{"amount": 150}, {"amount": 50}]});
        let xml = template_table(&[
            "{format-table:orders}",
            "Amount",
            "{if:amount>=100}highlight{/if}Big",
            "{if:amount>=100}highlight{/if}Small",
        ]);
        let (mut tree, table) = parse_table(&xml);
        let mut report = GenerationReport::default();
        apply_table_formatting(&mut tree, table, &data, "word/document.xml", &mut report);

        let texts = row_texts(&tree, table);
        assert_eq!(texts, vec![vec!["Amount", "x"], vec!["Big", "x"], vec!["Small", "x"]]);

        let rows = tree.child_elements(table, WML_NS, "tr");
        assert!(tree.descendants(rows[1], WML_NS, "shd").len() == 2);
        assert!(tree.descendants(rows[2], WML_NS, "shd").is_empty());

        let first_tc_pr = tree.descendants(rows[1], WML_NS, "tcPr")[0];
        let order: Vec<String> = tree
            .children(first_tc_pr)
            .iter()
            .filter_map(|&c| tree.element(c).map(|e| e.name.local.clone()))
            .collect();
        assert_eq!(order, vec!["shd", "vAlign"]);
        assert_eq!(report.count(DirectiveKind::RowCondition), 2);
        assert_eq!(report.applied().count(), 2);
    }

    #[test]
    fn bold_is_placed_after_fonts() {
        let xml = template_table(&["Header", "{if:status==Paid}bold{/if}"]);
        let (mut tree, table) = parse_table(&xml);
        let row = tree.child_elements(table, WML_NS, "tr")[1];
        assert!(apply_row_style(&mut tree, row, "bold"));
        assert!(apply_row_style(&mut tree, row, "bold"));

        let second_cell = tree.child_elements(row, WML_NS, "tc")[1];
        let r_pr = tree.descendants(second_cell, WML_NS, "rPr")[0];
        let order: Vec<String> = tree
            .children(r_pr)
            .iter()
            .filter_map(|&c| tree.element(c).map(|e| e.name.local.clone()))
            .collect();
        assert_eq!(order, vec!["rFonts", "b", "sz"]);
        assert!(!apply_row_style(&mut tree, row, "sparkly"));
    }

    #[test]
    fn inline_binding_keeps_directive_row() {
        let data = json!({"orders": [{"s": "Paid"}]});
        let xml = template_table(&["Status {format-table:orders}", "{if:s==Paid}green{/if}"]);
        let (mut tree, table) = parse_table(&xml);
        let mut report = GenerationReport::default();
        apply_table_formatting(&mut tree, table, &data, "word/document.xml", &mut report);

        let rows = tree.child_elements(table, WML_NS, "tr");
        assert_eq!(rows.len(), 2);
        assert_eq!(tree.text(rows[0]), "Status x");
        let shd = tree.descendants(rows[1], WML_NS, "shd")[0];
        assert_eq!(tree.attribute(shd, Some(WML_NS), "fill"), Some("00FF00"));
    }

    #[test]
    fn missing_field_does_not_satisfy_ordering_rule() {
        let data = json!({"orders": [{"amount": 5}, {"amount": 5, "discount": 2}]});
        let xml = template_table(&[
            "{format-table:orders}",
            "Header",
            "{if:discount<10}red{/if}A",
            "{if:discount<10}red{/if}B",
        ]);
        let (mut tree, table) = parse_table(&xml);
        let mut report = GenerationReport::default();
        apply_table_formatting(&mut tree, table, &data, "word/document.xml", &mut report);

        let rows = tree.child_elements(table, WML_NS, "tr");
        assert!(tree.descendants(rows[1], WML_NS, "shd").is_empty());
        assert_eq!(tree.descendants(rows[2], WML_NS, "shd").len(), 2);
    }

    #[test]
    fn rules_without_binding_are_stripped_and_skipped() {
        let xml = template_table(&["Header", "{if:a>1}red{/if}Row"]);
        let (mut tree, table) = parse_table(&xml);
        let mut report = GenerationReport::default();
        apply_table_formatting(&mut tree, table, &json!({}), "word/document.xml", &mut report);
        assert_eq!(row_texts(&tree, table)[1], vec!["Row", "x"]);
        assert!(tree.descendants(table, WML_NS, "shd").is_empty());
        assert_eq!(report.applied().count(), 0);
    }
}
