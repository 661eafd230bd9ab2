//! `{%chart:<bar|line|pie>:<key>}`: a chart part built from `{label, value}` items.

use std::fmt::Write as _;

use serde_json::Value;

use crate::docx::{A_NS, C_NS, R_NS, WML_NS, WPD_NS};
use crate::error::Error;
use crate::model::{ChartKind, DirectiveKind, Outcome};
use crate::opc::Relationship;
use crate::paragraph::PartContext;
use crate::resolve::{resolve, stringify, to_number};
use crate::xml::escape;

pub const CHART_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/chart";
pub const CHART_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.drawingml.chart+xml";

const CHART_ID_BASE: usize = 2000;
const WIDTH_EMU: u64 = 400 * 9525;
const HEIGHT_EMU: u64 = 300 * 9525;
const TITLE: &str = "Chart";
const SERIES_NAME: &str = "Series 1";

#[derive(Debug, PartialEq)]
struct Point {
    label: String,
    value: f64,
}

fn points(items: &[Value]) -> Result<Vec<Point>, Error> {
    if items.is_empty() {
        return Err(Error::EmptyTableData);
    }
    Ok(items
        .iter()
        .map(|item| Point {
            label: item.get("label").map(stringify).unwrap_or_default(),
            value: item
                .get("value")
                .map(to_number)
                .filter(|v| v.is_finite())
                .unwrap_or(0.0),
        })
        .collect())
}

/// Write the chart part for `key` and return the run that shows it.
/// `None` leaves the paragraph as it is.
pub(crate) fn embed_chart(ctx: &mut PartContext, kind: ChartKind, key: &str) -> Option<String> {
    let Some(items) = resolve(key, ctx.data).as_array() else {
        ctx.record(DirectiveKind::Chart, key, Outcome::Skipped("not an array".into()));
        return None;
    };
    let points = match points(items) {
        Ok(points) => points,
        Err(e) => {
            ctx.record(DirectiveKind::Chart, key, Outcome::Failed(e.to_string()));
            return None;
        }
    };

    ctx.counters.chart += 1;
    let mut n = ctx.counters.chart;
    while ctx.package.contains(&format!("word/charts/chart{n}.xml")) {
        n += 1;
    }
    let part_name = format!("word/charts/chart{n}.xml");
    let rel_id = ctx.rels.free_id(CHART_ID_BASE + n);

    ctx.package
        .set_part(&part_name, chart_xml(kind, &points).into_bytes());
    ctx.rels.upsert(Relationship {
        id: rel_id.clone(),
        rel_type: CHART_REL_TYPE.to_string(),
        target: format!("charts/chart{n}.xml"),
        target_mode: None,
    });
    ctx.content_types.ensure_override(&part_name, CHART_CONTENT_TYPE);
    ctx.record(DirectiveKind::Chart, key, Outcome::Applied);

    Some(chart_run(&rel_id, CHART_ID_BASE + n))
}

fn chart_xml(kind: ChartKind, points: &[Point]) -> String {
    let mut series = String::new();
    let _ = write!(
        series,
        r#"<c:ser><c:idx val="0"/><c:order val="0"/><c:tx><c:v>{SERIES_NAME}</c:v></c:tx>"#
    );
    if kind == ChartKind::Line {
        series.push_str(r#"<c:marker><c:symbol val="circle"/><c:size val="5"/></c:marker>"#);
    }
    let _ = write!(
        series,
        r#"<c:cat><c:strLit><c:ptCount val="{}"/>"#,
        points.len()
    );
    for (i, point) in points.iter().enumerate() {
        let _ = write!(series, r#"<c:pt idx="{i}"><c:v>{}</c:v></c:pt>"#, escape(&point.label));
    }
    let _ = write!(
        series,
        r#"</c:strLit></c:cat><c:val><c:numLit><c:formatCode>General</c:formatCode><c:ptCount val="{}"/>"#,
        points.len()
    );
    for (i, point) in points.iter().enumerate() {
        let _ = write!(series, r#"<c:pt idx="{i}"><c:v>{}</c:v></c:pt>"#, point.value);
    }
    series.push_str("</c:numLit></c:val></c:ser>");

    let plot = match kind {
        ChartKind::Bar => format!(
            r#"<c:barChart><c:barDir val="col"/><c:grouping val="clustered"/><c:varyColors val="0"/>{series}<c:axId val="42"/><c:axId val="43"/></c:barChart>{AXES}"#
        ),
        ChartKind::Line => format!(
            r#"<c:lineChart><c:grouping val="standard"/><c:varyColors val="0"/>{series}<c:marker val="1"/><c:axId val="42"/><c:axId val="43"/></c:lineChart>{AXES}"#
        ),
        ChartKind::Pie => format!(
            r#"<c:pieChart><c:varyColors val="1"/>{series}<c:dLbls><c:showLegendKey val="0"/><c:showVal val="0"/><c:showCatName val="1"/><c:showSerName val="0"/><c:showPercent val="0"/><c:showBubbleSize val="0"/></c:dLbls><c:firstSliceAng val="0"/></c:pieChart>"#
        ),
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<c:chartSpace xmlns:c="{C_NS}" xmlns:a="{A_NS}" xmlns:r="{R_NS}"><c:chart><c:title><c:tx><c:rich><a:bodyPr/><a:lstStyle/><a:p><a:pPr><a:defRPr/></a:pPr><a:r><a:rPr lang="en-US"/><a:t>{TITLE}</a:t></a:r></a:p></c:rich></c:tx><c:overlay val="0"/></c:title><c:autoTitleDeleted val="0"/><c:plotArea><c:layout/>{plot}</c:plotArea><c:legend><c:legendPos val="r"/><c:overlay val="0"/></c:legend><c:plotVisOnly val="1"/></c:chart></c:chartSpace>"#
    )
}

const AXES: &str = r#"<c:catAx><c:axId val="42"/><c:scaling><c:orientation val="minMax"/></c:scaling><c:delete val="0"/><c:axPos val="b"/><c:numFmt formatCode="General" sourceLinked="1"/><c:majorTickMark val="out"/><c:minorTickMark val="none"/><c:tickLblPos val="nextTo"/><c:crossAx val="43"/><c:crosses val="autoZero"/><c:auto val="1"/><c:lblAlgn val="ctr"/><c:lblOffset val="100"/></c:catAx><c:valAx><c:axId val="43"/><c:scaling><c:orientation val="minMax"/></c:scaling><c:delete val="0"/><c:axPos val="l"/><c:numFmt formatCode="General" sourceLinked="1"/><c:majorTickMark val="out"/><c:minorTickMark val="none"/><c:tickLblPos val="nextTo"/><c:crossAx val="42"/><c:crosses val="autoZero"/><c:crossBetween val="between"/></c:valAx>"#;

fn chart_run(rel_id: &str, doc_pr_id: usize) -> String {
    format!(
        r#"<w:r xmlns:w="{WML_NS}" xmlns:wp="{WPD_NS}" xmlns:a="{A_NS}" xmlns:c="{C_NS}" xmlns:r="{R_NS}"><w:drawing><wp:inline distT="0" distB="0" distL="0" distR="0"><wp:extent cx="{WIDTH_EMU}" cy="{HEIGHT_EMU}"/><wp:effectExtent l="0" t="0" r="0" b="0"/><wp:docPr id="{doc_pr_id}" name="Chart {doc_pr_id}"/><wp:cNvGraphicFramePr/><a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/chart"><c:chart r:id="{rel_id}"/></a:graphicData></a:graphic></wp:inline></w:drawing></w:r>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn points_default_missing_fields() {
        let items = json!([{"label": "Q1", "value": 10}, {"value": "2.5"}, {"label": "Q3"}]);
        let parsed = points(items.as_array().unwrap()).unwrap();
        assert_eq!(
            parsed,
            vec![
                Point { label: "Q1".into(), value: 10.0 },
                Point { label: "".into(), value: 2.5 },
                Point { label: "Q3".into(), value: 0.0 },
            ]
        );
        assert!(matches!(points_of(&json!([])), Err(Error::EmptyTableData)));
    }

    fn points_of(value: &Value) -> Result<Vec<Point>, Error> {
        points(value.as_array().map(Vec::as_slice).unwrap_or_default())
    }

    #[test]
    fn chart_parts_are_well_formed() {
        let points = vec![Point { label: "A & B".into(), value: 3.0 }];
        for kind in [ChartKind::Bar, ChartKind::Line, ChartKind::Pie] {
            let xml = chart_xml(kind, &points);
            let doc = roxmltree::Document::parse(&xml).unwrap();
            let series: Vec<_> = doc
                .descendants()
                .filter(|n| n.has_tag_name((C_NS, "ser")))
                .collect();
            assert_eq!(series.len(), 1, "{kind:?}");
            let has_axes = doc.descendants().any(|n| n.has_tag_name((C_NS, "catAx")));
            assert_eq!(has_axes, kind != ChartKind::Pie);
        }
        assert!(roxmltree::Document::parse(&chart_run("rId2001", 2001)).is_ok());
    }
}
