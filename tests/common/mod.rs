#![allow(dead_code)]

use std::io::{Cursor, Read};

use docxside_fill::{Error, Package};

pub const W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const DOCUMENT: &str = "word/document.xml";

/// 1x1 PNG header; enough for content sniffing.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

pub fn document_xml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{W}" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body>{body}<w:sectPr/></w:body></w:document>"#
    )
}

pub fn header_xml(root: &str, content: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:{root} xmlns:w="{W}">{content}</w:{root}>"#
    )
}

/// Blank package with `body` as the document body plus any extra parts.
pub fn template_with(body: &str, extra: &[(&str, String)]) -> Vec<u8> {
    let mut package = Package::blank();
    package.set_part(DOCUMENT, document_xml(body).into_bytes());
    for (name, xml) in extra {
        package.set_part(name, xml.clone().into_bytes());
    }
    package.to_bytes().expect("blank package serializes")
}

pub fn template(body: &str) -> Vec<u8> {
    template_with(body, &[])
}

pub fn paragraph(text: &str) -> String {
    format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
}

pub fn part_names(docx: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(Cursor::new(docx)).expect("valid zip");
    archive.file_names().map(str::to_string).collect()
}

pub fn read_part(docx: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(docx)).expect("valid zip");
    let mut file = archive.by_name(name).ok()?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).ok()?;
    Some(data)
}

pub fn read_text(docx: &[u8], name: &str) -> String {
    let data = read_part(docx, name).unwrap_or_else(|| panic!("{name} missing"));
    String::from_utf8(data).expect("utf-8 part")
}

/// Text of every `w:p` directly under the root's body (or the root for
/// headers and footers), one string per paragraph.
pub fn paragraph_texts(xml: &str) -> Vec<String> {
    let doc = roxmltree::Document::parse(xml).expect("well-formed part");
    let root = doc.root_element();
    let container = root
        .children()
        .find(|n| n.has_tag_name((W, "body")))
        .unwrap_or(root);
    container
        .children()
        .filter(|n| n.has_tag_name((W, "p")))
        .map(|p| {
            p.descendants()
                .filter(|n| n.has_tag_name((W, "t")))
                .filter_map(|n| n.text())
                .collect()
        })
        .collect()
}

pub fn count_elements(xml: &str, local: &str) -> usize {
    let doc = roxmltree::Document::parse(xml).expect("well-formed part");
    doc.descendants().filter(|n| n.has_tag_name((W, local))).count()
}

pub fn fake_png(_url: &str) -> Result<Vec<u8>, Error> {
    Ok(PNG.to_vec())
}

pub fn offline(url: &str) -> Result<Vec<u8>, Error> {
    Err(Error::Fetch(format!("{url}: 404 Not Found")))
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
