//! Relationship and content-type manifests of the package.

use std::fmt::Write as _;

use crate::error::Error;
use crate::xml::escape;

pub const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const CONTENT_TYPES_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n";

/// "word/header1.xml" → "word/_rels/header1.xml.rels"
pub fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub target_mode: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Relationships {
    entries: Vec<Relationship>,
}

impl Relationships {
    pub fn parse(xml_content: &str) -> Result<Self, Error> {
        let xml = roxmltree::Document::parse(xml_content)?;
        let mut entries = Vec::new();
        for node in xml.root_element().children() {
            if node.tag_name().name() == "Relationship"
                && let (Some(id), Some(target)) = (node.attribute("Id"), node.attribute("Target"))
            {
                entries.push(Relationship {
                    id: id.to_string(),
                    rel_type: node.attribute("Type").unwrap_or_default().to_string(),
                    target: target.to_string(),
                    target_mode: node.attribute("TargetMode").map(str::to_string),
                });
            }
        }
        Ok(Relationships { entries })
    }

    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.entries.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// First `rId{n}` with `n >= start` that is not used yet.
    pub fn free_id(&self, start: usize) -> String {
        (start..)
            .map(|n| format!("rId{n}"))
            .find(|id| self.get(id).is_none())
            .unwrap_or_default()
    }

    /// Add `rel`, replacing an existing entry with the same id.
    pub fn upsert(&mut self, rel: Relationship) {
        match self.entries.iter_mut().find(|r| r.id == rel.id) {
            Some(existing) => *existing = rel,
            None => self.entries.push(rel),
        }
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from(DECLARATION);
        let _ = write!(out, "<Relationships xmlns=\"{RELS_NS}\">");
        for rel in &self.entries {
            let _ = write!(
                out,
                "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"",
                escape(&rel.id),
                escape(&rel.rel_type),
                escape(&rel.target)
            );
            if let Some(mode) = &rel.target_mode {
                let _ = write!(out, " TargetMode=\"{}\"", escape(mode));
            }
            out.push_str("/>");
        }
        out.push_str("</Relationships>");
        out
    }
}

#[derive(Clone, Debug)]
pub struct ContentTypes {
    /// (extension, content type)
    defaults: Vec<(String, String)>,
    /// (part name with leading '/', content type)
    overrides: Vec<(String, String)>,
}

impl Default for ContentTypes {
    fn default() -> Self {
        ContentTypes {
            defaults: vec![
                (
                    "rels".to_string(),
                    "application/vnd.openxmlformats-package.relationships+xml".to_string(),
                ),
                ("xml".to_string(), "application/xml".to_string()),
            ],
            overrides: Vec::new(),
        }
    }
}

impl ContentTypes {
    pub fn parse(xml_content: &str) -> Result<Self, Error> {
        let xml = roxmltree::Document::parse(xml_content)?;
        let mut types = ContentTypes { defaults: Vec::new(), overrides: Vec::new() };
        for node in xml.root_element().children().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "Default" => {
                    if let (Some(ext), Some(ct)) =
                        (node.attribute("Extension"), node.attribute("ContentType"))
                    {
                        types.defaults.push((ext.to_string(), ct.to_string()));
                    }
                }
                "Override" => {
                    if let (Some(part), Some(ct)) =
                        (node.attribute("PartName"), node.attribute("ContentType"))
                    {
                        types.overrides.push((part.to_string(), ct.to_string()));
                    }
                }
                _ => {}
            }
        }
        Ok(types)
    }

    pub fn default_for(&self, extension: &str) -> Option<&str> {
        self.defaults
            .iter()
            .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
            .map(|(_, ct)| ct.as_str())
    }

    pub fn override_for(&self, part: &str) -> Option<&str> {
        let part_name = part_name(part);
        self.overrides
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&part_name))
            .map(|(_, ct)| ct.as_str())
    }

    /// Register a Default for `extension` unless one already exists.
    pub fn ensure_default(&mut self, extension: &str, content_type: &str) {
        if self.default_for(extension).is_none() {
            self.defaults
                .push((extension.to_ascii_lowercase(), content_type.to_string()));
        }
    }

    /// Register an Override for `part` (package path, with or without leading '/').
    pub fn ensure_override(&mut self, part: &str, content_type: &str) {
        if self.override_for(part).is_none() {
            self.overrides.push((part_name(part), content_type.to_string()));
        }
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from(DECLARATION);
        let _ = write!(out, "<Types xmlns=\"{CONTENT_TYPES_NS}\">");
        for (ext, ct) in &self.defaults {
            let _ = write!(
                out,
                "<Default Extension=\"{}\" ContentType=\"{}\"/>",
                escape(ext),
                escape(ct)
            );
        }
        for (part, ct) in &self.overrides {
            let _ = write!(
                out,
                "<Override PartName=\"{}\" ContentType=\"{}\"/>",
                escape(part),
                escape(ct)
            );
        }
        out.push_str("</Types>");
        out
    }
}

fn part_name(part: &str) -> String {
    if part.starts_with('/') {
        part.to_string()
    } else {
        format!("/{part}")
    }
}
