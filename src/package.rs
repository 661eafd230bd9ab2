//! The zip container: ordered named parts read from and written back to bytes.

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;

use crate::error::Error;
use crate::opc::CONTENT_TYPES_PART;

pub const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Clone, Debug)]
struct Entry {
    name: String,
    data: Vec<u8>,
}

/// All parts of an OPC package, in archive order.
#[derive(Clone, Debug, Default)]
pub struct Package {
    entries: Vec<Entry>,
}

impl Package {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            entries.push(Entry { name: file.name().to_string(), data });
        }
        Ok(Package { entries })
    }

    /// A minimal single-section document with one empty paragraph.
    pub fn blank() -> Self {
        let mut package = Package::default();
        for (name, xml) in BLANK_PARTS {
            package.set_part(name, xml.as_bytes().to_vec());
        }
        package
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    /// The part decoded as UTF-8 text; a missing part is [`Error::MissingPart`].
    pub fn part_text(&self, name: &str) -> Result<String, Error> {
        let data = self
            .part(name)
            .ok_or_else(|| Error::MissingPart(name.to_string()))?;
        String::from_utf8(data.to_vec())
            .map_err(|e| Error::InvalidTemplate(format!("{name} is not UTF-8: {e}")))
    }

    /// Replace the part's content, or append a new part.
    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.data = data,
            None => self.entries.push(Entry { name: name.to_string(), data }),
        }
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut output_buf = Cursor::new(Vec::new());
        let mut zip_writer = zip::ZipWriter::new(&mut output_buf);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        // [Content_Types].xml goes first so consumers can sniff the package.
        let ordered = self
            .entries
            .iter()
            .filter(|e| e.name == CONTENT_TYPES_PART)
            .chain(self.entries.iter().filter(|e| e.name != CONTENT_TYPES_PART));
        for entry in ordered {
            if entry.name.ends_with('/') {
                zip_writer.add_directory(entry.name.as_str(), options)?;
                continue;
            }
            zip_writer.start_file(entry.name.as_str(), options)?;
            zip_writer.write_all(&entry.data)?;
        }

        zip_writer.finish()?;
        Ok(output_buf.into_inner())
    }
}

const BLANK_PARTS: [(&str, &str); 7] = [
    (
        CONTENT_TYPES_PART,
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/><Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/></Types>"#,
    ),
    (
        "_rels/.rels",
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/></Relationships>"#,
    ),
    (
        "word/_rels/document.xml.rels",
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#,
    ),
    (
        DOCUMENT_PART,
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body><w:p><w:r><w:t></w:t></w:r></w:p><w:sectPr><w:pgSz w:w="11906" w:h="16838"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="708" w:footer="708" w:gutter="0"/></w:sectPr></w:body></w:document>"#,
    ),
    (
        "word/styles.xml",
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:eastAsia="Calibri" w:cs="Calibri"/><w:sz w:val="22"/><w:szCs w:val="22"/></w:rPr></w:rPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/></w:style><w:style w:type="table" w:styleId="TableGrid"><w:name w:val="Table Grid"/><w:tblPr><w:tblBorders><w:top w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:left w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:bottom w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:right w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideH w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideV w:val="single" w:sz="4" w:space="0" w:color="auto"/></w:tblBorders></w:tblPr></w:style></w:styles>"#,
    ),
    (
        "docProps/core.xml",
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><dc:title></dc:title><dc:creator>docxside-fill</dc:creator></cp:coreProperties>"#,
    ),
    (
        "docProps/app.xml",
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties"><Application>docxside-fill</Application></Properties>"#,
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_package_round_trips() {
        let blank = Package::blank();
        let bytes = blank.to_bytes().unwrap();
        let reread = Package::from_bytes(&bytes).unwrap();

        let names: Vec<&str> = reread.part_names().collect();
        assert_eq!(names[0], CONTENT_TYPES_PART);
        assert!(reread.contains(DOCUMENT_PART));
        assert!(reread.part_text(DOCUMENT_PART).unwrap().contains("<w:body>"));
        for name in blank.part_names() {
            assert_eq!(blank.part(name), reread.part(name), "{name}");
        }
    }

    #[test]
    fn missing_part_is_an_error() {
        let package = Package::default();
        assert!(matches!(
            package.part_text(DOCUMENT_PART),
            Err(Error::MissingPart(name)) if name == DOCUMENT_PART
        ));
    }

    #[test]
    fn set_part_replaces_in_place() {
        let mut package = Package::blank();
        let before: Vec<String> = package.part_names().map(str::to_string).collect();
        package.set_part("word/styles.xml", b"<w:styles/>".to_vec());
        let after: Vec<String> = package.part_names().map(str::to_string).collect();
        assert_eq!(before, after);
        assert_eq!(package.part("word/styles.xml"), Some(&b"<w:styles/>"[..]));
    }

    #[test]
    fn not_a_zip() {
        assert!(matches!(Package::from_bytes(b"plain text"), Err(Error::Zip(_))));
    }
}
