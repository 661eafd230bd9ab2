//! Fetching images and embedding them as inline drawings.

use std::time::Duration;

use serde_json::Value;

use crate::docx::{A_NS, PIC_NS, R_NS, WML_NS, WPD_NS};
use crate::error::Error;
use crate::opc::{ContentTypes, Relationship, Relationships};
use crate::package::Package;
use crate::resolve::{parse_leading_int, resolve, stringify, to_number};
use crate::xml::escape;

pub const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
pub const TIMEOUT_ENV: &str = "DOCXSIDE_FETCH_TIMEOUT";

const IMAGE_ID_BASE: usize = 1000;
const EMU_PER_PIXEL: u64 = 9525;
const DEFAULT_WIDTH: u32 = 200;
const DEFAULT_HEIGHT: u32 = 150;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Source of image bytes for `{%key}` directives.
pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, Error>;
}

impl<F> ImageFetcher for F
where
    F: Fn(&str) -> Result<Vec<u8>, Error>,
{
    fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
        self(url)
    }
}

/// Blocking HTTP(S) fetcher.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("docxside-fill/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpFetcher { client })
    }

    /// Timeout in seconds from `DOCXSIDE_FETCH_TIMEOUT`, 30 when unset or invalid.
    pub fn from_env() -> Result<Self, Error> {
        let secs = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self::new(Duration::from_secs(secs))
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
        let response = self.client.get(url).send()?;
        if let Err(err) = response.error_for_status_ref() {
            return Err(Error::Fetch(format!("{url}: {err}")));
        }
        let bytes = response.bytes()?;
        if bytes.is_empty() {
            return Err(Error::Fetch(format!("{url}: empty response body")));
        }
        Ok(bytes.to_vec())
    }
}

/// The URL for `key`: a string value, or the `url` field of an object value.
pub fn image_url(key: &str, data: &Value) -> Option<String> {
    let value = resolve(key, data);
    let url = match value {
        Value::Object(map) => map.get("url").map(stringify).unwrap_or_default(),
        other => stringify(other),
    };
    let url = url.trim();
    (!url.is_empty()).then(|| url.to_string())
}

/// Pixel size for an image directive. Each dimension is looked up as
/// `<key>.width` / `<key>.height` and falls back to its default. The
/// dimension named by a `.width`/`.height` suffix is read leniently
/// (`"300px"` is 300); the other must be a plain number.
pub fn image_size(key: &str, property: Option<&str>, data: &Value) -> (u32, u32) {
    let lookup = |dim: &str, default: u32| {
        let value = resolve(&format!("{key}.{dim}"), data);
        let pixels = if property == Some(dim) {
            parse_leading_int(value)
        } else {
            Some(to_number(value))
                .filter(|n| n.fract() == 0.0)
                .map(|n| n as i64)
        };
        pixels
            .and_then(|n| u32::try_from(n).ok())
            .filter(|&n| n > 0)
            .unwrap_or(default)
    };
    (lookup("width", DEFAULT_WIDTH), lookup("height", DEFAULT_HEIGHT))
}

/// Lower-cased extension of the URL's last path segment, query and fragment removed.
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| {
        rest.split_once('/').map_or("", |(_, p)| p)
    });
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| ext.to_ascii_lowercase())
}

pub fn content_type_for(extension: &str) -> Option<&'static str> {
    match extension {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// Extension and content type for an image, trusting the URL when it names a
/// known type and falling back to the bytes' magic number.
fn classify(url: &str, bytes: &[u8]) -> (String, String) {
    let from_url = extension_from_url(url);
    if let Some(ext) = &from_url
        && let Some(ct) = content_type_for(ext)
    {
        return (ext.clone(), ct.to_string());
    }
    if let Ok(format) = ::image::guess_format(bytes) {
        let ext = from_url
            .or_else(|| format.extensions_str().first().map(|e| e.to_string()))
            .unwrap_or_else(|| "png".to_string());
        return (ext, format.to_mime_type().to_string());
    }
    match from_url {
        Some(ext) => (ext, "application/octet-stream".to_string()),
        None => ("png".to_string(), "image/png".to_string()),
    }
}

#[derive(Debug)]
pub struct EmbeddedImage {
    pub part_name: String,
    pub rel_id: String,
    /// `<w:r>` carrying the inline drawing.
    pub run_xml: String,
}

/// Store `bytes` under `word/media`, link it from `rels` and return the
/// drawing run. `index` is the run-wide image counter.
pub fn embed(
    package: &mut Package,
    content_types: &mut ContentTypes,
    rels: &mut Relationships,
    index: usize,
    url: &str,
    bytes: Vec<u8>,
    (width, height): (u32, u32),
) -> EmbeddedImage {
    let (ext, content_type) = classify(url, &bytes);
    let mut n = index;
    while package.contains(&format!("word/media/image{n}.{ext}")) {
        n += 1;
    }
    let file_name = format!("image{n}.{ext}");
    let part_name = format!("word/media/{file_name}");
    let rel_id = rels.free_id(IMAGE_ID_BASE + n);

    package.set_part(&part_name, bytes);
    rels.upsert(Relationship {
        id: rel_id.clone(),
        rel_type: IMAGE_REL_TYPE.to_string(),
        target: format!("media/{file_name}"),
        target_mode: None,
    });
    content_types.ensure_default(&ext, &content_type);

    let cx = u64::from(width) * EMU_PER_PIXEL;
    let cy = u64::from(height) * EMU_PER_PIXEL;
    let run_xml = drawing_run(&rel_id, IMAGE_ID_BASE + n, &file_name, cx, cy);
    EmbeddedImage { part_name, rel_id, run_xml }
}

fn drawing_run(rel_id: &str, doc_pr_id: usize, name: &str, cx: u64, cy: u64) -> String {
    let name = escape(name);
    format!(
        r#"<w:r xmlns:w="{WML_NS}" xmlns:wp="{WPD_NS}" xmlns:a="{A_NS}" xmlns:pic="{PIC_NS}" xmlns:r="{R_NS}"><w:drawing><wp:inline distT="0" distB="0" distL="0" distR="0"><wp:extent cx="{cx}" cy="{cy}"/><wp:effectExtent l="0" t="0" r="0" b="0"/><wp:docPr id="{doc_pr_id}" name="Picture {doc_pr_id}"/><wp:cNvGraphicFramePr><a:graphicFrameLocks noChangeAspect="1"/></wp:cNvGraphicFramePr><a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture"><pic:pic><pic:nvPicPr><pic:cNvPr id="0" name="{name}"/><pic:cNvPicPr/></pic:nvPicPr><pic:blipFill><a:blip r:embed="{rel_id}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill><pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr></pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r>"#
    )
}
