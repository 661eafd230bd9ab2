use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// A required part (e.g. `word/document.xml`) is absent from the package.
    MissingPart(String),
    /// `{%table:...}` or `{%chart:...}` data had no rows or no columns.
    EmptyTableData,
    /// Image download failed: non-success status, transport error or empty body.
    Fetch(String),
    InvalidCondition(String),
    InvalidTemplate(String),
    Zip(zip::result::ZipError),
    Xml(roxmltree::Error),
    Json(serde_json::Error),
    Http(reqwest::Error),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingPart(name) => write!(f, "missing package part: {name}"),
            Error::EmptyTableData => write!(f, "table data is empty or invalid"),
            Error::Fetch(reason) => write!(f, "failed to fetch image: {reason}"),
            Error::InvalidCondition(cond) => write!(f, "invalid condition: {cond}"),
            Error::InvalidTemplate(reason) => write!(f, "not a valid DOCX template: {reason}"),
            Error::Zip(e) => write!(f, "ZIP error: {e}"),
            Error::Xml(e) => write!(f, "XML error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Zip(e) => Some(e),
            Error::Xml(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Zip(e)
    }
}

impl From<roxmltree::Error> for Error {
    fn from(e: roxmltree::Error) -> Self {
        Error::Xml(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
