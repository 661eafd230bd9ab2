mod chart;
mod condition;
mod directive;
mod docx;
mod error;
mod image;
mod model;
mod opc;
mod package;
mod paragraph;
mod resolve;
mod table;
mod xml;

pub use condition::evaluate as evaluate_condition;
pub use docx::Engine;
pub use error::Error;
pub use image::{HttpFetcher, ImageFetcher};
pub use model::{
    DirectiveKind, GenerateOptions, Generated, GenerationReport, Outcome, ReportEntry,
    WatermarkOptions,
};
pub use package::Package;
pub use resolve::{resolve, stringify};
pub use table::generate_table;

use std::path::Path;

use serde_json::Value;

/// Fill the template at `input` with `data` and write the result to `output`,
/// fetching images over HTTP.
pub fn fill_docx(
    input: &Path,
    data: &Value,
    options: &GenerateOptions,
    output: &Path,
) -> Result<GenerationReport, Error> {
    let engine = Engine::from_env()?;
    let template = std::fs::read(input)?;
    let generated = engine.generate(&template, data, options)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, &generated.bytes)?;
    Ok(generated.report)
}
