use clap::Parser;
use std::path::PathBuf;

use docxside_fill::{GenerateOptions, Outcome, WatermarkOptions};

#[derive(Parser)]
#[command(name = "docxside-fill", about = "Fill a DOCX template with JSON data")]
struct Args {
    /// Template DOCX file
    template: PathBuf,
    /// JSON file with the data context
    data: PathBuf,
    /// Output DOCX file (defaults to generated-document.docx)
    output: Option<PathBuf>,
    /// Text for every header part; may contain placeholders
    #[arg(long)]
    header: Option<String>,
    /// Text for every footer part; may contain placeholders
    #[arg(long)]
    footer: Option<String>,
    /// Watermark text added behind the content of every header
    #[arg(long)]
    watermark: Option<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    for path in [&args.template, &args.data] {
        if !path.is_file() {
            eprintln!("Error: not a file: {}", path.display());
            std::process::exit(1);
        }
    }

    let data: serde_json::Value = match std::fs::read_to_string(&args.data)
        .map_err(docxside_fill::Error::from)
        .and_then(|text| serde_json::from_str(&text).map_err(docxside_fill::Error::from))
    {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error: {}: {e}", args.data.display());
            std::process::exit(1);
        }
    };

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(GenerateOptions::default().resolved_file_name()));
    let options = GenerateOptions {
        file_name: output.file_name().map(|n| n.to_string_lossy().into_owned()),
        header: args.header,
        footer: args.footer,
        watermark: args.watermark.map(WatermarkOptions::new),
    };

    match docxside_fill::fill_docx(&args.template, &data, &options, &output) {
        Ok(report) => {
            for entry in &report.entries {
                if let Outcome::Failed(reason) = &entry.outcome {
                    eprintln!("warning: {} '{}' in {}: {reason}", entry.kind, entry.key, entry.part);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
