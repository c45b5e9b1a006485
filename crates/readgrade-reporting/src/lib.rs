pub mod export;
pub mod types;

pub use export::{
    export_csv, export_json, export_markdown, export_results, export_text, export_to_path,
    extraction_report, extraction_report_at,
};
pub use types::{ExportFormat, ReportError, reading_level_detail};
