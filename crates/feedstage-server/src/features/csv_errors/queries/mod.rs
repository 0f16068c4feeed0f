//! CSV error queries

pub mod export_csv_errors;

pub use export_csv_errors::{CsvErrorExport, ExportCsvErrorsError, ExportCsvErrorsQuery};
