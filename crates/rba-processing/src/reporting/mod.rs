//! Run report module.
//!
//! A [`RunReport`] wraps the [`RunSummary`](crate::types::RunSummary) of a run
//! with its input and a generation time. It is used for:
//! - JSON output to stdout (`--json` CLI flag)
//! - JSON file output (`--report` CLI flag)
//! - Programmatic access in library mode
//!
//! # Example
//!
//! ```rust,ignore
//! use rba_processing::reporting::RunReport;
//!
//! let summary = pipeline.run(&FileSource::new("data/rba-dataset.csv"))?;
//! let report = RunReport::new("data/rba-dataset.csv", summary);
//!
//! // Print as JSON
//! println!("{}", report.to_json()?);
//!
//! // Or write to file
//! report.write_to_file("output/rba-dataset_report.json")?;
//! ```

mod report;

pub use report::RunReport;
