use std::io::{self, Write};

use clap::ValueEnum;
use sluice_loader::PoolReport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One row per worker plus a total line.
    #[default]
    Human,
    /// The report as a single JSON document.
    Json,
}

pub fn write_report<W: Write>(
    out: &mut W,
    report: &PoolReport,
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &report.summary())?;
            writeln!(out)
        }
        OutputFormat::Human => write_table(out, report),
    }
}

fn write_table<W: Write>(out: &mut W, report: &PoolReport) -> io::Result<()> {
    writeln!(
        out,
        "{:<6}  {:<8}  {:>10}  {:>10}  {:>8}  ERROR",
        "WORKER", "OUTCOME", "IN", "OUT", "REJECTED"
    )?;
    writeln!(out, "{}", "-".repeat(72))?;

    for w in &report.workers {
        writeln!(
            out,
            "{:<6}  {:<8}  {:>10}  {:>10}  {:>8}  {}",
            w.worker,
            w.outcome.as_str(),
            w.num_input_rows,
            w.num_output_rows,
            w.num_rejected_rows,
            w.error().map(|e| e.to_string()).unwrap_or_default()
        )?;
    }

    writeln!(out, "{}", "-".repeat(72))?;
    writeln!(
        out,
        "{:<6}  {:<8}  {:>10}  {:>10}  {:>8}",
        "total",
        if report.success() { "success" } else { "failed" },
        report.num_input_rows(),
        report.num_output_rows(),
        report.num_rejected_rows()
    )
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
