//! Error report command.

use super::{block_on, Context};
use crate::error::Result;
use crate::recovery::ErrorReport;
use crate::repository::ChunkRepository;
use crate::sync::ChunkError;
use colored::Colorize;

/// Categorize a document's failed chunks and print recommendations.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn execute(ctx: &Context, document_id: &str) -> Result<()> {
    block_on(async {
        let services = ctx.services().await?;
        let failed = services.store.fetch_failed(document_id).await?;
        let errors: Vec<ChunkError> = failed.iter().filter_map(ChunkError::from_stored).collect();
        let report = services.recovery().generate_error_report(document_id, &errors);
        ctx.emit(&report, print_report)
    })
}

fn print_report(report: &ErrorReport) {
    if report.total_errors == 0 {
        println!("{} no failed chunks for {}", "Clean:".green(), report.document_id);
        return;
    }
    println!("{} {} ({} failed chunks)", "Error report:".bold(), report.document_id, report.total_errors);
    for (category, count) in &report.by_category {
        println!("  {:<12} {count}", category.as_str());
    }
    if !report.samples.is_empty() {
        println!();
        println!("{}", "Samples".dimmed());
        for (category, messages) in &report.samples {
            for message in messages {
                println!("  [{}] {message}", category.as_str());
            }
        }
    }
    if !report.recommendations.is_empty() {
        println!();
        println!("{}", "Recommendations".bold());
        for rec in &report.recommendations {
            println!("  - {rec}");
        }
    }
}
