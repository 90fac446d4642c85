//! Table formatting using comfy-table.

use batchline::RunReport;
use batchline_types::EventRecord;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use super::colors::SemanticStyle;

const RECORD_COLUMNS: [&str; 5] = ["id", "name", "age", "city", "created_date"];

fn styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Creates a table of stored event records.
pub fn records_table(records: &[EventRecord]) -> Table {
    let mut table = styled_table();

    let header_cells: Vec<Cell> = RECORD_COLUMNS
        .iter()
        .map(|col| {
            if super::no_color() {
                Cell::new(col)
            } else {
                Cell::new(col).add_attribute(Attribute::Bold).fg(Color::Cyan)
            }
        })
        .collect();
    table.set_header(header_cells);

    for record in records {
        table.add_row(vec![
            Cell::new(record.id),
            Cell::new(&record.name),
            Cell::new(record.age).set_alignment(CellAlignment::Right),
            Cell::new(&record.city),
            Cell::new(record.created_date_string()),
        ]);
    }

    table
}

/// Prints stored records followed by a row count.
pub fn print_records_table(records: &[EventRecord]) {
    if records.is_empty() {
        println!("{}", "No events stored.".muted());
        return;
    }

    println!("{}", records_table(records));

    let count = records.len();
    let row_word = if count == 1 { "row" } else { "rows" };
    println!("{}", format!("({count} {row_word})").muted());
}

/// Creates a key-value table summarizing a consumer run.
pub fn report_table(report: &RunReport) -> Table {
    let entries = [
        ("Stopped", report.stop_reason.to_string()),
        ("Batches persisted", report.batches_persisted.to_string()),
        ("Batches failed", report.batches_failed.to_string()),
        ("Records acknowledged", report.records_acked.to_string()),
        ("Records released", report.records_released.to_string()),
        ("Messages rejected", report.rejected.to_string()),
        ("Ack failures", report.ack_failures.to_string()),
        ("Pending (unsealed)", report.pending.to_string()),
    ];

    let mut table = styled_table();
    for (key, value) in entries {
        let key_cell = if super::no_color() {
            Cell::new(key)
        } else {
            Cell::new(key).fg(Color::DarkGrey)
        };
        table.add_row(vec![key_cell, Cell::new(value)]);
    }
    table
}

pub fn print_report_table(report: &RunReport) {
    println!("{}", report_table(report));
}
