use crate::db::QueryRow;
use comfy_table::presets::NOTHING;
use comfy_table::{CellAlignment, ContentArrangement, Table};
use serde_json::Value as JsonValue;
use std::io::{self, Write};

const MAX_VALUE_WIDTH: usize = 50;

pub fn truncate_value(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        format!("{}...", s.chars().take(max_len - 3).collect::<String>())
    } else {
        s.to_string()
    }
}

fn display_value(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => "NULL".to_string(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Prints rows as a borderless, left-aligned table followed by a row count.
/// Column order comes from the first row.
pub fn render<W: Write>(out: &mut W, rows: &[QueryRow]) -> io::Result<()> {
    let Some(first) = rows.first() else {
        writeln!(out, "No results to display.")?;
        return Ok(());
    };

    let columns: Vec<String> = first.keys().cloned().collect();

    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(columns.clone());

    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| truncate_value(&display_value(row.get(c)), MAX_VALUE_WIDTH))
            .collect();
        table.add_row(cells);
    }

    for column in table.column_iter_mut() {
        column.set_cell_alignment(CellAlignment::Left);
    }

    writeln!(out, "{table}")?;
    writeln!(out, "\nTotal rows: {}", rows.len())
}
