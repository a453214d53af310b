//! Table output formatting for CLI commands
//!
//! Formats experiment summaries, assignments and resolved patch operations
//! using comfy-table.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::domain::models::{Assignment, Experiment, PatchOperation};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
        }
    }

    pub fn with_colors(use_colors: bool) -> Self {
        Self { use_colors }
    }

    /// Parameters, metrics and patches of an experiment
    pub fn format_experiment(&self, experiment: &Experiment) -> String {
        let mut table = Self::create_base_table();
        table.set_header(vec![
            Cell::new("Kind").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Detail").add_attribute(Attribute::Bold),
        ]);

        for parameter in &experiment.parameters {
            table.add_row(vec![
                self.kind_cell("parameter", Color::Cyan),
                Cell::new(&parameter.name),
                Cell::new(format!("[{}, {}]", parameter.min, parameter.max)),
            ]);
        }
        for metric in &experiment.metrics {
            let goal = if metric.minimize { "minimize" } else { "maximize" };
            table.add_row(vec![
                self.kind_cell("metric", Color::Green),
                Cell::new(&metric.name),
                Cell::new(format!("{}, {goal}: {}", metric.metric_type, truncate_text(&metric.query, 48))),
            ]);
        }
        for (index, patch) in experiment.patches.iter().enumerate() {
            let target = if patch.target_ref.name.is_empty() {
                patch
                    .selector
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |s| format!("{} matching {s}", patch.target_ref.kind))
            } else {
                patch.target_ref.to_string()
            };
            table.add_row(vec![
                self.kind_cell("patch", Color::Yellow),
                Cell::new(format!("#{index}")),
                Cell::new(format!("{} patch of {target}", patch.patch_type)),
            ]);
        }

        table.to_string()
    }

    pub fn format_assignments(&self, assignments: &[Assignment]) -> String {
        let mut table = Self::create_base_table();
        table.set_header(vec![
            Cell::new("Parameter").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);
        for assignment in assignments {
            table.add_row(vec![Cell::new(&assignment.name), Cell::new(assignment.value)]);
        }
        table.to_string()
    }

    pub fn format_patch_operations(&self, operations: &[PatchOperation]) -> String {
        let mut table = Self::create_base_table();
        table.set_header(vec![
            Cell::new("Target").add_attribute(Attribute::Bold),
            Cell::new("Type").add_attribute(Attribute::Bold),
            Cell::new("Patch").add_attribute(Attribute::Bold),
        ]);
        for op in operations {
            let data = String::from_utf8_lossy(&op.data);
            let data_cell = if data.is_empty() && self.use_colors {
                Cell::new("(unrendered)").fg(Color::Red)
            } else if data.is_empty() {
                Cell::new("(unrendered)")
            } else {
                Cell::new(data)
            };
            table.add_row(vec![
                Cell::new(op.target_ref.to_string()),
                Cell::new(op.patch_type.to_string()),
                data_cell,
            ]);
        }
        table.to_string()
    }

    fn kind_cell(&self, kind: &str, color: Color) -> Cell {
        if self.use_colors {
            Cell::new(kind).fg(color)
        } else {
            Cell::new(kind)
        }
    }

    fn create_base_table() -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table
    }
}

/// Truncate text to a maximum width, appending "..." if truncated.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn supports_color() -> bool {
    env::var("NO_COLOR").is_err() && env::var("TERM").map(|t| t != "dumb").unwrap_or(true)
}
