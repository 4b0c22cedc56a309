//! Terminal rendering of run reports and table inspections

use colored::*;
use content_sync::report::TableStatus;
use content_sync::run_log::LogLevel;
use content_sync::{SyncReport, TableInspection};

/// Print the table breakdown, totals and the last `tail` log lines
pub fn print_report(report: &SyncReport, tail: usize) {
    println!();
    println!(
        "{} {} ({})",
        "Run".bright_cyan(),
        report.direction.to_string().bright_yellow(),
        report.mode
    );

    for table in &report.tables {
        match &table.status {
            TableStatus::Synced => println!(
                "  {} {:<16} +{} ~{} -{} kept {} unchanged {}{}",
                "OK".green(),
                table.table,
                table.inserted,
                table.updated,
                table.deleted,
                table.preserved,
                table.unchanged,
                if table.failed_rows > 0 {
                    format!(" {}", format!("failed {}", table.failed_rows).red())
                } else {
                    String::new()
                }
            ),
            TableStatus::Skipped { reason } => {
                println!("  {} {:<16} {}", "SKIP".yellow(), table.table, reason.dimmed())
            },
        }
    }

    let s = &report.summary;
    println!();
    println!(
        "{} {} inserted, {} updated, {} deleted, {} failed rows",
        "Rows:".bright_cyan(),
        s.inserted,
        s.updated,
        s.deleted,
        s.failed_rows
    );
    println!(
        "{} {} synced, {} skipped",
        "Tables:".bright_cyan(),
        s.tables_synced,
        s.tables_skipped
    );
    if s.assets.candidates > 0 {
        println!(
            "{} {} candidates, {} deleted, {} in use, {} left in place",
            "Assets:".bright_cyan(),
            s.assets.candidates,
            s.assets.deleted,
            s.assets.skipped_in_use,
            s.assets.left_in_place + s.assets.skipped_probe_failed + s.assets.skipped_extraction_failed
        );
    }

    if tail > 0 && !report.log.is_empty() {
        println!();
        println!("{}", "Log:".bright_cyan());
        let start = report.log.len().saturating_sub(tail);
        for line in &report.log[start..] {
            let rendered = line.to_string();
            match line.level {
                LogLevel::Info => println!("  {}", rendered),
                LogLevel::Warn => println!("  {}", rendered.yellow()),
                LogLevel::Error => println!("  {}", rendered.red()),
            }
        }
    }

    println!();
    match &report.error {
        None => println!("{} in {} ms", "Done".green().bold(), report.duration_ms()),
        Some(error) => eprintln!("{} {}", "ERROR".red().bold(), error.message),
    }
}

pub fn print_inspection(inspection: &TableInspection) {
    println!();
    println!(
        "{} {}{}",
        "Table".bright_cyan(),
        inspection.table.bright_yellow(),
        if inspection.listed {
            String::new()
        } else {
            format!(" {}", "(not on the sync list)".dimmed())
        }
    );

    for (label, side) in [("staging", &inspection.staging), ("production", &inspection.production)] {
        println!();
        match side {
            Some(table) => {
                println!(
                    "  {} primary key: {}",
                    label.bright_blue(),
                    if table.primary_keys.is_empty() {
                        "none".dimmed().to_string()
                    } else {
                        table.primary_keys.join(", ")
                    }
                );
                for column in &table.columns {
                    let type_tag = table.column_types.get(column).map(String::as_str).unwrap_or("?");
                    println!("    {:<24} {}", column, type_tag.dimmed());
                }
            },
            None => println!("  {} {}", label.bright_blue(), "missing".red()),
        }
    }

    println!();
    println!(
        "{} {}",
        "Common columns:".bright_cyan(),
        if inspection.common_columns.is_empty() {
            "none".red().to_string()
        } else {
            inspection.common_columns.join(", ")
        }
    );
    println!(
        "{} {}",
        "Key columns:".bright_cyan(),
        match &inspection.key_columns {
            Some(keys) => keys.join(", "),
            None => "unresolved".red().to_string(),
        }
    );
}
