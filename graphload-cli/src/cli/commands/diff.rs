//! Compare two input files

use std::path::Path;

use anyhow::Result;
use colored::*;

use graphload::bulk::diff_records;
use graphload::records::{Instance, RecordSet};

use crate::cli::{input, load_schema};

pub fn handle_diff(schema_path: &Path, first_path: &Path, second_path: &Path, fields: &[String]) -> Result<()> {
    let schema = load_schema(schema_path)?;
    let first = input::load_record_sets(first_path)?;
    let second = input::load_record_sets(second_path)?;

    let mut entities: Vec<&str> = first.iter().map(|s| s.entity.as_str()).collect();
    for set in &second {
        if !entities.contains(&set.entity.as_str()) {
            entities.push(&set.entity);
        }
    }

    for entity in entities {
        let left = find_or_empty(&first, entity);
        let right = find_or_empty(&second, entity);
        let diff = diff_records(&schema, &left, &right, fields)?;

        let mark = if diff.is_identical() {
            "=".bright_green()
        } else {
            "≠".bright_yellow()
        };
        println!(
            "{} {}: {} matched, {} only in first, {} only in second",
            mark,
            entity.cyan(),
            diff.matched_first.len(),
            diff.only_in_first.len().to_string().red(),
            diff.only_in_second.len().to_string().green()
        );
        for record in &diff.only_in_first {
            println!("    {} {}", "-".red(), describe(record));
        }
        for record in &diff.only_in_second {
            println!("    {} {}", "+".green(), describe(record));
        }
    }

    Ok(())
}

fn find_or_empty(sets: &[RecordSet], entity: &str) -> RecordSet {
    sets.iter()
        .find(|s| s.entity == entity)
        .cloned()
        .unwrap_or_else(|| RecordSet::new(entity, Vec::new()))
}

fn describe(record: &Instance) -> String {
    let values: Vec<String> = record
        .values
        .iter()
        .map(|(field, value)| format!("{}={}", field, value))
        .collect();
    match record.key {
        Some(key) => format!("#{} {}", key, values.join(" ")),
        None => values.join(" "),
    }
}
