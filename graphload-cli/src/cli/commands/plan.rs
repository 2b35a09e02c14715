//! Print the dependency plan for an input file

use std::path::Path;

use anyhow::{Context, Result};
use colored::*;

use graphload::bulk::{DependencyCategory, DependencyGraph, check_refs};

use crate::cli::{input, load_schema};

pub fn handle_plan(schema_path: &Path, input_path: &Path) -> Result<()> {
    let schema = load_schema(schema_path)?;
    let sets = input::load_record_sets(input_path)?;

    let names: Vec<&str> = sets.iter().map(|s| s.entity.as_str()).collect();
    let graph = DependencyGraph::build(&schema, &names).context("Failed to build dependency graph")?;
    check_refs(&schema, &sets).context("Invalid record refs")?;
    let order = graph.insert_order()?;

    println!("{}", "Creation order".bold());
    for (step, name) in order.iter().enumerate() {
        let count = sets
            .iter()
            .find(|s| &s.entity == name)
            .map_or(0, |s| s.len());
        let category = graph.categorize(name);
        let label = match category {
            DependencyCategory::Standalone => category.label().green(),
            DependencyCategory::Dependent => category.label().yellow(),
            DependencyCategory::Junction => category.label().magenta(),
        };

        println!(
            "  {}. {} ({} records, {})",
            step + 1,
            name.cyan(),
            count,
            label
        );

        if let Some(entity) = graph.entities.get(name) {
            for lookup in entity.internal_lookups() {
                if lookup.target_entity != *name {
                    println!(
                        "       {} {} -> {}",
                        "after".dimmed(),
                        lookup.field_name,
                        lookup.target_entity
                    );
                }
            }
            for lookup in entity.external_lookups() {
                println!(
                    "       {} {} -> {} (already stored)",
                    "uses".dimmed(),
                    lookup.field_name,
                    lookup.target_entity
                );
            }
        }
    }

    let total: usize = sets.iter().map(|s| s.len()).sum();
    println!();
    println!("{} records across {} entity types", total.to_string().bold(), order.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
[[entity]]
name = "author"
fields = [{ name = "name", kind = "text" }]

[[entity]]
name = "book"
fields = [{ name = "title", kind = "text" }]

[[entity.reference]]
field = "author_id"
target = "author"
on_delete = "cascade"
"#;

    fn plan_for(input: &str) -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.toml");
        let input_path = dir.path().join("input.json");
        std::fs::write(&schema_path, SCHEMA).unwrap();
        std::fs::write(&input_path, input).unwrap();
        handle_plan(&schema_path, &input_path)
    }

    #[test]
    fn test_plan_accepts_valid_refs() {
        let result = plan_for(
            r#"[
                {"entity": "book", "records": [{"values": {"title": "Notes", "author_id": {"$ref": {"entity": "author", "index": 0}}}}]},
                {"entity": "author", "records": [{"values": {"name": "Ada"}}]}
            ]"#,
        );
        assert!(result.is_ok(), "{:?}", result);
    }

    #[test]
    fn test_plan_rejects_out_of_range_ref() {
        let result = plan_for(
            r#"[
                {"entity": "book", "records": [{"values": {"title": "Notes", "author_id": {"$ref": {"entity": "author", "index": 3}}}}]},
                {"entity": "author", "records": [{"values": {"name": "Ada"}}]}
            ]"#,
        );
        assert!(result.is_err());
    }
}
