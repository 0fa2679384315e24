//! Diff command implementation.

use coursesync_model::{diff, parse_outline, ChangeOperation, CourseTree, OutlineOptions};
use std::fs;
use std::path::Path;

/// Runs the diff command.
pub fn run(old: &Path, new: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ops = diff_files(old, new)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&ops)?);
        }
        _ => {
            if ops.is_empty() {
                println!("No changes");
            }
            for op in &ops {
                println!("{op}");
            }
        }
    }

    Ok(())
}

/// Computes the change set between two outline files.
pub fn diff_files(
    old: &Path,
    new: &Path,
) -> Result<Vec<ChangeOperation>, Box<dyn std::error::Error>> {
    let old = load_tree(old)?;
    let new = load_tree(new)?;
    Ok(diff(&old, &new)?)
}

fn load_tree(path: &Path) -> Result<CourseTree, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let outline = parse_outline(&text, &OutlineOptions::default())?;
    Ok(CourseTree::build(outline.nodes)?)
}
