//! Inspect command implementation.

use coursesync_model::{CourseId, NodeKind};
use coursesync_storage::FileCourseStore;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

/// Course inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// The course.
    pub course_id: String,
    /// Course title as last synced.
    pub title: Option<String>,
    /// Committed transactions.
    pub revision: u64,
    /// SHA-256 fingerprint of the hierarchy, hex encoded.
    pub fingerprint: String,
    /// Nodes in depth-first order.
    pub nodes: Vec<NodeSummary>,
    /// Archived mastery records.
    pub archived_masteries: usize,
}

/// One node of an inspected course.
#[derive(Debug, Serialize)]
pub struct NodeSummary {
    /// External ID.
    pub id: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Display name.
    pub display_name: String,
    /// Position among siblings.
    pub position: u32,
    /// Active mastery records on this node.
    pub masteries: usize,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    course: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileCourseStore::open(path)?;

    let Some(course) = course else {
        let courses = store.course_files()?;
        match format {
            "json" => println!("{}", serde_json::to_string_pretty(&courses)?),
            _ => {
                println!("{} synced course(s)", courses.len());
                for course in courses {
                    println!("  {course}");
                }
            }
        }
        return Ok(());
    };

    let result = inspect(&store, &CourseId::new(course))?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Summarizes one course's committed record.
pub fn inspect(
    store: &FileCourseStore,
    course: &CourseId,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let record = store.read_record(course)?;
    let tree = record.tree()?;

    let nodes = tree
        .depth_first()
        .map(|node| NodeSummary {
            id: node.external_id.to_string(),
            kind: node.kind,
            display_name: node.display_name.clone(),
            position: node.position,
            masteries: record.masteries_for_topic(&node.external_id).len(),
        })
        .collect();

    Ok(InspectResult {
        course_id: course.to_string(),
        title: record.title.clone(),
        revision: record.revision,
        fingerprint: hex(&tree.fingerprint()),
        nodes,
        archived_masteries: record.archived.len(),
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Course: {}", result.course_id);
    println!("Title: {}", result.title.as_deref().unwrap_or("(untitled)"));
    println!("Revision: {}", result.revision);
    println!("Fingerprint: {}", result.fingerprint);
    println!();
    println!("Hierarchy ({} nodes):", result.nodes.len());
    for node in &result.nodes {
        let indent = "  ".repeat(usize::from(node.kind.depth()) + 1);
        print!("{indent}[{}] {} ({})", node.id, node.display_name, node.kind);
        if node.masteries > 0 {
            print!(" - {} mastery record(s)", node.masteries);
        }
        println!();
    }
    println!();
    println!("Archived mastery records: {}", result.archived_masteries);
}
