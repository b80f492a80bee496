//! Terminal output formatting.

use colored::Colorize;

use cartography_core::permission::PrincipalMapping;
use cartography_graph::GraphCounts;

/// Print principal to resource mappings grouped by resource.
pub fn print_mappings(mappings: &[PrincipalMapping]) {
    if mappings.is_empty() {
        println!("{}", "No principal holds the requested permissions.".dimmed());
        return;
    }

    let mut current: Option<&str> = None;
    for mapping in mappings {
        if current != Some(mapping.resource_arn.as_str()) {
            println!("{}", mapping.resource_arn.cyan().bold());
            current = Some(mapping.resource_arn.as_str());
        }
        println!("  {} {}", "<-".dimmed(), mapping.principal_arn);
    }

    println!();
    println!("{} {}", mappings.len().to_string().green().bold(), "relationships");
}

/// Print node and relationship counts.
pub fn print_counts(counts: &GraphCounts) {
    println!("{}", "Graph".bold());
    println!("  {:<15} {}", "Nodes:", counts.nodes.to_string().yellow());
    println!("  {:<15} {}", "Relationships:", counts.relationships.to_string().yellow());
}
