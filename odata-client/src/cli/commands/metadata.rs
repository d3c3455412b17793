//! `metadata` command: summary of the service model

use std::fmt::Write as _;

use anyhow::Result;
use colored::*;

use crate::api::metadata::{MetadataModel, OperationKind, TypeRef};
use crate::cli::GlobalArgs;

pub async fn handle_metadata_command(global: &GlobalArgs) -> Result<()> {
    let client = global.connect().await?;
    print!("{}", describe_model(client.model(), global.is_verbose()));
    Ok(())
}

fn type_label(type_ref: &TypeRef) -> String {
    match type_ref {
        TypeRef::Primitive(primitive) => primitive.edm_name(),
        TypeRef::Complex(name) | TypeRef::Enum(name) | TypeRef::Entity(name) => name.clone(),
        TypeRef::Collection(inner) => format!("Collection({})", type_label(inner)),
    }
}

/// Render entity sets, singletons, operation imports and (verbose) entity types
pub fn describe_model(model: &MetadataModel, verbose: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", "OData".bold(), model.version().to_string().cyan());

    for container in model.containers() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{} {}", "Container".bold(), container.qualified_name().bright_green());

        for set in container.entity_sets.values() {
            let key = model
                .key_properties(&set.entity_type)
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "  {} : {} [{}]",
                set.name.bright_white().bold(),
                set.entity_type.dimmed(),
                key.yellow()
            );
        }
        for singleton in container.singletons.values() {
            let _ = writeln!(
                out,
                "  {} : {} (singleton)",
                singleton.name.bright_white().bold(),
                singleton.entity_type.dimmed()
            );
        }
        for import in container.operation_imports.values() {
            let kind = match import.kind {
                OperationKind::Function => "function",
                OperationKind::Action => "action",
            };
            let returns = import
                .return_type
                .as_ref()
                .map(|t| format!(" -> {}", type_label(t)))
                .unwrap_or_default();
            let _ = writeln!(out, "  {}() {}{}", import.name.magenta(), kind.dimmed(), returns);
        }
    }

    if verbose {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", "Entity types".bold());
        for entity_type in model.entity_types() {
            let base = entity_type
                .base_type
                .as_ref()
                .map(|b| format!(" : {}", b))
                .unwrap_or_default();
            let _ = writeln!(out, "  {}{}", entity_type.qualified_name().bright_white(), base.dimmed());
            for property in &entity_type.properties {
                let marker = if entity_type.key.contains(&property.name) { "*" } else { " " };
                let _ = writeln!(
                    out,
                    "   {}{} {}",
                    marker.yellow(),
                    property.name,
                    type_label(&property.type_ref).dimmed()
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::fixtures::V4_METADATA;

    #[test]
    fn test_describe_model() {
        colored::control::set_override(false);
        let model = MetadataModel::parse(V4_METADATA).unwrap();

        let summary = describe_model(&model, false);
        assert!(summary.contains("Stores : Demo.Services.Store [Region, City]"));
        assert!(summary.contains("Boss : Demo.Services.Employee (singleton)"));
        assert!(summary.contains("TopCustomers() function -> Collection(Demo.Services.Customer)"));
        assert!(!summary.contains("Entity types"));

        let detailed = describe_model(&model, true);
        assert!(detailed.contains("*CustomerID Edm.Int32"));
        assert!(detailed.contains("Emails Collection(Edm.String)"));
    }
}
