use std::time::Instant;

use anyhow::{Context, Result};
use colored::*;

use super::{CreateCommand, DeleteCommand, GetCommand};
use crate::api::client::ODataClient;
use crate::api::codec::{ChangeState, EntityKey, Format, Payload, PayloadCodec, Value};
use crate::api::constants::media;
use crate::api::metadata::{MetadataModel, TypeRef};
use crate::api::request::{QueryOptions, RequestSpec, ResourcePath, parse_key_predicate};
use crate::cli::GlobalArgs;

/// Handle `get`: one entity when keys are given, otherwise a page (or all pages) of the set
pub async fn handle_get_command(global: &GlobalArgs, args: GetCommand) -> Result<()> {
    let format = args
        .format
        .as_deref()
        .map(str::parse::<Format>)
        .transpose()
        .context("Invalid --format")?;

    let client = global.connect().await?;
    let start = Instant::now();

    let payload = if args.key.is_empty() {
        let mut query = QueryOptions::new();
        if let Some(filter) = args.filter {
            query = query.filter(filter);
        }
        if !args.select.is_empty() {
            query = query.select(args.select);
        }
        if !args.expand.is_empty() {
            query = query.expand(args.expand);
        }
        if let Some(top) = args.top {
            query = query.top(top);
        }

        if args.all {
            Payload::Collection(
                client
                    .read_all(&args.entity_set, query)
                    .await
                    .with_context(|| format!("Failed to read {}", args.entity_set))?,
            )
        } else {
            let mut spec = RequestSpec::read(ResourcePath::entity_set(&args.entity_set)).query(query);
            if let Some(format) = format {
                spec = spec.accept(format);
            }
            fetch(&client, &spec, &args.entity_set).await?
        }
    } else {
        let key = parse_key(client.model(), &args.entity_set, &args.key)?;
        let mut spec = RequestSpec::read(ResourcePath::entity(&args.entity_set, key));
        if !args.expand.is_empty() {
            spec = spec.query(QueryOptions::new().expand(args.expand));
        }
        if let Some(format) = format {
            spec = spec.accept(format);
        }
        fetch(&client, &spec, &args.entity_set).await?
    };

    if global.is_verbose() {
        let summary = match &payload {
            Payload::Collection(c) => format!("{} entities", c.entities.len()),
            _ => "1 entity".to_string(),
        };
        println!(
            "Read {} in {:.2}ms",
            summary.bright_green(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        println!();
    }

    println!("{}", render(client.codec(), &payload, format.unwrap_or_default())?);
    Ok(())
}

/// Handle `create` with a JSON object in the set's entity type
pub async fn handle_create_command(global: &GlobalArgs, args: CreateCommand) -> Result<()> {
    let client = global.connect().await?;
    let entity_type = client
        .model()
        .resolve_entity_set(&args.entity_set)
        .map(|set| set.entity_type.clone())
        .with_context(|| format!("Unknown entity set: {}", args.entity_set))?;

    let mut entity = client
        .codec()
        .deserialize_entity(args.data.as_bytes(), media::APPLICATION_JSON, &entity_type)
        .context("Failed to read --data as an entity")?;
    entity.state = ChangeState::Created;

    let spec = RequestSpec::create(ResourcePath::entity_set(&args.entity_set), entity);
    let outcome = client
        .execute(&spec)
        .await
        .with_context(|| format!("Failed to create entity in {}", args.entity_set))?;

    let location = outcome.entity_id.as_deref().unwrap_or("(no location returned)");
    println!("{} {}", "Created".bright_green().bold(), location.cyan());
    if let Some(payload) = &outcome.payload {
        println!("{}", render(client.codec(), payload, Format::default())?);
    }
    Ok(())
}

pub async fn handle_delete_command(global: &GlobalArgs, args: DeleteCommand) -> Result<()> {
    let client = global.connect().await?;
    let key = parse_key(client.model(), &args.entity_set, &args.key)?;
    let path = ResourcePath::entity(&args.entity_set, key);
    let uri = client.uri_for(&path)?;

    client
        .execute(&RequestSpec::delete(path))
        .await
        .with_context(|| format!("Failed to delete {}", uri))?;
    println!("{} {}", "Deleted".bright_red().bold(), uri.cyan());
    Ok(())
}

/// Parse `name=value` arguments into a key of the set's entity type
///
/// A single argument may also be a key predicate such as `(Region='WA',City='Seattle')`
/// or a bare value for a single-property key.
pub fn parse_key(model: &MetadataModel, entity_set: &str, args: &[String]) -> Result<EntityKey> {
    let set = model
        .resolve_entity_set(entity_set)
        .with_context(|| format!("Unknown entity set: {}", entity_set))?;
    let key_properties = model.key_properties(&set.entity_type);

    if let [single] = args
        && single.starts_with('(')
    {
        return parse_key_predicate(model, &set.entity_type, single)
            .with_context(|| format!("Invalid key predicate: {}", single));
    }

    let mut pairs = Vec::with_capacity(args.len());
    for arg in args {
        let (name, text) = match arg.split_once('=') {
            Some((name, text)) => (name.trim(), text),
            None if key_properties.len() == 1 && args.len() == 1 => (key_properties[0].name.as_str(), arg.as_str()),
            None => anyhow::bail!("Key must be given as name=value: {}", arg),
        };
        let property = key_properties
            .iter()
            .find(|p| p.name == name)
            .with_context(|| format!("{} is not a key property of {}", name, set.entity_type))?;
        let value = match &property.type_ref {
            TypeRef::Primitive(primitive) => Value::parse_text(text, primitive)
                .map_err(|reason| anyhow::anyhow!("Invalid value for {}: {}", name, reason))?,
            other => anyhow::bail!("Key property {} has unsupported type {:?}", name, other),
        };
        pairs.push((property.name.clone(), value));
    }

    let missing: Vec<&str> = key_properties
        .iter()
        .map(|p| p.name.as_str())
        .filter(|name| !pairs.iter().any(|(n, _)| n == name))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("Missing key properties: {}", missing.join(", "));
    }

    // declared order, regardless of argument order
    pairs.sort_by_key(|(name, _)| key_properties.iter().position(|p| &p.name == name));
    Ok(EntityKey(pairs))
}

async fn fetch(client: &ODataClient, spec: &RequestSpec, entity_set: &str) -> Result<Payload> {
    let outcome = client
        .execute(spec)
        .await
        .with_context(|| format!("Failed to read {}", entity_set))?;
    outcome
        .payload
        .with_context(|| format!("Server returned no content for {}", entity_set))
}

/// Re-encode a decoded payload for display
fn render(codec: &PayloadCodec, payload: &Payload, format: Format) -> Result<String> {
    let bytes = codec
        .serialize(payload, format)
        .context("Failed to encode output")?;
    match format {
        Format::Json(_) => {
            let json: serde_json::Value = serde_json::from_slice(&bytes).context("Failed to format JSON output")?;
            serde_json::to_string_pretty(&json).context("Failed to format JSON output")
        }
        Format::Atom => Ok(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::fixtures::V4_METADATA;

    fn model() -> MetadataModel {
        MetadataModel::parse(V4_METADATA).unwrap()
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_composite_key_in_declared_order() {
        let key = parse_key(&model(), "Stores", &args(&["City=Seattle", "Region=WA"])).unwrap();
        assert_eq!(
            key,
            EntityKey(vec![
                ("Region".to_string(), Value::from("WA")),
                ("City".to_string(), Value::from("Seattle")),
            ])
        );

        let predicate = parse_key(&model(), "Stores", &args(&["(Region='WA',City='Seattle')"])).unwrap();
        assert_eq!(predicate, key);
    }

    #[test]
    fn test_parse_single_key_shorthand() {
        let key = parse_key(&model(), "Customers", &args(&["42"])).unwrap();
        assert_eq!(key, EntityKey::single("CustomerID", 42));
    }

    #[test]
    fn test_parse_key_errors() {
        let model = model();
        assert!(parse_key(&model, "Nowhere", &args(&["Id=1"])).is_err());
        assert!(parse_key(&model, "Stores", &args(&["Region=WA"])).is_err());
        assert!(parse_key(&model, "Customers", &args(&["Name=Ann"])).is_err());
        assert!(parse_key(&model, "Customers", &args(&["CustomerID=abc"])).is_err());
    }
}
