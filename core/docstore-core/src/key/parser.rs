//! Key definition DSL parser.
//!
//! ```text
//! (compA:type, compB:type), -compC:type, compD:type
//! ```
//!
//! The optional parenthesized group names the partition key; without it the
//! first component is the partition key. Remaining components are clustering
//! components, ascending unless prefixed with `-` (`+` is accepted and means
//! ascending).

use crate::error::{DocError, DocResult};
use crate::key::definition::{ClusteringKeyComponent, KeyComponent, KeyDefinition, SortOrder};
use crate::key::types::ScalarType;

/// Pure, deterministic DSL → [`KeyDefinition`] compiler.
pub struct KeyDefinitionParser;

impl KeyDefinitionParser {
    pub fn parse(input: &str) -> DocResult<KeyDefinition> {
        let text = input.trim();
        if text.is_empty() {
            return Err(DocError::key_definition("key definition is empty", input));
        }

        let (partition_text, rest) = if let Some(stripped) = text.strip_prefix('(') {
            let close = stripped
                .find(')')
                .ok_or_else(|| DocError::key_definition("unbalanced '(' in partition key", input))?;
            let rest = stripped[close + 1..].trim_start();
            let rest = if rest.is_empty() {
                ""
            } else {
                let clustering = rest.strip_prefix(',').ok_or_else(|| {
                    DocError::key_definition("expected ',' after partition key group", input)
                })?;
                if clustering.trim().is_empty() {
                    return Err(DocError::key_definition(
                        "trailing ',' after partition key group",
                        input,
                    ));
                }
                clustering
            };
            (&stripped[..close], Some(rest))
        } else {
            (text, None)
        };

        let mut partition = Vec::new();
        let mut clustering = Vec::new();

        match rest {
            Some(rest) => {
                for part in split_components(partition_text, input)? {
                    partition.push(parse_partition_component(part, input)?);
                }
                if !rest.trim().is_empty() {
                    for part in split_components(rest, input)? {
                        clustering.push(parse_clustering_component(part, input)?);
                    }
                }
            }
            None => {
                let mut parts = split_components(partition_text, input)?.into_iter();
                if let Some(first) = parts.next() {
                    partition.push(parse_partition_component(first, input)?);
                }
                for part in parts {
                    clustering.push(parse_clustering_component(part, input)?);
                }
            }
        }

        KeyDefinition::new(partition, clustering).map_err(|e| match e {
            DocError::KeyDefinition { message, .. } => DocError::key_definition(message, input),
            other => other,
        })
    }
}

fn split_components<'a>(text: &'a str, input: &str) -> DocResult<Vec<&'a str>> {
    if text.contains('(') || text.contains(')') {
        return Err(DocError::key_definition("unexpected parenthesis", input));
    }
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(DocError::key_definition("empty key component", input));
    }
    Ok(parts)
}

fn parse_partition_component(text: &str, input: &str) -> DocResult<KeyComponent> {
    if text.starts_with('-') || text.starts_with('+') {
        return Err(DocError::key_definition(
            format!("partition component '{text}' cannot carry a sort order"),
            input,
        ));
    }
    parse_name_and_type(text, input)
}

fn parse_clustering_component(text: &str, input: &str) -> DocResult<ClusteringKeyComponent> {
    let (order, body) = split_sign(text);
    let component = parse_name_and_type(body, input)?;
    Ok(ClusteringKeyComponent { component, order })
}

pub(crate) fn split_sign(text: &str) -> (SortOrder, &str) {
    if let Some(body) = text.strip_prefix('-') {
        (SortOrder::Descending, body.trim_start())
    } else if let Some(body) = text.strip_prefix('+') {
        (SortOrder::Ascending, body.trim_start())
    } else {
        (SortOrder::Ascending, text)
    }
}

/// `name:type`
pub(crate) fn parse_name_and_type(text: &str, input: &str) -> DocResult<KeyComponent> {
    let (name, ty) = text.split_once(':').ok_or_else(|| {
        DocError::key_definition(format!("component '{text}' is not of the form name:type"), input)
    })?;
    let name = name.trim();
    if !is_property_name(name) {
        return Err(DocError::key_definition(
            format!("invalid component name '{name}'"),
            input,
        ));
    }
    let scalar_type = ScalarType::parse(ty)
        .ok_or_else(|| DocError::key_definition(format!("unsupported type '{}'", ty.trim()), input))?;
    Ok(KeyComponent::new(name, scalar_type))
}

pub(crate) fn is_property_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
