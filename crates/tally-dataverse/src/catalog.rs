use crate::{DataverseError, Result};
use serde::Deserialize;
use tally::EntityTarget;

/// Query selecting just what a catalog entry needs.
pub const ENTITY_DEFINITIONS_QUERY: &str = "EntityDefinitions?$select=LogicalName,DisplayName";

#[derive(Deserialize)]
struct Collection {
    value: Vec<Definition>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Definition {
    logical_name: String,
    #[serde(default)]
    display_name: Option<Label>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Label {
    #[serde(default)]
    localized_labels: Vec<LocalizedLabel>,
    #[serde(default)]
    user_localized_label: Option<LocalizedLabel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LocalizedLabel {
    label: String,
}

/// Decodes an `EntityDefinitions` response into unselected targets ordered by
/// logical name.
///
/// The display name is the first localized label, then the user's label, and
/// empty when neither exists.
///
/// # Errors
///
/// Returns [`DataverseError::Decode`] if `body` is not an entity definition
/// collection.
pub fn parse_entity_definitions(body: &str) -> Result<Vec<EntityTarget>> {
    let collection: Collection = serde_json::from_str(body)
        .map_err(|e| DataverseError::Decode(format!("entity definitions: {e}")))?;

    let mut targets: Vec<EntityTarget> = collection
        .value
        .into_iter()
        .map(|definition| {
            let display = definition
                .display_name
                .and_then(|label| {
                    label
                        .localized_labels
                        .into_iter()
                        .next()
                        .or(label.user_localized_label)
                })
                .map(|label| label.label)
                .unwrap_or_default();
            EntityTarget::new(definition.logical_name, display)
        })
        .collect();
    targets.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));

    Ok(targets)
}
