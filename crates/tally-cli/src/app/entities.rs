use super::config::EntitySource;
use anyhow::Context;
use std::collections::HashSet;
use tally::EntityTarget;
use tally_dataverse::DataverseConnector;

/// Resolves `source` into the selection to count.
pub async fn load(
    source: &EntitySource,
    connector: &DataverseConnector,
) -> anyhow::Result<Vec<EntityTarget>> {
    let targets = match source {
        EntitySource::List(names) => dedup(
            names
                .iter()
                .map(|name| EntityTarget::selected(name.as_str())),
        ),
        EntitySource::File(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading entity list {}", path.display()))?;
            parse_entity_list(&contents)
        }
        EntitySource::Catalog => connector
            .retrieve_entities()
            .await
            .context("loading entity catalog")?
            .into_iter()
            .map(|target| target.with_selected(true))
            .collect(),
    };

    tracing::info!(entities = targets.len(), "Selection loaded");
    Ok(targets)
}

/// Parses `logical_name[;Display Name]` lines into selected targets.
///
/// Blank lines and lines starting with `#` are skipped. Repeated names keep
/// their first occurrence.
pub fn parse_entity_list(contents: &str) -> Vec<EntityTarget> {
    dedup(
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                let (logical, display) = line.split_once(';').unwrap_or((line, ""));
                EntityTarget::new(logical.trim(), display.trim()).with_selected(true)
            }),
    )
}

fn dedup(targets: impl IntoIterator<Item = EntityTarget>) -> Vec<EntityTarget> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|target| {
            let first = seen.insert(target.logical_name.clone());
            if !first {
                tracing::warn!(entity = %target.logical_name, "Ignoring repeated entity");
            }
            first
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_labels_and_comments() {
        let targets = parse_entity_list(
            "# core tables\n\
             account;Account\n\
             \n\
             contact ; Contact \n\
             lead\n\
             account;Duplicate\n",
        );

        assert_eq!(
            targets,
            [
                EntityTarget::new("account", "Account").with_selected(true),
                EntityTarget::new("contact", "Contact").with_selected(true),
                EntityTarget::selected("lead"),
            ]
        );
        assert_eq!(targets[2].label(), "lead");
    }
}
