use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::bag::BagInfo;
use crate::config::MetadataConfig;
use crate::domain::TabledapUrl;
use crate::error::BagitifyError;

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub data_type: String,
    pub data_value: Value,
}

/// `row_type -> variable -> attribute`, as listed by `info/<dataset>/index.json`.
pub type TabledapMetadata = BTreeMap<String, BTreeMap<String, BTreeMap<String, Attribute>>>;

#[derive(Debug, Deserialize)]
struct InfoDocument {
    table: InfoTable,
}

#[derive(Debug, Deserialize)]
struct InfoTable {
    rows: Vec<Vec<Value>>,
}

pub fn parse_tabledap_metadata(document: &Value) -> Result<TabledapMetadata, BagitifyError> {
    let document = InfoDocument::deserialize(document)
        .map_err(|err| BagitifyError::UnexpectedResponse(format!("metadata table: {err}")))?;

    let mut nested = TabledapMetadata::new();
    for row in document.table.rows {
        let [row_type, variable, attribute, data_type, data_value] =
            <[Value; 5]>::try_from(row).map_err(|row| {
                BagitifyError::UnexpectedResponse(format!(
                    "metadata row with {} columns",
                    row.len()
                ))
            })?;
        nested
            .entry(text(row_type))
            .or_default()
            .entry(text(variable))
            .or_default()
            .insert(
                text(attribute),
                Attribute {
                    data_type: text(data_type),
                    data_value,
                },
            );
    }
    Ok(nested)
}

pub fn global_attribute<'a>(metadata: &'a TabledapMetadata, name: &str) -> Option<&'a Attribute> {
    metadata
        .get("attribute")
        .and_then(|variables| variables.get("NC_GLOBAL"))
        .and_then(|attributes| attributes.get(name))
}

/// Config fields plus the dataset-derived `External-*` fields.
pub fn prep_bag_info(
    url: &TabledapUrl,
    config: &MetadataConfig,
    metadata: &TabledapMetadata,
) -> Result<BagInfo, BagitifyError> {
    let title = global_attribute(metadata, "title")
        .map(|attribute| text(attribute.data_value.clone()))
        .ok_or_else(|| BagitifyError::MissingAttribute("NC_GLOBAL title".to_string()))?;

    let mut info = config.to_bag_info();
    info.insert(
        "External-Description".to_string(),
        vec![format!("Sensor data from station {}", url.dataset_name())],
    );
    info.insert("External-Identifier".to_string(), vec![title]);
    Ok(info)
}

fn text(value: Value) -> String {
    match value {
        Value::String(value) => value,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
