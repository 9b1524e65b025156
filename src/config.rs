use std::collections::BTreeMap;

use crate::bag::BagInfo;

/// bag-info fields sourced from `BAGIT_*` environment variables.
pub const CONFIG_FIELDS: [&str; 6] = [
    "Bag-Group-Identifier",
    "Contact-Email",
    "Contact-Name",
    "Contact-Phone",
    "Organization-address",
    "Source-Organization",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Single(String),
    Multiple(Vec<String>),
}

impl FieldValue {
    pub fn values(&self) -> Vec<String> {
        match self {
            FieldValue::Single(value) => vec![value.clone()],
            FieldValue::Multiple(values) => values.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    Missing { field: String, variable: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::Missing { variable, .. } => {
                write!(f, "{variable} not set! Defaulting to empty string.")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataConfig {
    fields: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Clone)]
pub struct ConfigReport {
    pub config: MetadataConfig,
    pub warnings: Vec<ConfigWarning>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn from_env() -> ConfigReport {
        Self::from_vars(std::env::vars())
    }

    /// Every variable whose name starts with `BAGIT_<FIELD>` feeds that field;
    /// several matches make a multi-valued field, ordered by variable name.
    pub fn from_vars<I>(vars: I) -> ConfigReport
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: BTreeMap<String, String> = vars.into_iter().collect();
        let mut fields = BTreeMap::new();
        let mut warnings = Vec::new();

        for field in CONFIG_FIELDS {
            let variable = env_var_name(field);
            let mut matches = vars
                .iter()
                .filter(|(key, _)| key.starts_with(&variable))
                .map(|(_, value)| value.clone())
                .collect::<Vec<_>>();
            let value = match matches.len() {
                0 => {
                    warnings.push(ConfigWarning::Missing {
                        field: field.to_string(),
                        variable,
                    });
                    FieldValue::Single(String::new())
                }
                1 => FieldValue::Single(matches.remove(0)),
                _ => FieldValue::Multiple(matches),
            };
            fields.insert(field.to_string(), value);
        }

        ConfigReport {
            config: MetadataConfig { fields },
            warnings,
        }
    }
}

impl MetadataConfig {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn to_bag_info(&self) -> BagInfo {
        self.fields
            .iter()
            .map(|(key, value)| (key.clone(), value.values()))
            .collect()
    }
}

pub fn env_var_name(field: &str) -> String {
    format!("BAGIT_{}", field.to_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn env_names() {
        assert_eq!(env_var_name("Contact-Email"), "BAGIT_CONTACT_EMAIL");
        assert_eq!(
            env_var_name("Organization-address"),
            "BAGIT_ORGANIZATION_ADDRESS"
        );
    }

    #[test]
    fn single_multiple_and_missing() {
        let report = ConfigLoader::from_vars(vars(&[
            ("BAGIT_BAG_GROUP_IDENTIFIER", "bgi"),
            ("BAGIT_CONTACT_PHONE_2", "cp2"),
            ("BAGIT_CONTACT_PHONE", "cp"),
            ("BAGIT_CONTACT_EMAIL", "ops@example.org"),
            ("BAGIT_CONTACT_NAME", "Ops"),
            ("BAGIT_SOURCE_ORGANIZATION", "Example Observing System"),
            ("HOME", "/root"),
        ]));

        assert_eq!(
            report.config.get("Bag-Group-Identifier"),
            Some(&FieldValue::Single("bgi".to_string()))
        );
        assert_eq!(
            report.config.get("Contact-Phone"),
            Some(&FieldValue::Multiple(vec!["cp".to_string(), "cp2".to_string()]))
        );
        assert_eq!(
            report.config.get("Organization-address"),
            Some(&FieldValue::Single(String::new()))
        );
        assert_eq!(
            report.warnings,
            vec![ConfigWarning::Missing {
                field: "Organization-address".to_string(),
                variable: "BAGIT_ORGANIZATION_ADDRESS".to_string(),
            }]
        );

        let info = report.config.to_bag_info();
        assert_eq!(info.len(), CONFIG_FIELDS.len());
        assert_eq!(info["Contact-Phone"], vec!["cp", "cp2"]);
    }
}
