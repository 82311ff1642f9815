use std::fs;
use std::path::Path;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, Result};
use crate::index::index_kind::IndexKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Integer,
    Number,
    Date,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    Normal,
    Kv,
    Kkv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub kind: IndexKind,
    pub field: String,
    #[serde(default)]
    pub has_section_attribute: bool,
    #[serde(default)]
    pub customized_factory: Option<String>, // Registry key for customized indexes
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackAttributeConfig {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub need_pack_reader: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarySchema {
    pub fields: Vec<String>,
    #[serde(default)]
    pub disabled_fields: Vec<String>,
}

impl SummarySchema {
    /// Fields actually served after the disabled overrides are applied.
    pub fn enabled_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| !self.disabled_fields.contains(f))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceGroup {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSchema {
    pub groups: Vec<SourceGroup>,
    #[serde(default)]
    pub disabled_groups: Vec<String>,
}

impl SourceSchema {
    pub fn enabled_groups(&self) -> Vec<SourceGroup> {
        self.groups
            .iter()
            .filter(|g| !self.disabled_groups.contains(&g.name))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortDescription {
    pub field: String,
    pub order: SortOrder,
}

/// Partition schema: fields, the indexes built over them and the stored
/// views (attributes, summary, source). A sub-schema describes the joined
/// sub-partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub schema_version_id: i32,
    pub table_type: TableType,
    pub fields: Vec<FieldDefinition>,
    pub indexes: Vec<IndexConfig>,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub pack_attributes: Vec<PackAttributeConfig>,
    #[serde(default)]
    pub summary: SummarySchema,
    #[serde(default)]
    pub source: SourceSchema,
    #[serde(default)]
    pub sort_descriptions: Vec<SortDescription>,
    #[serde(default)]
    pub sub_schema: Option<Box<Schema>>,
}

impl Schema {
    pub fn new() -> Self {
        Schema {
            schema_version_id: 0,
            table_type: TableType::Normal,
            fields: Vec::new(),
            indexes: Vec::new(),
            attributes: Vec::new(),
            pack_attributes: Vec::new(),
            summary: SummarySchema::default(),
            source: SourceSchema::default(),
            sort_descriptions: Vec::new(),
            sub_schema: None,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        let schema: Schema = serde_json::from_slice(&data)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn add_field(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.push(FieldDefinition {
            name: name.to_string(),
            field_type,
        });
        self
    }

    pub fn add_index(mut self, name: &str, kind: IndexKind, field: &str) -> Self {
        self.indexes.push(IndexConfig {
            name: name.to_string(),
            kind,
            field: field.to_string(),
            has_section_attribute: false,
            customized_factory: None,
        });
        self
    }

    pub fn add_section_index(mut self, name: &str, field: &str) -> Self {
        self.indexes.push(IndexConfig {
            name: name.to_string(),
            kind: IndexKind::Normal,
            field: field.to_string(),
            has_section_attribute: true,
            customized_factory: None,
        });
        self
    }

    pub fn add_customized_index(mut self, name: &str, field: &str, factory: &str) -> Self {
        self.indexes.push(IndexConfig {
            name: name.to_string(),
            kind: IndexKind::Customized,
            field: field.to_string(),
            has_section_attribute: false,
            customized_factory: Some(factory.to_string()),
        });
        self
    }

    pub fn add_attribute(mut self, field: &str) -> Self {
        self.attributes.push(AttributeConfig { field: field.to_string() });
        self
    }

    pub fn add_pack_attribute(mut self, name: &str, fields: &[&str], need_pack_reader: bool) -> Self {
        self.pack_attributes.push(PackAttributeConfig {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            need_pack_reader,
        });
        self
    }

    pub fn with_summary(mut self, fields: &[&str]) -> Self {
        self.summary.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn add_source_group(mut self, name: &str, fields: &[&str]) -> Self {
        self.source.groups.push(SourceGroup {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    pub fn sort_by(mut self, field: &str, order: SortOrder) -> Self {
        self.sort_descriptions.push(SortDescription {
            field: field.to_string(),
            order,
        });
        self
    }

    pub fn with_sub_schema(mut self, sub: Schema) -> Self {
        self.sub_schema = Some(Box::new(sub));
        self
    }

    pub fn with_table_type(mut self, table_type: TableType) -> Self {
        self.table_type = table_type;
        self
    }

    pub fn primary_key_index(&self) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.kind == IndexKind::PrimaryKey)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_attribute(&self, field: &str) -> bool {
        self.attributes.iter().any(|a| a.field == field)
            || self.pack_attributes.iter().any(|p| p.fields.iter().any(|f| f == field))
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = std::collections::HashSet::new();
        for index in &self.indexes {
            if !names.insert(index.name.as_str()) {
                return Err(Error::invalid_argument(format!("duplicate index name {}", index.name)));
            }
            if self.field(&index.field).is_none() {
                return Err(Error::invalid_argument(format!(
                    "index {} refers to unknown field {}", index.name, index.field
                )));
            }
            if index.kind == IndexKind::Customized && index.customized_factory.is_none() {
                return Err(Error::invalid_argument(format!(
                    "customized index {} has no factory", index.name
                )));
            }
        }
        if self.indexes.iter().filter(|i| i.kind == IndexKind::PrimaryKey).count() > 1 {
            return Err(Error::invalid_argument("more than one primary key index"));
        }
        for attribute in &self.attributes {
            if self.field(&attribute.field).is_none() {
                return Err(Error::invalid_argument(format!("unknown attribute field {}", attribute.field)));
            }
        }
        if let Some(sub) = &self.sub_schema {
            sub.validate()?;
        }
        Ok(())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Schema::new()
    }
}
