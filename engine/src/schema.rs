//! Declared model schemas.
//!
//! Every entity type is described up front by a [`ModelSchema`]: its name,
//! where it is stored and searched, its current schema version and the typed
//! field table used to encode and decode it.

use crate::{codec, error::Result, Error, FieldName, FieldType, ModelName, SchemaVersion, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field holding the primary key of every entity.
pub const ID_FIELD: &str = "id";
/// Field holding the schema version of every entity.
pub const VERSION_FIELD: &str = "_version";

/// Definition of a field in a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: FieldName,
    /// Field type
    pub field_type: FieldType,
}

impl FieldDef {
    pub fn new(name: impl Into<FieldName>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Key this field is stored and indexed under.
    pub fn storage_key(&self) -> String {
        codec::storage_key(&self.name, self.field_type)
    }

    /// Check a value against the declared type without encoding it.
    pub fn validate(&self, value: &Value) -> Result<()> {
        codec::encode_field(&self.name, value, self.field_type).map(|_| ())
    }
}

/// Schema for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchema {
    /// Qualified model name, also the model identity stored with records
    pub name: ModelName,
    /// Bucket records are stored in
    pub bucket: String,
    /// Search index covering the bucket
    pub search_index: String,
    /// Version new entities are created at
    pub version: SchemaVersion,
    /// Declared fields, excluding the implicit key and version
    pub fields: Vec<FieldDef>,
}

impl ModelSchema {
    /// Create a model schema. The search index defaults to the bucket name.
    pub fn new(
        name: impl Into<ModelName>,
        bucket: impl Into<String>,
        version: SchemaVersion,
        fields: Vec<FieldDef>,
    ) -> Self {
        let bucket = bucket.into();
        Self {
            name: name.into(),
            search_index: bucket.clone(),
            bucket,
            version,
            fields,
        }
    }

    pub fn with_search_index(mut self, index: impl Into<String>) -> Self {
        self.search_index = index.into();
        self
    }

    /// Look up a declared field.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared type of a field, including the implicit key and version.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        match name {
            ID_FIELD => Some(FieldType::String),
            VERSION_FIELD => Some(FieldType::Integer),
            _ => self.field(name).map(|f| f.field_type),
        }
    }

    /// Look up a declared field or fail with [`Error::UnknownField`].
    pub fn require_field(&self, name: &str) -> Result<&FieldDef> {
        self.field(name).ok_or_else(|| Error::UnknownField {
            model: self.name.clone(),
            field: name.to_string(),
        })
    }
}

/// Every model known to the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Model schemas by name
    pub models: HashMap<ModelName, ModelSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model to the schema.
    pub fn add_model(&mut self, model: ModelSchema) -> &mut Self {
        self.models.insert(model.name.clone(), model);
        self
    }

    /// Builder-style method to add a model.
    pub fn with_model(mut self, model: ModelSchema) -> Self {
        self.add_model(model);
        self
    }

    /// Get a model schema by name.
    pub fn get_model(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }

    /// Get a model schema or fail with [`Error::UnknownModel`].
    pub fn require_model(&self, name: &str) -> Result<&ModelSchema> {
        self.get_model(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScalarType;

    fn test_schema() -> Schema {
        Schema::new().with_model(ModelSchema::new(
            "App.Post",
            "posts",
            1,
            vec![
                FieldDef::new("title", FieldType::String),
                FieldDef::new("views", FieldType::Integer),
                FieldDef::new("tags", FieldType::List(ScalarType::String)),
            ],
        ))
    }

    #[test]
    fn lookup_models_and_fields() {
        let schema = test_schema();
        let post = schema.require_model("App.Post").unwrap();
        assert_eq!(post.bucket, "posts");
        assert_eq!(post.search_index, "posts");
        assert_eq!(post.field("views").unwrap().storage_key(), "views_i");
        assert!(post.field("missing").is_none());
    }

    #[test]
    fn implicit_fields_have_types() {
        let schema = test_schema();
        let post = schema.get_model("App.Post").unwrap();
        assert_eq!(post.field_type(ID_FIELD), Some(FieldType::String));
        assert_eq!(post.field_type(VERSION_FIELD), Some(FieldType::Integer));
        assert_eq!(
            post.field_type("tags"),
            Some(FieldType::List(ScalarType::String))
        );
    }

    #[test]
    fn unknown_model_and_field() {
        let schema = test_schema();
        assert!(matches!(
            schema.require_model("App.Comment"),
            Err(Error::UnknownModel(m)) if m == "App.Comment"
        ));
        let post = schema.get_model("App.Post").unwrap();
        assert!(matches!(
            post.require_field("body"),
            Err(Error::UnknownField { field, .. }) if field == "body"
        ));
    }

    #[test]
    fn validate_field_values() {
        let schema = test_schema();
        let post = schema.get_model("App.Post").unwrap();
        assert!(post.field("views").unwrap().validate(&Value::Integer(3)).is_ok());
        assert!(post
            .field("views")
            .unwrap()
            .validate(&Value::from("three"))
            .is_err());
        assert!(post
            .field("tags")
            .unwrap()
            .validate(&Value::from(vec!["a", "b"]))
            .is_ok());
    }

    #[test]
    fn custom_search_index() {
        let model = ModelSchema::new("App.User", "users", 0, vec![]).with_search_index("people");
        assert_eq!(model.search_index, "people");
    }

    #[test]
    fn schema_serialization() {
        let schema = test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
