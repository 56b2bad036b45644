//! Schema browsing tools: `list_schemas`, `list_objects`, `get_object_details`.
//!
//! Catalog queries bind their inputs as parameters and cast every column to
//! a plain type so rows decode the same way in both wire formats.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::context::AppContext;
use crate::guard::{GuardedConnection, QueryOutput};
use crate::pool::PoolHandle;
use crate::tools::error::ToolError;
use crate::tools::router::{parse_args, require_session, ToolHandler};

const LIST_SCHEMAS_SQL: &str = "\
SELECT schema_name::text AS schema_name,
       schema_owner::text AS schema_owner,
       CASE
           WHEN schema_name LIKE 'pg_%' THEN 'System Schema'
           WHEN schema_name = 'information_schema' THEN 'System Information Schema'
           ELSE 'User Schema'
       END AS schema_type
FROM information_schema.schemata
ORDER BY schema_type, schema_name";

const TABLES_SQL: &str = "\
SELECT table_schema::text AS schema, table_name::text AS name, table_type::text AS type
FROM information_schema.tables
WHERE table_schema = $1 AND table_type = $2
ORDER BY table_name";

const SEQUENCES_SQL: &str = "\
SELECT sequence_schema::text AS schema, sequence_name::text AS name, data_type::text AS data_type
FROM information_schema.sequences
WHERE sequence_schema = $1
ORDER BY sequence_name";

const EXTENSIONS_SQL: &str = "\
SELECT extname::text AS name, extversion AS version, extrelocatable AS relocatable
FROM pg_extension
ORDER BY extname";

const COLUMNS_SQL: &str = "\
SELECT column_name::text AS column, data_type::text AS data_type,
       is_nullable::text AS is_nullable, column_default::text AS default
FROM information_schema.columns
WHERE table_schema = $1 AND table_name = $2
ORDER BY ordinal_position";

const CONSTRAINTS_SQL: &str = "\
SELECT tc.constraint_name::text AS constraint_name,
       tc.constraint_type::text AS constraint_type,
       kcu.column_name::text AS column_name
FROM information_schema.table_constraints AS tc
LEFT JOIN information_schema.key_column_usage AS kcu
  ON tc.constraint_name = kcu.constraint_name
 AND tc.table_schema = kcu.table_schema
WHERE tc.table_schema = $1 AND tc.table_name = $2";

const INDEXES_SQL: &str = "\
SELECT indexname::text AS name, indexdef AS definition
FROM pg_indexes
WHERE schemaname = $1 AND tablename = $2";

const SEQUENCE_SQL: &str = "\
SELECT sequence_schema::text AS schema, sequence_name::text AS name,
       data_type::text AS data_type, start_value::text AS start_value,
       increment::text AS increment
FROM information_schema.sequences
WHERE sequence_schema = $1 AND sequence_name = $2";

const EXTENSION_SQL: &str = "\
SELECT extname::text AS name, extversion AS version, extrelocatable AS relocatable
FROM pg_extension
WHERE extname = $1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ObjectType {
    #[default]
    Table,
    View,
    Sequence,
    Extension,
}

impl ObjectType {
    fn as_str(self) -> &'static str {
        match self {
            ObjectType::Table => "table",
            ObjectType::View => "view",
            ObjectType::Sequence => "sequence",
            ObjectType::Extension => "extension",
        }
    }

    fn table_type(self) -> &'static str {
        match self {
            ObjectType::View => "VIEW",
            _ => "BASE TABLE",
        }
    }
}

fn rows(output: QueryOutput) -> Value {
    Value::Array(output.rows.into_iter().map(Value::Object).collect())
}

fn first_row(output: QueryOutput) -> Value {
    output
        .rows
        .into_iter()
        .next()
        .map(Value::Object)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

// --- list_schemas ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListSchemasArgs {
    #[serde(rename = "database_name")]
    _database_name: String,
}

pub struct ListSchemas;

#[async_trait]
impl ToolHandler for ListSchemas {
    fn name(&self) -> &'static str {
        "list_schemas"
    }

    fn description(&self) -> &'static str {
        "List all schemas in the specified database"
    }

    fn precheck(&self, args: &Value, _handle: &PoolHandle) -> Result<(), ToolError> {
        parse_args::<ListSchemasArgs>(self.name(), args.clone()).map(|_| ())
    }

    async fn call(
        &self,
        _ctx: &AppContext,
        session: Option<&mut GuardedConnection>,
        args: Value,
    ) -> Result<Value, ToolError> {
        let _: ListSchemasArgs = parse_args(self.name(), args)?;
        let session = require_session(self.name(), session)?;
        Ok(rows(session.query(LIST_SCHEMAS_SQL).await?))
    }
}

// --- list_objects ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListObjectsArgs {
    #[serde(rename = "database_name")]
    _database_name: String,
    schema_name: String,
    #[serde(default)]
    object_type: ObjectType,
}

pub struct ListObjects;

#[async_trait]
impl ToolHandler for ListObjects {
    fn name(&self) -> &'static str {
        "list_objects"
    }

    fn description(&self) -> &'static str {
        "List objects of a given type ('table', 'view', 'sequence' or 'extension') in a schema"
    }

    fn precheck(&self, args: &Value, _handle: &PoolHandle) -> Result<(), ToolError> {
        parse_args::<ListObjectsArgs>(self.name(), args.clone()).map(|_| ())
    }

    async fn call(
        &self,
        _ctx: &AppContext,
        session: Option<&mut GuardedConnection>,
        args: Value,
    ) -> Result<Value, ToolError> {
        let args: ListObjectsArgs = parse_args(self.name(), args)?;
        let session = require_session(self.name(), session)?;
        let output = match args.object_type {
            ObjectType::Table | ObjectType::View => {
                session
                    .query_params(TABLES_SQL, &[args.schema_name.as_str(), args.object_type.table_type()])
                    .await?
            }
            ObjectType::Sequence => session.query_params(SEQUENCES_SQL, &[args.schema_name.as_str()]).await?,
            // Extensions are not schema scoped.
            ObjectType::Extension => session.query(EXTENSIONS_SQL).await?,
        };
        Ok(rows(output))
    }
}

// --- get_object_details ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ObjectDetailsArgs {
    #[serde(rename = "database_name")]
    _database_name: String,
    schema_name: String,
    object_name: String,
    #[serde(default)]
    object_type: ObjectType,
}

pub struct GetObjectDetails;

#[async_trait]
impl ToolHandler for GetObjectDetails {
    fn name(&self) -> &'static str {
        "get_object_details"
    }

    fn description(&self) -> &'static str {
        "Show columns, constraints and indexes of a table or view, or the definition of a sequence or extension"
    }

    fn precheck(&self, args: &Value, _handle: &PoolHandle) -> Result<(), ToolError> {
        parse_args::<ObjectDetailsArgs>(self.name(), args.clone()).map(|_| ())
    }

    async fn call(
        &self,
        _ctx: &AppContext,
        session: Option<&mut GuardedConnection>,
        args: Value,
    ) -> Result<Value, ToolError> {
        let args: ObjectDetailsArgs = parse_args(self.name(), args)?;
        let session = require_session(self.name(), session)?;
        let key = [args.schema_name.as_str(), args.object_name.as_str()];

        match args.object_type {
            ObjectType::Table | ObjectType::View => {
                let columns = session.query_params(COLUMNS_SQL, &key).await?;
                let constraints = session.query_params(CONSTRAINTS_SQL, &key).await?;
                let indexes = session.query_params(INDEXES_SQL, &key).await?;
                Ok(json!({
                    "basic": {
                        "schema": args.schema_name,
                        "name": args.object_name,
                        "type": args.object_type.as_str(),
                    },
                    "columns": rows(columns),
                    "constraints": group_constraints(constraints),
                    "indexes": rows(indexes),
                }))
            }
            ObjectType::Sequence => Ok(first_row(session.query_params(SEQUENCE_SQL, &key).await?)),
            ObjectType::Extension => Ok(first_row(
                session.query_params(EXTENSION_SQL, &[args.object_name.as_str()]).await?,
            )),
        }
    }
}

/// One entry per constraint with its columns collected.
fn group_constraints(output: QueryOutput) -> Value {
    let mut grouped: BTreeMap<String, (Value, Vec<Value>)> = BTreeMap::new();
    for row in output.rows {
        let Some(name) = row.get("constraint_name").and_then(Value::as_str) else {
            continue;
        };
        let entry = grouped
            .entry(name.to_string())
            .or_insert_with(|| (row.get("constraint_type").cloned().unwrap_or(Value::Null), Vec::new()));
        if let Some(column) = row.get("column_name").filter(|c| !c.is_null()) {
            entry.1.push(column.clone());
        }
    }
    Value::Array(
        grouped
            .into_iter()
            .map(|(name, (kind, columns))| json!({ "name": name, "type": kind, "columns": columns }))
            .collect(),
    )
}
