//! SQLite persistence engine backed by sqlx.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use objman_query::{EntityDescriptor, Query, QueryBuilder, SqlValue};
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::entity::{identity_key, Entity, Record};
use crate::error::{NoResultError, Result};
use crate::manager::EntityManager;

#[derive(Debug, Clone)]
enum Scheduled {
    Upsert {
        key: String,
        descriptor: &'static EntityDescriptor,
        record: Record,
    },
    Delete {
        key: String,
        descriptor: &'static EntityDescriptor,
        identity: Vec<(String, SqlValue)>,
    },
}

impl Scheduled {
    fn key(&self) -> &str {
        match self {
            Self::Upsert { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    fn to_sql(&self) -> (String, Vec<SqlValue>) {
        match self {
            Self::Upsert {
                descriptor, record, ..
            } => upsert_sql(descriptor, record),
            Self::Delete {
                descriptor,
                identity,
                ..
            } => {
                let conditions: Vec<String> =
                    identity.iter().map(|(c, _)| format!("{c} = ?")).collect();
                let sql = format!(
                    "DELETE FROM {} WHERE {}",
                    descriptor.table(),
                    conditions.join(" AND ")
                );
                (sql, identity.iter().map(|(_, v)| v.clone()).collect())
            }
        }
    }
}

/// Builds `INSERT ... ON CONFLICT (pk) DO UPDATE SET ...` for a record.
///
/// NULL identifier columns are left out so SQLite assigns them.
fn upsert_sql(descriptor: &EntityDescriptor, record: &Record) -> (String, Vec<SqlValue>) {
    let identifier = descriptor.identifier_fields();
    let is_identifier = |column: &str| identifier.iter().any(|f| f == column);

    let columns: Vec<(&str, &SqlValue)> = record
        .iter()
        .filter(|(column, value)| !(value.is_null() && is_identifier(*column)))
        .collect();

    let names: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
    let placeholders = vec!["?"; columns.len()];
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        descriptor.table(),
        names.join(", "),
        placeholders.join(", ")
    );

    let conflict_target = identifier.iter().all(|f| names.contains(&f.as_str()));
    if conflict_target && !identifier.is_empty() {
        let updates: Vec<String> = names
            .iter()
            .filter(|&&c| !is_identifier(c))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        sql.push_str(&format!(" ON CONFLICT ({})", identifier.join(", ")));
        if updates.is_empty() {
            sql.push_str(" DO NOTHING");
        } else {
            sql.push_str(&format!(" DO UPDATE SET {}", updates.join(", ")));
        }
    }

    (sql, columns.into_iter().map(|(_, v)| v.clone()).collect())
}

#[derive(Debug, Default)]
struct UnitOfWork {
    managed: HashSet<String>,
    scheduled: Vec<Scheduled>,
}

impl UnitOfWork {
    fn forget(&mut self, key: &str) {
        self.managed.remove(key);
        self.scheduled.retain(|op| op.key() != key);
    }
}

/// An [`EntityManager`] over a SQLite connection pool.
///
/// Fetched and persisted entities are tracked by identity. Writes are
/// scheduled and executed by [`EntityManager::flush`] in one transaction.
#[derive(Debug)]
pub struct SqliteEntityManager {
    pool: SqlitePool,
    unit: Mutex<UnitOfWork>,
}

impl SqliteEntityManager {
    /// Creates a manager over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            unit: Mutex::new(UnitOfWork::default()),
        }
    }

    /// Connects to `url` with a single-connection pool.
    ///
    /// # Errors
    ///
    /// Returns the connection error.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Returns the connection pool.
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the number of scheduled writes.
    pub fn pending_writes(&self) -> usize {
        self.unit().scheduled.len()
    }

    fn unit(&self) -> MutexGuard<'_, UnitOfWork> {
        self.unit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn has_identity(identity: &[(String, SqlValue)]) -> bool {
    !identity.is_empty() && identity.iter().all(|(_, v)| !v.is_null())
}

impl EntityManager for SqliteEntityManager {
    async fn fetch_records(&self, query: &Query) -> Result<Vec<Record>> {
        debug!(sql = %query.sql(), "Executing SQL");
        let mut statement = sqlx::query(query.sql());
        for param in query.params() {
            statement = bind_value(statement, param.clone());
        }
        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_entities<E: Entity>(&self, query: &Query) -> Result<Vec<E>> {
        let records = self.fetch_records(query).await?;
        let entities = records
            .iter()
            .map(E::from_record)
            .collect::<Result<Vec<E>>>()?;

        let mut unit = self.unit();
        for entity in &entities {
            if has_identity(&entity.identity()) {
                unit.managed.insert(entity.identity_key());
            }
        }
        Ok(entities)
    }

    fn persist<E: Entity>(&self, entity: &E) -> Result<()> {
        let identity = entity.identity();
        let key = identity_key(E::descriptor(), &identity);
        let op = Scheduled::Upsert {
            key: key.clone(),
            descriptor: E::descriptor(),
            record: entity.to_record(),
        };

        let mut unit = self.unit();
        if has_identity(&identity) {
            unit.scheduled.retain(|existing| existing.key() != key);
            unit.managed.insert(key);
        }
        unit.scheduled.push(op);
        Ok(())
    }

    fn remove<E: Entity>(&self, entity: &E) -> Result<()> {
        let identity = entity.identity();
        let key = identity_key(E::descriptor(), &identity);

        let mut unit = self.unit();
        unit.forget(&key);
        if has_identity(&identity) {
            unit.scheduled.push(Scheduled::Delete {
                key,
                descriptor: E::descriptor(),
                identity,
            });
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut unit = self.unit();
        unit.managed.clear();
        unit.scheduled.clear();
        Ok(())
    }

    fn detach<E: Entity>(&self, entity: &E) -> Result<()> {
        self.unit().forget(&entity.identity_key());
        Ok(())
    }

    async fn refresh<E: Entity>(&self, entity: &mut E) -> Result<()> {
        let descriptor = E::descriptor();
        let alias = descriptor.default_alias();
        let mut qb = QueryBuilder::new();
        qb.select([alias]).from(descriptor, alias, None);
        for (index, (column, value)) in entity.identity().into_iter().enumerate() {
            let parameter = format!("id{index}");
            qb.and_where(format!("{alias}.{column} = :{parameter}"))
                .set_parameter(&parameter, value);
        }
        qb.set_max_results(Some(1));

        let records = self.fetch_records(&qb.get_query()?).await?;
        let record = records.first().ok_or(NoResultError)?;
        *entity = E::from_record(record)?;
        self.unit().managed.insert(entity.identity_key());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let ops = std::mem::take(&mut self.unit().scheduled);
        if ops.is_empty() {
            return Ok(());
        }

        if let Err(err) = self.write(&ops).await {
            let mut unit = self.unit();
            let newer = std::mem::replace(&mut unit.scheduled, ops);
            unit.scheduled.extend(newer);
            return Err(err);
        }

        info!(operations = ops.len(), "Flushed unit of work");
        Ok(())
    }

    fn contains<E: Entity>(&self, entity: &E) -> bool {
        self.unit().managed.contains(&entity.identity_key())
    }
}

impl SqliteEntityManager {
    async fn write(&self, ops: &[Scheduled]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for op in ops {
            let (sql, params) = op.to_sql();
            debug!(sql = %sql, "Executing SQL");
            let mut statement = sqlx::query(&sql);
            for param in params {
                statement = bind_value(statement, param);
            }
            statement.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Binds a SqlValue parameter to a query.
fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Int(i) => query.bind(i),
        SqlValue::Float(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
    }
}

/// Decodes a row by the storage class of each value.
fn decode_row(row: &SqliteRow) -> Result<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Int(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => SqlValue::Float(row.try_get_unchecked::<f64, _>(index)?),
                "NUMERIC" => match row.try_get_unchecked::<i64, _>(index) {
                    Ok(n) => SqlValue::Int(n),
                    Err(_) => SqlValue::Float(row.try_get_unchecked::<f64, _>(index)?),
                },
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        record.push(column.name().to_string(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use objman_query::Association;
    use std::sync::OnceLock;

    fn people() -> &'static EntityDescriptor {
        static D: OnceLock<EntityDescriptor> = OnceLock::new();
        D.get_or_init(|| {
            EntityDescriptor::new("Person", "people")
                .identifier(&["id"])
                .fields(&["name", "age"])
        })
    }

    fn memberships() -> &'static EntityDescriptor {
        static D: OnceLock<EntityDescriptor> = OnceLock::new();
        D.get_or_init(|| {
            EntityDescriptor::new("Membership", "memberships")
                .identifier(&["person_id", "team_id"])
                .association(Association::new("person", people, "person_id", "id"))
        })
    }

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap()
    }

    #[test]
    fn test_upsert_sql() {
        let record = Record::new().with("id", 4).with("name", "Ann").with("age", 31);
        let (sql, params) = upsert_sql(people(), &record);
        assert_eq!(
            sql,
            "INSERT INTO people (id, name, age) VALUES (?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, age = excluded.age"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_upsert_sql_without_identifier() {
        let record = Record::new()
            .with("id", Option::<i64>::None)
            .with("name", "Ann");
        let (sql, params) = upsert_sql(people(), &record);
        assert_eq!(sql, "INSERT INTO people (name) VALUES (?)");
        assert_eq!(params, vec![SqlValue::Text(String::from("Ann"))]);
    }

    #[test]
    fn test_upsert_sql_identifier_only() {
        let record = Record::new().with("person_id", 1).with("team_id", 2);
        let (sql, _) = upsert_sql(memberships(), &record);
        assert!(sql.ends_with("ON CONFLICT (person_id, team_id) DO NOTHING"));
    }

    #[tokio::test]
    async fn test_decode_row_storage_classes() {
        let manager = SqliteEntityManager::new(create_test_pool().await);
        let mut qb = QueryBuilder::new();
        qb.select(["1 AS i", "2.5 AS f", "'x' AS t", "NULL AS n", "X'0102' AS b"])
            .from(people(), "p", None);
        sqlx::query("CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
            .execute(manager.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO people (name, age) VALUES ('a', 1)")
            .execute(manager.pool())
            .await
            .unwrap();

        let records = manager.fetch_records(&qb.get_query().unwrap()).await.unwrap();
        let record = &records[0];
        assert_eq!(record.get("i"), Some(&SqlValue::Int(1)));
        assert_eq!(record.get("f"), Some(&SqlValue::Float(2.5)));
        assert_eq!(record.get("t"), Some(&SqlValue::Text(String::from("x"))));
        assert_eq!(record.get("n"), Some(&SqlValue::Null));
        assert_eq!(record.get("b"), Some(&SqlValue::Blob(vec![1, 2])));
    }
}
