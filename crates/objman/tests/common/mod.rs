#![allow(dead_code)]

use std::sync::{Mutex, OnceLock};

use objman::{
    Association, Entity, EntityDescriptor, EntityManager, Error, FilterHandler, FilterValue,
    Finder, ObjectManager, ParameterValue, Query, Record, Result, SqlValue,
    SqliteEntityManager,
};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub id: Option<i64>,
    pub name: String,
}

impl Author {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id: Some(id),
            name: name.to_string(),
        }
    }
}

impl Entity for Author {
    fn descriptor() -> &'static EntityDescriptor {
        static D: OnceLock<EntityDescriptor> = OnceLock::new();
        D.get_or_init(|| {
            EntityDescriptor::new("Author", "authors")
                .identifier(&["id"])
                .field("name")
        })
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get_opt_int("id")?,
            name: record.get_text("name")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new().with("id", self.id).with("name", &self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub title: String,
    pub status: String,
    pub pages: i64,
    pub author_id: Option<i64>,
}

pub fn book_uuid(id: i64) -> Uuid {
    Uuid::parse_str(&format!("00000000-0000-4000-8000-{id:012}")).unwrap()
}

impl Book {
    pub fn new(id: i64, title: &str, status: &str, pages: i64, author_id: i64) -> Self {
        Self {
            id: Some(id),
            uuid: book_uuid(id),
            title: title.to_string(),
            status: status.to_string(),
            pages,
            author_id: Some(author_id),
        }
    }
}

fn published(finder: &mut Finder<Book>) -> Result<()> {
    let alias = finder.alias().to_string();
    finder.and_where(&format!("{alias}.status = 'published'"))?;
    Ok(())
}

fn by_status(finder: &mut Finder<Book>, status: Option<SqlValue>) -> Result<()> {
    let alias = finder.alias().to_string();
    match status {
        Some(status) => finder.where_clause(&format!("{alias}.status = :status"), [status])?,
        None => finder.and_where(&format!("{alias}.status = 'draft'"))?,
    };
    Ok(())
}

fn by_ids(finder: &mut Finder<Book>, ids: Vec<SqlValue>) -> Result<()> {
    let alias = finder.alias().to_string();
    finder.where_clause(&format!("{alias}.id IN (:ids)"), [ParameterValue::List(ids)])?;
    Ok(())
}

fn by_pages(finder: &mut Finder<Book>, range: &[(String, FilterValue)]) -> Result<()> {
    let alias = finder.alias().to_string();
    for (bound, value) in range {
        let pages = value
            .as_scalar()
            .and_then(SqlValue::as_int)
            .ok_or_else(|| Error::FilterArgument(format!("`{bound}` must be a number")))?;
        let operator = match bound.as_str() {
            "min" => ">=",
            "max" => "<=",
            other => return Err(Error::FilterArgument(format!("unknown bound `{other}`"))),
        };
        finder.where_clause(
            &format!("{alias}.pages {operator} :pages{bound}"),
            [pages],
        )?;
    }
    Ok(())
}

fn title_like(finder: &mut Finder<Book>, pattern: SqlValue) -> Result<()> {
    let Some(pattern) = pattern.as_str().map(str::to_string) else {
        return Err(Error::FilterArgument(String::from("title must be text")));
    };
    let alias = finder.alias().to_string();
    finder.where_clause(&format!("{alias}.title LIKE :title"), [pattern])?;
    Ok(())
}

fn by_author_name(finder: &mut Finder<Book>, name: SqlValue) -> Result<()> {
    let alias = finder.alias().to_string();
    finder
        .join(&format!("{alias}.author"), "a", None, None, None)
        .where_clause("a.name = :authorname", [name])?;
    Ok(())
}

impl Entity for Book {
    fn descriptor() -> &'static EntityDescriptor {
        static D: OnceLock<EntityDescriptor> = OnceLock::new();
        D.get_or_init(|| {
            EntityDescriptor::new("Book", "books")
                .identifier(&["id"])
                .fields(&["uuid", "title", "status", "pages"])
                .association(Association::new(
                    "author",
                    Author::descriptor,
                    "author_id",
                    "id",
                ))
        })
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get_opt_int("id")?,
            uuid: record.get_uuid("uuid")?,
            title: record.get_text("title")?,
            status: record.get_text("status")?,
            pages: record.get_int("pages")?,
            author_id: record.get_opt_int("author_id")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("uuid", self.uuid)
            .with("title", &self.title)
            .with("status", &self.status)
            .with("pages", self.pages)
            .with("author_id", self.author_id)
    }

    fn filter_handler(name: &str) -> Option<FilterHandler<Self>> {
        match name {
            "published" => Some(FilterHandler::NoArg(published)),
            "status" => Some(FilterHandler::Optional(by_status)),
            "ids" => Some(FilterHandler::Variadic(by_ids)),
            "pages" => Some(FilterHandler::Structured(by_pages)),
            "title" => Some(FilterHandler::Single(title_like)),
            "author_name" => Some(FilterHandler::Single(by_author_name)),
            _ => None,
        }
    }
}

/// Creates an in-memory database with the authors and books tables.
pub async fn sqlite_manager() -> ObjectManager<SqliteEntityManager> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();

    sqlx::query("CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE books (
            id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            status TEXT NOT NULL,
            pages INTEGER NOT NULL,
            author_id INTEGER REFERENCES authors(id)
        )",
    )
    .execute(&pool)
    .await
    .unwrap();

    ObjectManager::new(SqliteEntityManager::new(pool))
}

pub fn authors() -> Vec<Author> {
    vec![
        Author::new(1, "Ursula K. Le Guin"),
        Author::new(2, "Frank Herbert"),
    ]
}

pub fn books() -> Vec<Book> {
    vec![
        Book::new(1, "A Wizard of Earthsea", "published", 183, 1),
        Book::new(2, "The Left Hand of Darkness", "published", 286, 1),
        Book::new(3, "Dune", "published", 412, 2),
        Book::new(4, "Dune Messiah", "draft", 256, 2),
        Book::new(5, "Children of Dune", "draft", 444, 2),
    ]
}

/// Creates and fills the test database.
pub async fn seeded_manager() -> ObjectManager<SqliteEntityManager> {
    let manager = sqlite_manager().await;
    manager.persist_all(&authors()).unwrap();
    manager.persist_all(&books()).unwrap();
    manager.flush().await.unwrap();
    manager.clear().unwrap();
    manager
}

/// A minimal entity for the recording manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
}

impl Entity for Item {
    fn descriptor() -> &'static EntityDescriptor {
        static D: OnceLock<EntityDescriptor> = OnceLock::new();
        D.get_or_init(|| EntityDescriptor::new("Item", "items").identifier(&["id"]))
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get_int("id")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new().with("id", self.id)
    }
}

/// A page fetch seen by the recording manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fetch {
    pub first: Option<u64>,
    pub max: Option<u64>,
    pub returned: usize,
}

/// An in-memory engine serving `rows` by offset and limit. WHERE clauses
/// are not evaluated.
#[derive(Debug, Default)]
pub struct RecordingManager {
    rows: Vec<Record>,
    fetches: Mutex<Vec<Fetch>>,
    queries: Mutex<Vec<String>>,
    managed: Mutex<Vec<String>>,
    detached: Mutex<Vec<String>>,
    persisted: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
}

impl RecordingManager {
    pub fn with_items(count: i64) -> Self {
        Self {
            rows: (1..=count).map(|id| Record::new().with("id", id)).collect(),
            ..Self::default()
        }
    }

    pub fn fetches(&self) -> Vec<Fetch> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().unwrap().clone()
    }

    pub fn persisted(&self) -> Vec<String> {
        self.persisted.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

impl EntityManager for RecordingManager {
    async fn fetch_records(&self, query: &Query) -> Result<Vec<Record>> {
        self.queries.lock().unwrap().push(query.sql().to_string());

        if query.sql().starts_with("SELECT COUNT(") {
            let count = i64::try_from(self.rows.len()).unwrap();
            return Ok(vec![Record::new().with("count", count)]);
        }

        let first = usize::try_from(query.first_result().unwrap_or(0)).unwrap();
        let max = query
            .max_results()
            .map_or(usize::MAX, |max| usize::try_from(max).unwrap());
        let page: Vec<Record> = self.rows.iter().skip(first).take(max).cloned().collect();

        self.fetches.lock().unwrap().push(Fetch {
            first: query.first_result(),
            max: query.max_results(),
            returned: page.len(),
        });
        Ok(page)
    }

    async fn fetch_entities<E: Entity>(&self, query: &Query) -> Result<Vec<E>> {
        let records = self.fetch_records(query).await?;
        let entities = records
            .iter()
            .map(E::from_record)
            .collect::<Result<Vec<E>>>()?;
        let mut managed = self.managed.lock().unwrap();
        managed.extend(entities.iter().map(E::identity_key));
        Ok(entities)
    }

    fn persist<E: Entity>(&self, entity: &E) -> Result<()> {
        self.persisted.lock().unwrap().push(entity.identity_key());
        Ok(())
    }

    fn remove<E: Entity>(&self, entity: &E) -> Result<()> {
        self.removed.lock().unwrap().push(entity.identity_key());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.managed.lock().unwrap().clear();
        Ok(())
    }

    fn detach<E: Entity>(&self, entity: &E) -> Result<()> {
        let key = entity.identity_key();
        self.managed.lock().unwrap().retain(|k| k != &key);
        self.detached.lock().unwrap().push(key);
        Ok(())
    }

    async fn refresh<E: Entity>(&self, _entity: &mut E) -> Result<()> {
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn contains<E: Entity>(&self, entity: &E) -> bool {
        self.managed
            .lock()
            .unwrap()
            .contains(&entity.identity_key())
    }
}
