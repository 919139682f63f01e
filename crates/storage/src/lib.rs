use std::{borrow::Cow, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    QueryBuilder, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;
use tracing::info;

use collections_core::types::{
    Collection, CollectionId, Company, CompanyId, CompanyPage, DEFAULT_COLLECTION_NAME,
    LIKED_COLLECTION_NAME,
};

const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SEED_CHUNK: usize = 500;
const SEED_LIKED_COUNT: usize = 10;

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Every pooled connection enforces foreign keys and waits up to five
    /// seconds on a locked database before failing.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for collection metadata and paged contents.
    pub fn collections(&self) -> CollectionRepository {
        CollectionRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the company catalogue.
    pub fn companies(&self) -> CompanyRepository {
        CompanyRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for (company, collection) memberships.
    pub fn associations(&self) -> AssociationRepository {
        AssociationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Populates an empty database with demo companies.
    ///
    /// Creates `My List` containing every seeded company and
    /// `Liked Companies List` containing the first few. Returns `false`
    /// without touching anything when a collection already exists.
    pub async fn seed_demo_data(
        &self,
        company_count: usize,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM company_collections")
            .fetch_one(&self.pool)
            .await?;
        if existing > 0 {
            return Ok(false);
        }

        let created_at = to_rfc3339(now);
        let mut tx = self.pool.begin().await?;

        let names: Vec<String> = (1..=company_count)
            .map(|n| format!("Company {n}"))
            .collect();
        let mut ids = Vec::with_capacity(company_count);
        for chunk in names.chunks(SEED_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO companies (company_name, created_at) ");
            builder.push_values(chunk, |mut row, name| {
                row.push_bind(name).push_bind(&created_at);
            });
            builder.push(" RETURNING id");
            let inserted: Vec<i64> = builder
                .build_query_scalar()
                .fetch_all(&mut *tx)
                .await?;
            ids.extend(inserted);
        }

        for (name, members) in [
            (DEFAULT_COLLECTION_NAME, &ids[..]),
            (LIKED_COLLECTION_NAME, &ids[..ids.len().min(SEED_LIKED_COUNT)]),
        ] {
            let collection_id = CollectionId::new();
            sqlx::query(
                "INSERT INTO company_collections (id, collection_name, created_at) VALUES (?, ?, ?)",
            )
            .bind(collection_id.to_string())
            .bind(name)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;

            for chunk in members.chunks(SEED_CHUNK) {
                insert_association_rows(&mut tx, &collection_id, chunk, &created_at).await?;
            }
        }

        tx.commit().await?;
        info!(
            stage = "storage",
            companies = company_count,
            "seeded demo collections"
        );
        Ok(true)
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `company_collections` table.
#[derive(Clone)]
pub struct CollectionRepository {
    pool: SqlitePool,
}

impl CollectionRepository {
    /// Creates a new, empty collection.
    pub async fn create(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Collection, CollectionError> {
        let id = CollectionId::new();
        sqlx::query(
            "INSERT INTO company_collections (id, collection_name, created_at) VALUES (?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE) =>
            {
                CollectionError::DuplicateName(name.to_string())
            }
            other => CollectionError::Database(other),
        })?;

        Ok(Collection {
            id,
            collection_name: name.to_string(),
        })
    }

    /// Lists all collections ordered by name.
    pub async fn list(&self) -> Result<Vec<Collection>, CollectionError> {
        let rows = sqlx::query_as::<_, CollectionRow>(
            "SELECT id, collection_name FROM company_collections ORDER BY collection_name, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CollectionRow::into_domain).collect()
    }

    /// Loads a single collection.
    pub async fn fetch(&self, id: &CollectionId) -> Result<Collection, CollectionError> {
        sqlx::query_as::<_, CollectionRow>(
            "SELECT id, collection_name FROM company_collections WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CollectionError::NotFound(*id))?
        .into_domain()
    }

    /// Returns one page of the collection's companies ordered by company id,
    /// together with the collection's member count.
    pub async fn list_companies(
        &self,
        id: &CollectionId,
        offset: i64,
        limit: u32,
    ) -> Result<CompanyPage, CollectionError> {
        let collection_id = id.to_string();
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM company_collection_associations WHERE collection_id = ?",
        )
        .bind(&collection_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, CompanyRow>(
            r#"
SELECT c.id,
       c.company_name,
       EXISTS (
           SELECT 1
             FROM company_collection_associations AS l
             JOIN company_collections AS lc ON lc.id = l.collection_id
            WHERE l.company_id = c.id
              AND lc.collection_name = ?
       ) AS liked
  FROM company_collection_associations AS a
  JOIN companies AS c ON c.id = a.company_id
 WHERE a.collection_id = ?
 ORDER BY c.id
 LIMIT ? OFFSET ?
            "#,
        )
        .bind(LIKED_COLLECTION_NAME)
        .bind(&collection_id)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(CompanyPage {
            companies: rows.into_iter().map(CompanyRow::into_domain).collect(),
            total: total as u64,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CollectionRow {
    id: String,
    collection_name: String,
}

impl CollectionRow {
    fn into_domain(self) -> Result<Collection, CollectionError> {
        let id = self
            .id
            .parse()
            .map_err(|_| CollectionError::CorruptId(self.id.clone()))?;
        Ok(Collection {
            id,
            collection_name: self.collection_name,
        })
    }
}

/// Errors that can occur while reading or creating collections.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("collection {0} not found")]
    NotFound(CollectionId),
    #[error("collection named {0:?} already exists")]
    DuplicateName(String),
    #[error("stored collection id {0:?} is not a uuid")]
    CorruptId(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `companies` table.
#[derive(Clone)]
pub struct CompanyRepository {
    pool: SqlitePool,
}

impl CompanyRepository {
    /// Inserts a company and returns its generated id.
    pub async fn create(
        &self,
        company_name: &str,
        now: DateTime<Utc>,
    ) -> Result<CompanyId, CompanyError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO companies (company_name, created_at) VALUES (?, ?) RETURNING id",
        )
        .bind(company_name)
        .bind(to_rfc3339(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Returns `true` when a company with `id` exists.
    pub async fn exists(&self, id: CompanyId) -> Result<bool, CompanyError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM companies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Returns the subset of `ids` with no matching company, in input order.
    pub async fn find_missing(&self, ids: &[CompanyId]) -> Result<Vec<CompanyId>, CompanyError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let existing: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM companies WHERE id IN (SELECT value FROM json_each(?))",
        )
        .bind(id_list_json(ids)?)
        .fetch_all(&self.pool)
        .await?;

        Ok(retain_absent(ids, &existing))
    }

    /// Lists companies ordered by id with the derived `liked` flag.
    pub async fn list(&self, offset: i64, limit: u32) -> Result<CompanyPage, CompanyError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, CompanyRow>(
            r#"
SELECT c.id,
       c.company_name,
       EXISTS (
           SELECT 1
             FROM company_collection_associations AS l
             JOIN company_collections AS lc ON lc.id = l.collection_id
            WHERE l.company_id = c.id
              AND lc.collection_name = ?
       ) AS liked
  FROM companies AS c
 ORDER BY c.id
 LIMIT ? OFFSET ?
            "#,
        )
        .bind(LIKED_COLLECTION_NAME)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(CompanyPage {
            companies: rows.into_iter().map(CompanyRow::into_domain).collect(),
            total: total as u64,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CompanyRow {
    id: i64,
    company_name: String,
    liked: i64,
}

impl CompanyRow {
    fn into_domain(self) -> Company {
        Company {
            id: self.id,
            company_name: self.company_name,
            liked: self.liked != 0,
        }
    }
}

/// Errors raised by the company repository.
#[derive(Debug, Error)]
pub enum CompanyError {
    #[error("failed to encode id list: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for `company_collection_associations`.
#[derive(Clone)]
pub struct AssociationRepository {
    pool: SqlitePool,
}

impl AssociationRepository {
    /// Begins a SQLite transaction on its own pooled connection.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Snapshot of every company id in the collection, ordered by id.
    pub async fn list_company_ids(
        &self,
        collection_id: &CollectionId,
    ) -> Result<Vec<CompanyId>, AssociationError> {
        let ids = sqlx::query_scalar(
            "SELECT company_id FROM company_collection_associations \
             WHERE collection_id = ? ORDER BY company_id",
        )
        .bind(collection_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Returns which of `ids` are already members of the collection.
    ///
    /// Runs as a single query regardless of how many ids are passed.
    pub async fn find_present(
        &self,
        collection_id: &CollectionId,
        ids: &[CompanyId],
    ) -> Result<Vec<CompanyId>, AssociationError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let present = sqlx::query_scalar(
            "SELECT company_id FROM company_collection_associations \
             WHERE collection_id = ? \
               AND company_id IN (SELECT value FROM json_each(?)) \
             ORDER BY company_id",
        )
        .bind(collection_id.to_string())
        .bind(id_list_json(ids)?)
        .fetch_all(&self.pool)
        .await?;
        Ok(present)
    }

    /// Returns the subset of `ids` that are not members of the collection, in input order.
    pub async fn find_missing(
        &self,
        collection_id: &CollectionId,
        ids: &[CompanyId],
    ) -> Result<Vec<CompanyId>, AssociationError> {
        let present = self.find_present(collection_id, ids).await?;
        Ok(retain_absent(ids, &present))
    }

    /// Inserts (company, collection) pairs inside `tx`, silently skipping
    /// pairs that already exist.
    ///
    /// Returns how many rows were actually inserted. A foreign key failure is
    /// reported as [`AssociationError::MissingCollection`] when the collection
    /// is gone, otherwise as [`AssociationError::MissingCompanies`] naming the
    /// unknown ids.
    pub async fn insert_ignoring_duplicates(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        collection_id: &CollectionId,
        company_ids: &[CompanyId],
        now: DateTime<Utc>,
    ) -> Result<u64, AssociationError> {
        if company_ids.is_empty() {
            return Ok(0);
        }

        match insert_association_rows(tx, collection_id, company_ids, &to_rfc3339(now)).await {
            Ok(inserted) => Ok(inserted),
            Err(sqlx::Error::Database(db_err))
                if db_err.code() == Some(Cow::Borrowed(SQLITE_CONSTRAINT_FOREIGNKEY)) =>
            {
                Err(missing_reference(tx, collection_id, company_ids).await?)
            }
            Err(other) => Err(AssociationError::Database(other)),
        }
    }
}

/// Works out which side of a failed association insert no longer exists.
///
/// SQLite aborts only the failing statement, so `tx` is still usable here.
async fn missing_reference(
    tx: &mut Transaction<'_, Sqlite>,
    collection_id: &CollectionId,
    company_ids: &[CompanyId],
) -> Result<AssociationError, AssociationError> {
    let collection_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM company_collections WHERE id = ?)")
            .bind(collection_id.to_string())
            .fetch_one(&mut **tx)
            .await?;
    if !collection_exists {
        return Ok(AssociationError::MissingCollection(*collection_id));
    }

    let missing: Vec<CompanyId> = sqlx::query_scalar(
        "SELECT value FROM json_each(?) \
         WHERE value NOT IN (SELECT id FROM companies) \
         ORDER BY value",
    )
    .bind(id_list_json(company_ids)?)
    .fetch_all(&mut **tx)
    .await?;
    Ok(AssociationError::MissingCompanies(missing))
}

async fn insert_association_rows(
    tx: &mut Transaction<'_, Sqlite>,
    collection_id: &CollectionId,
    company_ids: &[CompanyId],
    created_at: &str,
) -> Result<u64, sqlx::Error> {
    let collection_id = collection_id.to_string();
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO company_collection_associations (company_id, collection_id, created_at) ",
    );
    builder.push_values(company_ids, |mut row, company_id| {
        row.push_bind(*company_id)
            .push_bind(&collection_id)
            .push_bind(created_at);
    });
    builder.push(" ON CONFLICT (company_id, collection_id) DO NOTHING");

    let result = builder.build().execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

/// Errors raised while reading or writing memberships.
#[derive(Debug, Error)]
pub enum AssociationError {
    #[error("collection {0} does not exist")]
    MissingCollection(CollectionId),
    #[error("companies do not exist: {}", join_ids(.0))]
    MissingCompanies(Vec<CompanyId>),
    #[error("failed to encode id list: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn join_ids(ids: &[CompanyId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn id_list_json(ids: &[CompanyId]) -> Result<String, serde_json::Error> {
    serde_json::to_string(ids)
}

fn retain_absent(ids: &[CompanyId], found: &[CompanyId]) -> Vec<CompanyId> {
    let found: std::collections::HashSet<_> = found.iter().copied().collect();
    ids.iter().copied().filter(|id| !found.contains(id)).collect()
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    async fn seed_companies(db: &Database, count: usize) -> Vec<CompanyId> {
        let repo = db.companies();
        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            ids.push(
                repo.create(&format!("Company {n}"), Utc::now())
                    .await
                    .expect("create company"),
            );
        }
        ids
    }

    async fn member_count(db: &Database, collection_id: &CollectionId) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM company_collection_associations WHERE collection_id = ?",
        )
        .bind(collection_id.to_string())
        .fetch_one(db.pool())
        .await
        .expect("count associations")
    }

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;
        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'compan%'",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 3, "expected companies, collections and associations");
    }

    #[tokio::test]
    async fn fetch_errors_for_missing_collection() {
        let db = setup_db().await;
        let missing = CollectionId::new();
        let err = db.collections().fetch(&missing).await.unwrap_err();
        assert!(matches!(err, CollectionError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_collection_name() {
        let db = setup_db().await;
        db.collections().create("My List", Utc::now()).await.expect("first");
        let err = db
            .collections()
            .create("My List", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::DuplicateName(name) if name == "My List"));
    }

    #[tokio::test]
    async fn insert_ignoring_duplicates_is_idempotent() {
        let db = setup_db().await;
        let ids = seed_companies(&db, 3).await;
        let collection = db.collections().create("Target", Utc::now()).await.unwrap();
        let repo = db.associations();

        let mut tx = repo.begin().await.expect("begin");
        let inserted = repo
            .insert_ignoring_duplicates(&mut tx, &collection.id, &ids[..2], Utc::now())
            .await
            .expect("first insert");
        tx.commit().await.expect("commit");
        assert_eq!(inserted, 2);

        let mut tx = repo.begin().await.expect("begin");
        let inserted = repo
            .insert_ignoring_duplicates(&mut tx, &collection.id, &ids, Utc::now())
            .await
            .expect("duplicates are ignored");
        tx.commit().await.expect("commit");
        assert_eq!(inserted, 1);

        assert_eq!(member_count(&db, &collection.id).await, 3);
    }

    #[tokio::test]
    async fn insert_reports_missing_company() {
        let db = setup_db().await;
        let collection = db.collections().create("Target", Utc::now()).await.unwrap();
        let repo = db.associations();

        let mut tx = repo.begin().await.expect("begin");
        let err = repo
            .insert_ignoring_duplicates(&mut tx, &collection.id, &[4242], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AssociationError::MissingCompanies(ref ids) if ids == &[4242]));
        assert_eq!(err.to_string(), "companies do not exist: 4242");
    }

    #[tokio::test]
    async fn insert_reports_deleted_collection() {
        let db = setup_db().await;
        let ids = seed_companies(&db, 2).await;
        let collection = db.collections().create("Target", Utc::now()).await.unwrap();
        sqlx::query("DELETE FROM company_collections WHERE id = ?")
            .bind(collection.id.to_string())
            .execute(db.pool())
            .await
            .unwrap();
        let repo = db.associations();

        let mut tx = repo.begin().await.expect("begin");
        let err = repo
            .insert_ignoring_duplicates(&mut tx, &collection.id, &ids, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AssociationError::MissingCollection(id) if id == collection.id));
        assert_eq!(
            err.to_string(),
            format!("collection {} does not exist", collection.id)
        );
    }

    #[tokio::test]
    async fn rolled_back_batch_leaves_no_rows() {
        let db = setup_db().await;
        let ids = seed_companies(&db, 2).await;
        let collection = db.collections().create("Target", Utc::now()).await.unwrap();
        let repo = db.associations();

        let mut tx = repo.begin().await.expect("begin");
        repo.insert_ignoring_duplicates(&mut tx, &collection.id, &ids, Utc::now())
            .await
            .expect("insert");
        drop(tx);

        assert_eq!(member_count(&db, &collection.id).await, 0);
    }

    #[tokio::test]
    async fn find_present_and_missing_partition_the_input() {
        let db = setup_db().await;
        let ids = seed_companies(&db, 4).await;
        let collection = db.collections().create("Source", Utc::now()).await.unwrap();
        let repo = db.associations();

        let mut tx = repo.begin().await.unwrap();
        repo.insert_ignoring_duplicates(&mut tx, &collection.id, &[ids[0], ids[2]], Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let query = [ids[3], ids[2], 999, ids[0]];
        let present = repo.find_present(&collection.id, &query).await.unwrap();
        assert_eq!(present, vec![ids[0], ids[2]]);

        let missing = repo.find_missing(&collection.id, &query).await.unwrap();
        assert_eq!(missing, vec![ids[3], 999]);

        let snapshot = repo.list_company_ids(&collection.id).await.unwrap();
        assert_eq!(snapshot, vec![ids[0], ids[2]]);
    }

    #[tokio::test]
    async fn company_lookup_reports_unknown_ids() {
        let db = setup_db().await;
        let ids = seed_companies(&db, 2).await;
        let repo = db.companies();

        assert!(repo.exists(ids[0]).await.unwrap());
        assert!(!repo.exists(77).await.unwrap());
        let missing = repo.find_missing(&[ids[1], 77, 78]).await.unwrap();
        assert_eq!(missing, vec![77, 78]);
        assert!(repo.find_missing(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_companies_pages_and_flags_liked() {
        let db = setup_db().await;
        let ids = seed_companies(&db, 5).await;
        let collections = db.collections();
        let mine = collections.create(DEFAULT_COLLECTION_NAME, Utc::now()).await.unwrap();
        let liked = collections.create(LIKED_COLLECTION_NAME, Utc::now()).await.unwrap();
        let repo = db.associations();

        let mut tx = repo.begin().await.unwrap();
        repo.insert_ignoring_duplicates(&mut tx, &mine.id, &ids, Utc::now())
            .await
            .unwrap();
        repo.insert_ignoring_duplicates(&mut tx, &liked.id, &[ids[1]], Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let page = collections.list_companies(&mine.id, 1, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(
            page.companies.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![ids[1], ids[2]]
        );
        assert!(page.companies[0].liked);
        assert!(!page.companies[1].liked);

        let all = db.companies().list(0, 10).await.unwrap();
        assert_eq!(all.total, 5);
        assert_eq!(all.companies.iter().filter(|c| c.liked).count(), 1);
    }

    #[tokio::test]
    async fn collections_are_listed_by_name() {
        let db = setup_db().await;
        let collections = db.collections();
        collections.create("b-list", Utc::now()).await.unwrap();
        collections.create("a-list", Utc::now()).await.unwrap();

        let names: Vec<_> = collections
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.collection_name)
            .collect();
        assert_eq!(names, vec!["a-list", "b-list"]);
    }

    #[tokio::test]
    async fn seed_runs_once() {
        let db = setup_db().await;
        assert!(db.seed_demo_data(25, Utc::now()).await.expect("seed"));
        assert!(!db.seed_demo_data(25, Utc::now()).await.expect("second seed"));

        let collections = db.collections().list().await.unwrap();
        assert_eq!(collections.len(), 2);
        let mine = collections
            .iter()
            .find(|c| c.collection_name == DEFAULT_COLLECTION_NAME)
            .expect("default list");
        let liked = collections
            .iter()
            .find(|c| c.collection_name == LIKED_COLLECTION_NAME)
            .expect("liked list");
        assert_eq!(member_count(&db, &mine.id).await, 25);
        assert_eq!(member_count(&db, &liked.id).await, SEED_LIKED_COUNT as i64);
    }

    #[tokio::test]
    async fn file_backed_database_persists_between_pools() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("collections.db").display()
        );

        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        let created = db.collections().create("Persisted", Utc::now()).await.unwrap();
        db.pool().close().await;

        let reopened = Database::connect(&url).await.expect("reconnect");
        let fetched = reopened.collections().fetch(&created.id).await.unwrap();
        assert_eq!(fetched.collection_name, "Persisted");
    }
}
