use super::models::Record;
use crate::errors::{AppError, ErrorKind};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use sqlx::PgPool;

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

const RECORD_COLUMNS: &str = "id, stream_id, index, name, path, content, content_type, size,
    is_binary, content_hash, hash, previous_hash, user_id, headers, storage, deleted, purged,
    created_at";

pub struct AppendInput<'a> {
    pub stream_id: i64,
    pub stream_path: &'a str,
    pub author: &'a str,
    pub name: &'a str,
    pub content_bytes: &'a [u8],
    pub content_type: &'a str,
    pub headers: Value,
    pub external_blob: Option<super::models::ExternalBlobRef>,
    /// Set only by `soft_delete_record`: marks the appended row itself as a
    /// tombstone so the unique view's grouping (keyed on the name with any
    /// `.deleted.<epoch>` suffix stripped) treats it as superseding the
    /// name it tombstones.
    pub deleted: bool,
}

/// Locks the owning stream row for the duration of the transaction so two
/// concurrent appenders cannot both observe the same `(index, hash)` tail;
/// the loser blocks on the row lock rather than racing the unique
/// `(stream_id, index)` constraint.
pub async fn append_record(pool: &PgPool, input: AppendInput<'_>) -> Result<Record, AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query("select id from streams where id = $1 for update")
        .bind(input.stream_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::new(ErrorKind::StreamNotFound, "stream not found"))?;

    let tail: Option<(i64, String)> = sqlx::query_as(
        "select index, hash from records where stream_id = $1 order by index desc limit 1",
    )
    .bind(input.stream_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (next_index, previous_hash) = match tail {
        Some((idx, hash)) => (idx + 1, Some(hash)),
        None => (0, None),
    };

    let content_hash = crate::hash::content_hash(input.content_bytes);
    let created_at = now_iso();
    let hash = crate::hash::chain_hash(previous_hash.as_deref(), &content_hash, input.author, &created_at);

    let (content, storage, is_binary) = match &input.external_blob {
        Some(blob) => (String::new(), Some(serde_json::to_value(blob).unwrap()), true),
        None => (String::from_utf8_lossy(input.content_bytes).into_owned(), None, false),
    };

    let path = format!("{}/{}", input.stream_path.trim_end_matches('/'), input.name);
    let created_at_ts = chrono::DateTime::parse_from_rfc3339(&created_at)
        .expect("now_iso always produces a valid rfc3339 timestamp");

    let record = sqlx::query_as::<_, Record>(&format!(
        "insert into records (stream_id, index, name, path, content, content_type, size,
            is_binary, content_hash, hash, previous_hash, user_id, headers, storage, deleted, created_at)
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
         returning {cols}",
        cols = RECORD_COLUMNS
    ))
    .bind(input.stream_id)
    .bind(next_index)
    .bind(input.name)
    .bind(&path)
    .bind(&content)
    .bind(input.content_type)
    .bind(input.content_bytes.len() as i64)
    .bind(is_binary)
    .bind(&content_hash)
    .bind(&hash)
    .bind(&previous_hash)
    .bind(input.author)
    .bind(&input.headers)
    .bind(&storage)
    .bind(input.deleted)
    .bind(created_at_ts)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(record)
}

pub async fn soft_delete_record(
    pool: &PgPool,
    stream_id: i64,
    stream_path: &str,
    name: &str,
    user_id: &str,
) -> Result<Record, AppError> {
    let tombstone_name = format!("{}.deleted.{}", name, Utc::now().timestamp_millis());
    let body = serde_json::json!({
        "deleted": true,
        "originalName": name,
        "deletedAt": now_iso(),
        "deletedBy": user_id,
    });
    append_record(
        pool,
        AppendInput {
            stream_id,
            stream_path,
            author: user_id,
            name: &tombstone_name,
            content_bytes: body.to_string().as_bytes(),
            content_type: "application/json",
            headers: serde_json::json!({}),
            external_blob: None,
            deleted: true,
        },
    )
    .await
}

/// Overwrites `content` in place and flips `purged`; `hash`/`previous_hash`
/// are left untouched so the chain still verifies.
pub async fn purge_record(pool: &PgPool, stream_id: i64, name: &str, user_id: &str) -> Result<Record, AppError> {
    let record = get_record_by_name(pool, stream_id, name, true).await?;
    let marker = serde_json::json!({ "purged": true, "by": user_id, "at": now_iso() }).to_string();
    let record = sqlx::query_as::<_, Record>(&format!(
        "update records set content = $1, size = $2, purged = true where id = $3 returning {cols}",
        cols = RECORD_COLUMNS
    ))
    .bind(&marker)
    .bind(marker.len() as i64)
    .bind(record.id)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

pub struct ListOptions {
    pub limit: i64,
    pub after: Option<i64>,
    pub fields: Option<Vec<String>>,
    pub max_content_size: Option<usize>,
}

pub struct RecordsPage {
    pub records: Vec<Value>,
    pub total: i64,
    pub has_more: bool,
}

async fn count_records(pool: &PgPool, stream_id: i64) -> Result<i64, AppError> {
    let total: i64 = sqlx::query_scalar("select count(*) from records where stream_id = $1")
        .bind(stream_id)
        .fetch_one(pool)
        .await?;
    Ok(total)
}

fn project(record: &Record, fields: &Option<Vec<String>>, max_content_size: Option<usize>) -> Value {
    let mut value = serde_json::to_value(record).expect("Record always serializes");
    if let (Some(limit), Some(obj)) = (max_content_size, value.as_object_mut()) {
        if record.content_type.starts_with("application/json") {
            // JSON content is left intact even when a truncation limit is set.
        } else if let Some(content) = obj.get("content").and_then(|c| c.as_str()) {
            let bytes = content.as_bytes();
            if bytes.len() > limit {
                let truncated = String::from_utf8_lossy(&bytes[..limit]).into_owned();
                obj.insert("content".to_string(), Value::String(truncated));
            }
        }
    }
    if let Some(fields) = fields {
        if let Some(obj) = value.as_object() {
            let filtered = obj
                .iter()
                .filter(|(k, _)| fields.iter().any(|f| f == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return Value::Object(filtered);
        }
    }
    value
}

pub async fn list_records(pool: &PgPool, stream_id: i64, opts: &ListOptions) -> Result<RecordsPage, AppError> {
    let total = count_records(pool, stream_id).await?;

    let lower_bound = match opts.after {
        None => -1,
        Some(after) if after >= 0 => after,
        Some(neg) => (total + neg - 1).max(-1),
    };

    let records = sqlx::query_as::<_, Record>(&format!(
        "select {cols} from records where stream_id = $1 and index > $2 order by index asc limit $3",
        cols = RECORD_COLUMNS
    ))
    .bind(stream_id)
    .bind(lower_bound)
    .bind(opts.limit)
    .fetch_all(pool)
    .await?;

    let has_more = lower_bound + 1 + (records.len() as i64) < total;
    let records = records.iter().map(|r| project(r, &opts.fields, opts.max_content_size)).collect();
    Ok(RecordsPage { records, total, has_more })
}

/// A tombstone is appended under its own name (`<original>.deleted.<epoch>`),
/// so "the latest row for a name" has to be computed after folding tombstone
/// names back onto the name they tombstone, not on the literal `name`
/// column. Groups by that folded name, keeps each group's highest-`index`
/// row (purged rows excluded up front, since a purge never changes which
/// row is latest) and drops the group entirely when that row is itself a
/// tombstone, then pages the survivors by `index`.
const UNIQUE_GROUPED_CTE: &str = "
    select *, coalesce(substring(name from '^(.*)\\.deleted\\.[0-9]+$'), name) as group_name
    from records
    where stream_id = $1 and purged = false";

pub async fn list_unique_records(pool: &PgPool, stream_id: i64, opts: &ListOptions) -> Result<RecordsPage, AppError> {
    let total: i64 = sqlx::query_scalar(&format!(
        "select count(*) from (
            select distinct on (group_name) * from ({grouped}) grouped
            order by group_name, index desc
         ) latest
         where deleted = false",
        grouped = UNIQUE_GROUPED_CTE
    ))
    .bind(stream_id)
    .fetch_one(pool)
    .await?;

    let lower_bound = match opts.after {
        None => -1,
        Some(after) if after >= 0 => after,
        Some(neg) => (total + neg - 1).max(-1),
    };

    let records = sqlx::query_as::<_, Record>(&format!(
        "select {cols} from (
            select distinct on (group_name) * from ({grouped}) grouped
            order by group_name, index desc
         ) latest
         where deleted = false and index > $2
         order by index asc
         limit $3",
        cols = RECORD_COLUMNS,
        grouped = UNIQUE_GROUPED_CTE
    ))
    .bind(stream_id)
    .bind(lower_bound)
    .bind(opts.limit)
    .fetch_all(pool)
    .await?;

    let has_more = lower_bound + 1 + (records.len() as i64) < total;
    let records = records.iter().map(|r| project(r, &opts.fields, opts.max_content_size)).collect();
    Ok(RecordsPage { records, total, has_more })
}

/// Pages across several streams at once (the `recursive` listing flag):
/// a stream's own sequential `index` is meaningless across streams, so
/// position is instead a `row_number()` over the union ordered by
/// `created_at`, with `stream_id`/`index` as tiebreakers for same-instant
/// writes — the same negative-`after`/`limit` windowing as `list_records`
/// just applied to that synthetic position instead of `index`.
pub async fn list_records_recursive(
    pool: &PgPool,
    stream_ids: &[i64],
    opts: &ListOptions,
) -> Result<RecordsPage, AppError> {
    if stream_ids.is_empty() {
        return Ok(RecordsPage { records: vec![], total: 0, has_more: false });
    }

    let total: i64 = sqlx::query_scalar("select count(*) from records where stream_id = any($1)")
        .bind(stream_ids)
        .fetch_one(pool)
        .await?;

    let lower_bound = match opts.after {
        None => -1,
        Some(after) if after >= 0 => after,
        Some(neg) => (total + neg - 1).max(-1),
    };

    let records = sqlx::query_as::<_, Record>(&format!(
        "select {cols} from (
            select *, row_number() over (order by created_at asc, stream_id asc, index asc) - 1 as seq
            from records where stream_id = any($1)
         ) ordered
         where seq > $2
         order by seq asc
         limit $3",
        cols = RECORD_COLUMNS
    ))
    .bind(stream_ids)
    .bind(lower_bound)
    .bind(opts.limit)
    .fetch_all(pool)
    .await?;

    let has_more = lower_bound + 1 + (records.len() as i64) < total;
    let records = records.iter().map(|r| project(r, &opts.fields, opts.max_content_size)).collect();
    Ok(RecordsPage { records, total, has_more })
}

pub async fn get_record_by_name(
    pool: &PgPool,
    stream_id: i64,
    name: &str,
    include_tombstoned: bool,
) -> Result<Record, AppError> {
    let query = if include_tombstoned {
        "select * from (select * from records where stream_id = $1 and name = $2) t
         order by index desc limit 1"
    } else {
        "select * from (select * from records where stream_id = $1 and name = $2
            and deleted = false and purged = false) t
         order by index desc limit 1"
    };
    sqlx::query_as::<_, Record>(query)
        .bind(stream_id)
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::new(ErrorKind::RecordNotFound, format!("record '{}' not found", name)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSpec {
    Single(i64),
    Range(i64, i64),
}

pub fn parse_index_spec(raw: &str) -> Result<IndexSpec, AppError> {
    if let Some((a, b)) = raw.split_once(':') {
        let a: i64 = a.parse().map_err(|_| AppError::new(ErrorKind::InvalidInput, "invalid index range"))?;
        let b: i64 = b.parse().map_err(|_| AppError::new(ErrorKind::InvalidInput, "invalid index range"))?;
        Ok(IndexSpec::Range(a, b))
    } else {
        let i: i64 = raw.parse().map_err(|_| AppError::new(ErrorKind::InvalidInput, "invalid index"))?;
        Ok(IndexSpec::Single(i))
    }
}

fn resolve_index(total: i64, idx: i64) -> i64 {
    if idx < 0 {
        total + idx
    } else {
        idx
    }
}

pub async fn get_records_by_index(
    pool: &PgPool,
    stream_id: i64,
    spec: IndexSpec,
) -> Result<Vec<Record>, AppError> {
    let total = count_records(pool, stream_id).await?;
    match spec {
        IndexSpec::Single(idx) => {
            let resolved = resolve_index(total, idx);
            let record = sqlx::query_as::<_, Record>(&format!(
                "select {cols} from records where stream_id = $1 and index = $2",
                cols = RECORD_COLUMNS
            ))
            .bind(stream_id)
            .bind(resolved)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::new(ErrorKind::RecordNotFound, "no record at that index"))?;
            Ok(vec![record])
        }
        IndexSpec::Range(a, b) => {
            let from = resolve_index(total, a);
            let to = resolve_index(total, b);
            let records = sqlx::query_as::<_, Record>(&format!(
                "select {cols} from records where stream_id = $1 and index >= $2 and index < $3
                 order by index asc",
                cols = RECORD_COLUMNS
            ))
            .bind(stream_id)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await?;
            Ok(records)
        }
    }
}
