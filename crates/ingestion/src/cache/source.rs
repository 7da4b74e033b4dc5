use chrono::{DateTime, Utc};
use hydro_common::HydroResult;
use storage::{Row, Statement};

use super::{CachedDetail, Preload, SurrogateKeyCache};

/// Natural key of an ingested source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub path: String,
    pub output_time: Option<DateTime<Utc>>,
}

/// A row of `wres.source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDetail {
    pub key: SourceKey,
}

impl CachedDetail for SourceDetail {
    type Key = SourceKey;

    const KIND: &'static str = "source";
    const CAPACITY: usize = 500;

    fn key(&self) -> SourceKey {
        self.key.clone()
    }

    fn save_statement(&self) -> Statement {
        Statement::new(
            "INSERT INTO wres.source (path, output_time)
             VALUES ($1, $2)
             ON CONFLICT (path, output_time) DO UPDATE SET path = EXCLUDED.path
             RETURNING source_id",
        )
        .bind(self.key.path.as_str())
        .bind(self.key.output_time)
    }
}

impl Preload for SourceDetail {
    fn preload_statement(limit: usize) -> Statement {
        Statement::new("SELECT source_id, path, output_time FROM wres.source LIMIT $1")
            .bind(limit as i64)
    }

    fn from_row(row: &Row) -> HydroResult<(i32, Self)> {
        Ok((
            row.int("source_id")?,
            Self {
                key: SourceKey {
                    path: row.text("path")?,
                    output_time: row.timestamp("output_time")?,
                },
            },
        ))
    }
}

pub type SourceCache = SurrogateKeyCache<SourceDetail>;

impl SurrogateKeyCache<SourceDetail> {
    pub async fn source_id(&self, key: SourceKey) -> HydroResult<i32> {
        self.resolve(SourceDetail { key }).await
    }
}
