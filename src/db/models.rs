/// Database row types matching `migrations/0001_init.sql`.

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BaselineRow {
    pub symbol: String,
    pub average_daily_volume: f64,
    pub sample_count: i64,
    /// Unix milliseconds.
    pub last_refreshed_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CycleLockRow {
    pub name: String,
    pub holder: String,
    pub acquired_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateSnapshotRow {
    pub generation: i64,
    pub generated_at: i64,
    pub candidate_count: i64,
    /// JSON-encoded `PublishedCandidates`.
    pub payload: String,
}
