//! Redis-backed job record store (optional).
//!
//! Records live under `job:{id}` as JSON with a server-side expiry, so
//! `purge_expired` has nothing to do.

use std::time::Duration;

use cadence_core::{Job, JobId};

use super::store::{JobRecordStore, StoreError, default_ttl};

const IO_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RedisJobRecordStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisJobRecordStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self {
            client,
            ttl: default_ttl(),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(job_id: JobId) -> String {
        format!("job:{job_id}")
    }

    /// Connections are bounded so a stalled server cannot pin a runtime
    /// thread for long.
    fn connection(&self) -> Result<redis::Connection, StoreError> {
        let storage = |e: redis::RedisError| StoreError::Storage(e.to_string());
        let conn = self
            .client
            .get_connection_with_timeout(IO_TIMEOUT)
            .map_err(storage)?;
        conn.set_read_timeout(Some(IO_TIMEOUT)).map_err(storage)?;
        conn.set_write_timeout(Some(IO_TIMEOUT)).map_err(storage)?;
        Ok(conn)
    }

    fn encode(job: &Job) -> Result<String, StoreError> {
        serde_json::to_string(job).map_err(|e| StoreError::Encoding(e.to_string()))
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

impl JobRecordStore for RedisJobRecordStore {
    fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let payload = Self::encode(job)?;
        let mut conn = self.connection()?;

        // SET ... NX replies nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(job.id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_secs())
            .arg("NX")
            .query(&mut conn)
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        match reply {
            Some(_) => Ok(()),
            None => Err(StoreError::AlreadyExists(job.id)),
        }
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let mut conn = self.connection()?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(job_id))
            .query(&mut conn)
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        raw.map(|s| serde_json::from_str(&s).map_err(|e| StoreError::Encoding(e.to_string())))
            .transpose()
    }

    fn put(&self, job: &Job) -> Result<(), StoreError> {
        let payload = Self::encode(job)?;
        let mut conn = self.connection()?;
        redis::cmd("SET")
            .arg(Self::key(job.id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_secs())
            .query::<()>(&mut conn)
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}
