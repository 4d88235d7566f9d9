/// User primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Owning user of an experiment group.
pub type UserId = DbId;

/// Experiment groups are identified by application-assigned UUIDs.
pub type GroupId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
