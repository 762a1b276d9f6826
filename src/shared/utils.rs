use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::PgConnection;
use log::warn;
use rand::Rng;
use std::time::Duration;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(database_url: &str) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().build(manager)
}

const RETRY_ATTEMPTS: u32 = 5;
const RETRY_BASE_MS: u64 = 50;

/// True for failures worth retrying: Postgres deadlocks and serialization
/// conflicts. Everything else surfaces to the caller unchanged.
pub fn is_deadlock(err: &DieselError) -> bool {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => true,
        DieselError::DatabaseError(_, info) => info.message().contains("deadlock detected"),
        _ => false,
    }
}

pub fn backoff_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_MS * 2u64.pow(attempt);
    let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_MS / 2);
    Duration::from_millis(base + jitter)
}

/// Runs a diesel operation, retrying deadlock/serialization failures with
/// fixed exponential backoff. The operation must be safe to re-issue.
pub async fn with_deadlock_retry<T, F>(mut op: F) -> Result<T, DieselError>
where
    F: FnMut() -> Result<T, DieselError>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_deadlock(&err) && attempt + 1 < RETRY_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(
                    "database deadlock, retrying in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    RETRY_ATTEMPTS
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_failure_is_retryable() {
        let err = DieselError::DatabaseError(
            DatabaseErrorKind::SerializationFailure,
            Box::new("could not serialize access".to_string()),
        );
        assert!(is_deadlock(&err));
    }

    #[test]
    fn deadlock_message_is_retryable() {
        let err = DieselError::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new("deadlock detected".to_string()),
        );
        assert!(is_deadlock(&err));
    }

    #[test]
    fn not_found_is_not_retryable() {
        assert!(!is_deadlock(&DieselError::NotFound));
    }

    #[test]
    fn backoff_grows_exponentially() {
        for attempt in 0..3 {
            let d = backoff_delay(attempt);
            let floor = Duration::from_millis(RETRY_BASE_MS * 2u64.pow(attempt));
            assert!(d >= floor);
            assert!(d < floor + Duration::from_millis(RETRY_BASE_MS));
        }
    }

    #[tokio::test]
    async fn retry_gives_up_on_plain_errors() {
        let mut calls = 0;
        let result: Result<(), _> = with_deadlock_retry(|| {
            calls += 1;
            Err(DieselError::NotFound)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_recovers_after_deadlock() {
        let mut calls = 0;
        let result = with_deadlock_retry(|| {
            calls += 1;
            if calls < 3 {
                Err(DieselError::DatabaseError(
                    DatabaseErrorKind::SerializationFailure,
                    Box::new("serialize".to_string()),
                ))
            } else {
                Ok(calls)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }
}
