use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use murmur_types::ChatError;

use crate::Database;

/// Upper bound on a single store call.
pub const STORE_DEADLINE: Duration = Duration::from_secs(10);

/// Run blocking store work off the async runtime, bounded by `deadline`.
///
/// The timeout scope ends when this returns: on expiry the caller gets
/// `Internal` and the blocking result, if any, is discarded.
pub async fn run<T, E, F>(db: &Arc<Database>, deadline: Duration, op: F) -> Result<T, E>
where
    F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<ChatError> + Send + 'static,
{
    let db = db.clone();
    let task = tokio::task::spawn_blocking(move || op(&db));

    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("spawn_blocking join error: {}", e);
            Err(ChatError::Internal("internal server error".into()).into())
        }
        Err(_) => Err(ChatError::Internal("store deadline exceeded".into()).into()),
    }
}

/// Map an unexpected store failure to `Internal`, keeping the detail in the log.
pub fn internal(err: anyhow::Error) -> ChatError {
    error!("Store error: {:#}", err);
    ChatError::Internal("internal server error".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_the_closure_result() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let n: Result<u64, ChatError> = run(&db, STORE_DEADLINE, |db| db.count_messages().map_err(internal)).await;
        assert_eq!(n, Ok(0));
    }

    #[tokio::test]
    async fn expiry_is_internal() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let result: Result<(), ChatError> = run(&db, Duration::from_millis(10), |_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert_eq!(result, Err(ChatError::Internal("store deadline exceeded".into())));
    }
}
