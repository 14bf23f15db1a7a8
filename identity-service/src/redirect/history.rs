use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{self, SessionError, SessionState, REDIRECT_HISTORY_KEY};

/// One redirect the session was sent through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectHistoryEntry {
    pub from: String,
    pub to: String,
    pub status: u16,
    pub request_id: Option<String>,
    pub at: DateTime<Utc>,
}

pub async fn load(session: &dyn SessionState) -> Result<Vec<RedirectHistoryEntry>, SessionError> {
    Ok(session::get(session, REDIRECT_HISTORY_KEY)
        .await?
        .unwrap_or_default())
}

/// Append `entry` unless it targets the same place as the latest entry.
/// Keeps at most `limit` entries, dropping the oldest. Returns whether it was recorded.
pub async fn record(
    session: &dyn SessionState,
    entry: RedirectHistoryEntry,
    limit: usize,
) -> Result<bool, SessionError> {
    let mut history = load(session).await?;

    if history.last().is_some_and(|last| last.to == entry.to) {
        return Ok(false);
    }

    history.push(entry);
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }

    session::insert(session, REDIRECT_HISTORY_KEY, &history).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;

    fn entry(to: &str) -> RedirectHistoryEntry {
        RedirectHistoryEntry {
            from: "/dashboard".to_string(),
            to: to.to_string(),
            status: 307,
            request_id: Some("req-1".to_string()),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_repeat_target_not_recorded() {
        let session = MemorySession::new();

        assert!(record(&session, entry("/a"), 10).await.unwrap());
        assert!(!record(&session, entry("/a"), 10).await.unwrap());
        assert!(record(&session, entry("/b"), 10).await.unwrap());
        assert!(record(&session, entry("/a"), 10).await.unwrap());

        assert_eq!(load(&session).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let session = MemorySession::new();

        for i in 0..5 {
            record(&session, entry(&format!("/t{}", i)), 3).await.unwrap();
        }

        let history = load(&session).await.unwrap();
        let targets: Vec<&str> = history.iter().map(|e| e.to.as_str()).collect();
        assert_eq!(targets, vec!["/t2", "/t3", "/t4"]);
    }
}
