use arc_swap::ArcSwapOption;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// State shared between the listener's connection handlers and the
/// coordinator's wait loop. One instance per harvest session, passed around
/// as an `Arc` so independent harvesters can coexist on different ports.
pub struct SessionState {
    /// Host of the target site, matched against intercepted request URLs
    pub target_host: String,

    /// Challenge key substituted into the served page
    pub site_key: String,

    /// Challenge page template, read fresh on every hit
    pub template_path: PathBuf,

    /// Captured token. `None` until the browser posts a result; an empty
    /// string is a present value, distinct from unset.
    result: ArcSwapOption<String>,

    solved: Notify,
}

impl SessionState {
    pub fn new(target_host: String, site_key: String, template_path: PathBuf) -> Self {
        Self {
            target_host,
            site_key,
            template_path,
            result: ArcSwapOption::empty(),
            solved: Notify::new(),
        }
    }

    /// Commit a captured token and wake the coordinator. A later commit
    /// overwrites an earlier one; whichever value the coordinator observes
    /// wins.
    pub fn commit_result(&self, token: String) {
        self.result.store(Some(Arc::new(token)));
        self.solved.notify_waiters();
    }

    pub fn result(&self) -> Option<String> {
        self.result.load_full().map(|token| (*token).clone())
    }

    /// Suspend until a result is present. No timeout: the wait is indefinite
    /// until a human solves the challenge.
    pub async fn wait_for_result(&self) -> String {
        loop {
            let notified = self.solved.notified();
            if let Some(token) = self.result() {
                return token;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session() -> Arc<SessionState> {
        Arc::new(SessionState::new(
            "example.test".to_string(),
            "ABC123".to_string(),
            PathBuf::from("./harvester-body.html"),
        ))
    }

    #[test]
    fn test_result_starts_unset() {
        assert!(session().result().is_none());
    }

    #[test]
    fn test_commit_overwrites_previous_result() {
        let session = session();
        session.commit_result("first".to_string());
        session.commit_result("second".to_string());
        assert_eq!(session.result().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_wait_observes_commit_from_another_task() {
        let session = session();

        let writer = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.commit_result("tok-xyz".to_string());
        });

        let token = session.wait_for_result().await;
        assert_eq!(token, "tok-xyz");
    }

    #[tokio::test]
    async fn test_empty_token_counts_as_solved() {
        let session = session();
        session.commit_result(String::new());

        // Presence, not truthiness: an empty token resolves the wait.
        let token = tokio::time::timeout(Duration::from_secs(1), session.wait_for_result())
            .await
            .expect("wait should resolve for an empty token");
        assert_eq!(token, "");
    }
}
