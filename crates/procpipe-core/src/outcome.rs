use crate::error::ProcessError;
use std::sync::Arc;
use tokio::sync::watch;

/// Terminal result of a session: the exit code, or why there is none
pub type ExitOutcome = Result<i32, ProcessError>;

/// Notification code reported when a session was cancelled or disposed
pub const CANCELLED_EXIT_CODE: i32 = -1;

/// Notification code reported when a session settled with a fault
pub const FAULTED_EXIT_CODE: i32 = -2;

/// Collapse an outcome into the numeric code handed to exit notifications
pub fn notification_code(outcome: &ExitOutcome) -> i32 {
    match outcome {
        Ok(code) => *code,
        Err(e) if e.is_cancelled() => CANCELLED_EXIT_CODE,
        Err(_) => FAULTED_EXIT_CODE,
    }
}

/// One-shot cell: the first resolution wins, every waiter sees it
#[derive(Clone, Debug)]
pub struct OutcomeCell {
    tx: Arc<watch::Sender<Option<ExitOutcome>>>,
}

impl Default for OutcomeCell {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Store `outcome` unless one is already stored. Returns whether it won.
    pub fn resolve(&self, outcome: ExitOutcome) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    pub fn get(&self) -> Option<ExitOutcome> {
        self.tx.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub async fn wait(&self) -> ExitOutcome {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot
                .clone()
                .unwrap_or_else(|| Err(ProcessError::Internal("empty outcome".to_string()))),
            Err(_) => Err(ProcessError::Internal("outcome cell closed".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let cell = OutcomeCell::new();
        assert!(cell.get().is_none());
        assert!(cell.resolve(Ok(3)));
        assert!(!cell.resolve(Err(ProcessError::Cancelled)));
        assert!(!cell.resolve(Ok(0)));

        assert!(matches!(cell.get(), Some(Ok(3))));
        assert!(matches!(cell.wait().await, Ok(3)));
    }

    #[tokio::test]
    async fn test_every_waiter_observes_the_outcome() {
        let cell = OutcomeCell::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                tokio::spawn(async move { cell.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        cell.resolve(Err(ProcessError::Cancelled));

        for waiter in waiters {
            assert!(waiter.await.unwrap().unwrap_err().is_cancelled());
        }
    }

    #[test]
    fn test_notification_codes() {
        assert_eq!(notification_code(&Ok(7)), 7);
        assert_eq!(notification_code(&Err(ProcessError::Cancelled)), CANCELLED_EXIT_CODE);
        assert_eq!(
            notification_code(&Err(ProcessError::Internal("x".to_string()))),
            FAULTED_EXIT_CODE
        );
    }
}
