use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, instrument};

use super::drivers::Driver;
use super::judge::{AlarmCondition, AlarmJudge, Verdict};
use super::{AlarmContext, AlarmIdentity};
use crate::locks::KeyedLocks;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// The judge denied the alarm
    Suppressed(Verdict),

    /// Drivers were invoked; `failed` names those that returned an error
    Delivered { attempted: usize, failed: Vec<String> },
}

impl FireOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, FireOutcome::Delivered { .. })
    }
}

/// Single entry point for raising alarms
///
/// Attempts for the same identity are serialized from judgement until the
/// last driver returned, unrelated identities fire concurrently.
pub struct AlarmDispatcher {
    judge: AlarmJudge,
    drivers: Vec<Arc<dyn Driver>>,
    locks: KeyedLocks<AlarmIdentity>,
}

impl AlarmDispatcher {
    pub fn new(judge: AlarmJudge, drivers: Vec<Arc<dyn Driver>>) -> Self {
        Self {
            judge,
            drivers,
            locks: KeyedLocks::new(),
        }
    }

    pub fn judge(&self) -> &AlarmJudge {
        &self.judge
    }

    pub fn driver_names(&self) -> Vec<&str> {
        self.drivers.iter().map(|driver| driver.name()).collect()
    }

    #[instrument(skip(self, content, context), fields(identity = %condition.identity))]
    pub async fn fire(
        &self,
        condition: &AlarmCondition,
        title: &str,
        content: &str,
        context: &AlarmContext,
    ) -> FireOutcome {
        let _guard = self.locks.lock(condition.identity.clone()).await;

        let verdict = self.judge.evaluate(condition, Utc::now());
        if !verdict.allowed() {
            debug!("alarm suppressed: {verdict}");
            return FireOutcome::Suppressed(verdict);
        }

        info!("Setting off alarm: {title}");
        let mut failed = Vec::new();
        for driver in &self.drivers {
            let delivery = AssertUnwindSafe(driver.deliver(title, content, context)).catch_unwind();
            match delivery.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("alarm driver '{}' failed: {e}", driver.name());
                    failed.push(driver.name().to_string());
                }
                Err(_) => {
                    error!("alarm driver '{}' panicked", driver.name());
                    failed.push(driver.name().to_string());
                }
            }
        }

        FireOutcome::Delivered {
            attempted: self.drivers.len(),
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::alarm::drivers::DriverError;
    use crate::alarm::timer::AlarmTimer;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Driver for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn deliver(&self, _: &str, _: &str, _: &AlarmContext) -> Result<(), DriverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Driver for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn deliver(&self, _: &str, _: &str, _: &AlarmContext) -> Result<(), DriverError> {
            Err(DriverError::Email("nope".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Driver for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn deliver(&self, _: &str, _: &str, _: &AlarmContext) -> Result<(), DriverError> {
            panic!("driver bug")
        }
    }

    fn dispatcher(drivers: Vec<Arc<dyn Driver>>) -> AlarmDispatcher {
        AlarmDispatcher::new(
            AlarmJudge::new(Duration::from_secs(600), AlarmTimer::default()),
            drivers,
        )
    }

    #[tokio::test]
    async fn test_failing_drivers_do_not_stop_the_rest() {
        let counting = Arc::new(Counting::default());
        let dispatcher = dispatcher(vec![
            Arc::new(Broken),
            Arc::new(Panicking),
            counting.clone(),
        ]);

        let outcome = dispatcher
            .fire(&AlarmCondition::new("f"), "title", "content", &AlarmContext::new())
            .await;

        assert_eq!(
            outcome,
            FireOutcome::Delivered {
                attempted: 3,
                failed: vec!["broken".to_string(), "panicking".to_string()],
            }
        );
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fires_of_same_identity_deliver_once() {
        let counting = Arc::new(Counting::default());
        let dispatcher = Arc::new(dispatcher(vec![counting.clone()]));

        let fires = (0..16).map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .fire(&AlarmCondition::new("same"), "t", "c", &AlarmContext::new())
                    .await
            })
        });
        let outcomes = futures::future::join_all(fires).await;

        let delivered = outcomes
            .into_iter()
            .filter(|outcome| outcome.as_ref().is_ok_and(FireOutcome::delivered))
            .count();
        assert_eq!(delivered, 1);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_suppressed_alarm_reports_reason() {
        let dispatcher = dispatcher(vec![Arc::new(Counting::default())]);
        let condition = AlarmCondition::new("f").on_process(true);

        let outcome = dispatcher
            .fire(&condition, "t", "c", &AlarmContext::new())
            .await;

        assert_eq!(outcome, FireOutcome::Suppressed(Verdict::OnProcess));
    }
}
