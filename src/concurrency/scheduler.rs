use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

/// Runs a task repeatedly on a fixed cadence.
///
/// The first run happens one full period after the call, then every `every` after
/// that. Missed ticks are delayed rather than bursted, so a slow run never causes
/// back-to-back executions. Returns a [`JoinHandle`] that can be used to cancel the
/// loop.
pub fn schedule_every<F, Fut>(every: Duration, task_name: &'static str, block: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::task::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately; consume it so the
        // first execution lands one period from now.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            debug!(task_name, "executing scheduled task");
            block().await;
            debug!(task_name, "scheduled task completed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_schedule_every_executes_repeatedly() {
        let counter = Arc::new(Mutex::new(0u32));
        let counter_clone = counter.clone();

        let handle = schedule_every(Duration::from_millis(20), "test_task", move || {
            let counter = counter_clone.clone();
            async move {
                let mut guard = counter.lock().unwrap();
                *guard += 1;
            }
        });

        tokio::time::sleep(Duration::from_millis(110)).await;
        handle.abort();

        let executed = *counter.lock().unwrap();
        assert!(executed >= 2, "expected at least 2 executions, got {executed}");
    }

    #[tokio::test]
    async fn test_schedule_every_first_run_is_delayed() {
        let counter = Arc::new(Mutex::new(0u32));
        let counter_clone = counter.clone();

        let handle = schedule_every(Duration::from_secs(60), "delayed_task", move || {
            let counter = counter_clone.clone();
            async move {
                let mut guard = counter.lock().unwrap();
                *guard += 1;
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();

        assert_eq!(*counter.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_schedule_every_cancellation() {
        let counter = Arc::new(Mutex::new(0u32));
        let counter_clone = counter.clone();

        let handle = schedule_every(Duration::from_millis(10), "cancellable_task", move || {
            let counter = counter_clone.clone();
            async move {
                let mut guard = counter.lock().unwrap();
                *guard += 1;
            }
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.abort();
        let after_abort = *counter.lock().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*counter.lock().unwrap(), after_abort);
        assert!(handle.is_finished());
    }
}
