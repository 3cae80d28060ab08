use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::BoxFuture;
use log::trace;
use tokio::sync::{mpsc, oneshot};

use crate::core::error::ChainError;

use super::ShutdownSignal;

/// Periodic work driven by a [`Suspendable`] loop.
pub type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

enum Command {
    Pause(oneshot::Sender<bool>),
    Resume(oneshot::Sender<bool>),
}

/// Periodic action that can be paused and resumed cooperatively.
///
/// At most one `run` is active at a time. Pause and resume are idempotent
/// and report whether a transition occurred; once `pause` returns, no new
/// action invocation starts until `resume`. In-flight invocations run to
/// completion.
pub struct Suspendable {
    action: Action,
    period: Duration,
    commands: mpsc::Sender<Command>,
    receiver: StdMutex<Option<mpsc::Receiver<Command>>>,
}

impl Suspendable {
    pub fn new(action: Action, period: Duration) -> Self {
        let (commands, receiver) = mpsc::channel(1);
        Suspendable {
            action,
            period,
            commands,
            receiver: StdMutex::new(Some(receiver)),
        }
    }

    /// Runs the loop until `shutdown` fires, reporting readiness through
    /// `started`.
    pub async fn run(
        &self,
        shutdown: &ShutdownSignal,
        started: Option<oneshot::Sender<()>>,
    ) -> Result<(), ChainError> {
        let mut receiver = {
            let mut guard = self.receiver.lock().unwrap_or_else(|e| e.into_inner());
            guard.take().ok_or_else(|| {
                ChainError::InvalidArgument("worker is already running".to_string())
            })?
        };

        if let Some(started) = started {
            let _ = started.send(());
        }

        let mut paused = false;
        let result = loop {
            if shutdown.is_cancelled() {
                break Err(ChainError::Cancelled);
            }

            if paused {
                tokio::select! {
                    command = receiver.recv() => match command {
                        Some(command) => paused = apply(command, paused),
                        None => break Err(ChainError::Cancelled),
                    },
                    _ = shutdown.cancelled() => break Err(ChainError::Cancelled),
                }
                continue;
            }

            tokio::select! {
                command = receiver.recv() => match command {
                    Some(command) => paused = apply(command, paused),
                    None => break Err(ChainError::Cancelled),
                },
                _ = shutdown.cancelled() => break Err(ChainError::Cancelled),
                _ = tokio::time::sleep(self.period) => {
                    // Shutdown aborts an in-flight invocation at its next
                    // await point; pause does not.
                    tokio::select! {
                        _ = shutdown.cancelled() => break Err(ChainError::Cancelled),
                        _ = (self.action)() => {}
                    }
                }
            }
        };

        // Hand the receiver back so the worker can be run again later.
        let mut guard = self.receiver.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(receiver);
        result
    }

    /// Suspends scheduling of the action. Returns whether this call caused
    /// the transition.
    pub async fn pause(&self) -> Result<bool, ChainError> {
        self.send(Command::Pause).await
    }

    /// Resumes scheduling of the action. Returns whether this call caused
    /// the transition.
    pub async fn resume(&self) -> Result<bool, ChainError> {
        self.send(Command::Resume).await
    }

    async fn send(
        &self,
        make: impl FnOnce(oneshot::Sender<bool>) -> Command,
    ) -> Result<bool, ChainError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(make(ack_tx))
            .await
            .map_err(|_| ChainError::Cancelled)?;
        ack_rx.await.map_err(|_| ChainError::Cancelled)
    }
}

fn apply(command: Command, paused: bool) -> bool {
    match command {
        Command::Pause(ack) => {
            trace!("worker paused");
            let _ = ack.send(!paused);
            true
        }
        Command::Resume(ack) => {
            trace!("worker resumed");
            let _ = ack.send(paused);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::super::shutdown_channel;
    use super::*;

    fn counting_action(counter: Arc<AtomicUsize>) -> Action {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_periodically_until_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(Suspendable::new(
            counting_action(counter.clone()),
            Duration::from_millis(10),
        ));

        let (handle, signal) = shutdown_channel();
        let task = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(&signal, None).await })
        };

        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(counter.load(Ordering::SeqCst) >= 4);

        handle.trigger();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(ChainError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_scheduling() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(Suspendable::new(
            counting_action(counter.clone()),
            Duration::from_millis(10),
        ));

        let (handle, signal) = shutdown_channel();
        let task = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(&signal, None).await })
        };

        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(worker.pause().await.unwrap());
        // second pause reports no transition
        assert!(!worker.pause().await.unwrap());

        let before = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), before);

        assert!(worker.resume().await.unwrap());
        assert!(!worker.resume().await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(counter.load(Ordering::SeqCst) > before);

        handle.trigger();
        let _ = task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_signal_and_single_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(Suspendable::new(
            counting_action(counter),
            Duration::from_millis(10),
        ));

        let (handle, signal) = shutdown_channel();
        let (started_tx, started_rx) = oneshot::channel();
        let task = {
            let worker = worker.clone();
            let signal = signal.clone();
            tokio::spawn(async move { worker.run(&signal, Some(started_tx)).await })
        };

        started_rx.await.unwrap();

        // a second concurrent run is rejected
        let second = worker.run(&signal, None).await;
        assert!(matches!(second, Err(ChainError::InvalidArgument(_))));

        handle.trigger();
        let _ = task.await.unwrap();
    }
}
