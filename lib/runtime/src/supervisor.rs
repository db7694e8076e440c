//! Supervisor: signal handling and bounded restart.
//!
//! Every long-running component (manager, activator) runs under a
//! supervisor. SIGHUP stops the component, sleeps `restart_count x 1s`,
//! and starts it again with a fresh shutdown channel; more than five
//! restarts end the process with exit code 1. SIGINT/SIGTERM stop it
//! gracefully with exit code 0. Signal delivery is a plain channel so
//! tests inject signals directly.

use crate::error::RuntimeError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Default bound on SIGHUP restarts.
const DEFAULT_RESTART_LIMIT: u32 = 5;

/// Default linear backoff base.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// A component the supervisor can stop and start again.
///
/// `run` must block until the shutdown receiver flips to true, then
/// return after draining in-flight work. It is invoked once per
/// (re)start, each time with a fresh channel.
#[async_trait]
pub trait Restartable: Send + Sync {
    /// The component name used in logs.
    fn name(&self) -> &str;

    /// Runs the component until shutdown.
    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), RuntimeError>;
}

/// A supervision event, normally derived from an OS signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGHUP: restart the component.
    Restart,
    /// SIGINT/SIGTERM: stop gracefully.
    Terminate,
}

/// The supervisor's final verdict, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorVerdict {
    /// Clean stop; exit 0.
    GracefulShutdown,
    /// Too many restarts; exit 1.
    RestartLimitExceeded,
}

/// Runs a [`Restartable`] component under the restart policy.
pub struct Supervisor {
    component: Arc<dyn Restartable>,
    restart_limit: u32,
    backoff_base: Duration,
}

impl Supervisor {
    /// Creates a supervisor with the default restart policy.
    #[must_use]
    pub fn new(component: Arc<dyn Restartable>) -> Self {
        Self {
            component,
            restart_limit: DEFAULT_RESTART_LIMIT,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Overrides the linear backoff base.
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, restart_count: u32) -> Duration {
        self.backoff_base * restart_count
    }

    /// Runs the component until a terminate signal arrives or the restart
    /// limit is exceeded.
    pub async fn run(&self, mut signals: mpsc::Receiver<Signal>) -> SupervisorVerdict {
        let name = self.component.name().to_string();
        let mut restart_count: u32 = 0;

        loop {
            let (stop, shutdown) = watch::channel(false);
            let component = Arc::clone(&self.component);
            let mut task = tokio::spawn(async move { component.run(shutdown).await });

            let restarting = tokio::select! {
                finished = &mut task => {
                    // The component ended without being asked to; treat it
                    // like a restart request so a dead consumer loop comes
                    // back up.
                    match finished {
                        Ok(Ok(())) => warn!(component = %name, "component exited unexpectedly"),
                        Ok(Err(e)) => error!(component = %name, error = %e, "component failed"),
                        Err(e) => error!(component = %name, error = %e, "component task panicked"),
                    }
                    true
                }
                signal = signals.recv() => {
                    match signal {
                        Some(Signal::Restart) => {
                            info!(component = %name, "restart requested");
                            // Stopping twice is harmless; the channel just
                            // stays flipped.
                            let _ = stop.send(true);
                            match task.await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => warn!(component = %name, error = %e, "component stopped with error"),
                                Err(e) => error!(component = %name, error = %e, "component task panicked"),
                            }
                            true
                        }
                        Some(Signal::Terminate) | None => {
                            info!(component = %name, "terminating");
                            let _ = stop.send(true);
                            match task.await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => warn!(component = %name, error = %e, "component stopped with error"),
                                Err(e) => error!(component = %name, error = %e, "component task panicked"),
                            }
                            return SupervisorVerdict::GracefulShutdown;
                        }
                    }
                }
            };

            if restarting {
                restart_count += 1;
                if restart_count > self.restart_limit {
                    error!(
                        component = %name,
                        restart_count,
                        "restart limit exceeded"
                    );
                    return SupervisorVerdict::RestartLimitExceeded;
                }

                let backoff = self.backoff(restart_count);
                info!(
                    component = %name,
                    restart_count,
                    backoff_ms = backoff.as_millis() as u64,
                    "restarting after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Bridges OS signals into supervision events.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub fn os_signals() -> std::io::Result<mpsc::Receiver<Signal>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hangup.recv() => Signal::Restart,
                _ = interrupt.recv() => Signal::Terminate,
                _ = terminate.recv() => Signal::Terminate,
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Counts starts and completed stops; runs until shutdown.
    struct CountingComponent {
        starts: AtomicU32,
        clean_stops: AtomicU32,
    }

    impl CountingComponent {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicU32::new(0),
                clean_stops: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Restartable for CountingComponent {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RuntimeError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            self.clean_stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_supervisor(component: Arc<dyn Restartable>) -> Supervisor {
        Supervisor::new(component).with_backoff_base(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn terminate_stops_gracefully() {
        let component = CountingComponent::new();
        let supervisor = fast_supervisor(component.clone());
        let (tx, rx) = mpsc::channel(4);

        let run = tokio::spawn(async move { supervisor.run(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(Signal::Terminate).await.unwrap();

        assert_eq!(run.await.unwrap(), SupervisorVerdict::GracefulShutdown);
        assert_eq!(component.starts.load(Ordering::SeqCst), 1);
        assert_eq!(component.clean_stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restart_runs_component_again() {
        let component = CountingComponent::new();
        let supervisor = fast_supervisor(component.clone());
        let (tx, rx) = mpsc::channel(4);

        let run = tokio::spawn(async move { supervisor.run(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        tx.send(Signal::Restart).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(Signal::Terminate).await.unwrap();

        assert_eq!(run.await.unwrap(), SupervisorVerdict::GracefulShutdown);
        assert_eq!(component.starts.load(Ordering::SeqCst), 2);
        // Each stop drained before the next start.
        assert_eq!(component.clean_stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restart_limit_exceeded_after_six_restarts() {
        let component = CountingComponent::new();
        let supervisor = fast_supervisor(component.clone());
        let (tx, rx) = mpsc::channel(16);

        let run = tokio::spawn(async move { supervisor.run(rx).await });
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            tx.send(Signal::Restart).await.unwrap();
        }

        assert_eq!(run.await.unwrap(), SupervisorVerdict::RestartLimitExceeded);
        // The sixth restart request exceeds the limit of five, so the
        // component is started for the five allowed restarts plus the
        // initial run, and not again.
        assert_eq!(component.starts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn self_exiting_component_is_restarted() {
        /// Exits immediately the first time, then behaves.
        struct FlakyComponent {
            starts: AtomicU32,
        }

        #[async_trait]
        impl Restartable for FlakyComponent {
            fn name(&self) -> &str {
                "flaky"
            }

            async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RuntimeError> {
                if self.starts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(RuntimeError::Config {
                        message: "first run dies".to_string(),
                    });
                }
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                Ok(())
            }
        }

        let component = Arc::new(FlakyComponent {
            starts: AtomicU32::new(0),
        });
        let supervisor = fast_supervisor(component.clone());
        let (tx, rx) = mpsc::channel(4);

        let run = tokio::spawn(async move { supervisor.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(Signal::Terminate).await.unwrap();

        assert_eq!(run.await.unwrap(), SupervisorVerdict::GracefulShutdown);
        assert_eq!(component.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_is_linear_in_restart_count() {
        let supervisor = Supervisor::new(CountingComponent::new());
        assert_eq!(supervisor.backoff(1), Duration::from_secs(1));
        assert_eq!(supervisor.backoff(3), Duration::from_secs(3));
        assert_eq!(supervisor.backoff(5), Duration::from_secs(5));
    }
}
