//! Owns the store, the poll loop and the subscription manager for one view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::config::{validate_config, SyncConfig};
use crate::error::{ConfigError, SyncError};
use crate::model::{JobRecord, UploadFile};
use crate::store::{JobStore, StoreChange};
use crate::sync::poll::{ListHealth, PollLoop};
use crate::sync::reconciler::Reconciler;
use crate::sync::subscriptions::{ExitReason, SubscriptionExit, SubscriptionManager};
use crate::transport::{EventSubscriber, JobSubmitter, SnapshotFetcher};

fn lock_manager(manager: &Mutex<SubscriptionManager>) -> MutexGuard<'_, SubscriptionManager> {
    match manager.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Subscription manager lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Builds a [`SyncEngine`] from a config and its transports.
pub struct SyncEngineBuilder {
    config: SyncConfig,
    fetcher: Option<Arc<dyn SnapshotFetcher>>,
    subscriber: Option<Arc<dyn EventSubscriber>>,
    submitter: Option<Arc<dyn JobSubmitter>>,
}

impl SyncEngineBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            fetcher: None,
            subscriber: None,
            submitter: None,
        }
    }

    /// Uses one transport for the list, the event streams and submissions.
    pub fn transport<T>(self, transport: Arc<T>) -> Self
    where
        T: SnapshotFetcher + EventSubscriber + JobSubmitter + 'static,
    {
        self.fetcher(transport.clone())
            .subscriber(transport.clone())
            .submitter(transport)
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    pub fn submitter(mut self, submitter: Arc<dyn JobSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Validates the config and starts the background tasks.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(self) -> Result<SyncEngine, SyncError> {
        validate_config(&self.config)?;
        let fetcher = self.fetcher.ok_or_else(|| missing("snapshot fetcher"))?;
        let subscriber = self.subscriber.ok_or_else(|| missing("event subscriber"))?;
        Ok(SyncEngine::launch(self.config, fetcher, subscriber, self.submitter))
    }
}

fn missing(what: &str) -> SyncError {
    SyncError::Config(ConfigError::Validation {
        message: format!("no {} configured", what),
    })
}

/// Keeps a local job list converged with the server.
///
/// Dropping the engine tears it down.
pub struct SyncEngine {
    store: Arc<JobStore>,
    reconciler: Arc<Reconciler>,
    manager: Arc<Mutex<SubscriptionManager>>,
    submitter: Option<Arc<dyn JobSubmitter>>,
    health: watch::Receiver<ListHealth>,
    refresh: Arc<Notify>,
    poll_shutdown: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: watch::Sender<bool>,
    shut_down: AtomicBool,
}

impl SyncEngine {
    pub fn builder(config: SyncConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    fn launch(
        config: SyncConfig,
        fetcher: Arc<dyn SnapshotFetcher>,
        subscriber: Arc<dyn EventSubscriber>,
        submitter: Option<Arc<dyn JobSubmitter>>,
    ) -> Self {
        let store = Arc::new(JobStore::new(config.change_channel_capacity));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&store)));

        let (manager, exits) = SubscriptionManager::new(subscriber, Arc::clone(&reconciler));
        let manager = Arc::new(Mutex::new(manager));

        let resync = Arc::new(Notify::new());
        let poll = PollLoop::new(
            fetcher,
            Arc::clone(&reconciler),
            config.poll_interval(),
            config.failure_threshold,
        )
        .with_cycle_notify(Arc::clone(&resync));
        let health = poll.health();
        let refresh = poll.trigger();
        let poll_shutdown = poll.shutdown_flag();

        // Subscribe before the poll task can publish anything
        let changes = store.subscribe();
        let manager_task = tokio::spawn(run_manager(
            Arc::clone(&manager),
            Arc::clone(&store),
            changes,
            exits,
            resync,
        ));
        let poll_task = poll.spawn();

        info!(
            "Sync engine started (poll every {}s against {})",
            config.poll_interval_secs, config.api_url
        );

        let (stopped, _) = watch::channel(false);
        Self {
            store,
            reconciler,
            manager,
            submitter,
            health,
            refresh,
            poll_shutdown,
            tasks: Mutex::new(vec![poll_task, manager_task]),
            stopped,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// All known jobs, newest first.
    pub fn jobs(&self) -> Vec<JobRecord> {
        self.store.get_all()
    }

    pub fn job(&self, job_id: &str) -> Option<JobRecord> {
        self.store.get(job_id)
    }

    /// Change notifications for the list view.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    /// Latest list health.
    pub fn health(&self) -> ListHealth {
        self.health.borrow().clone()
    }

    pub fn health_receiver(&self) -> watch::Receiver<ListHealth> {
        self.health.clone()
    }

    /// Ids of jobs that currently hold a live event stream, sorted.
    pub fn active_subscriptions(&self) -> Vec<String> {
        lock_manager(&self.manager).active_ids()
    }

    /// Requests a list fetch now instead of waiting for the next tick.
    pub fn refresh(&self) {
        if !self.is_shut_down() {
            self.refresh.notify_one();
        }
    }

    /// Submits files as a new job and starts tracking it as `queued`.
    pub async fn submit(&self, files: Vec<UploadFile>) -> Result<JobRecord, SyncError> {
        if self.is_shut_down() {
            return Err(SyncError::ShutDown);
        }
        let submitter = self.submitter.as_ref().ok_or_else(|| missing("job submitter"))?;

        let record = submitter.submit(files).await?;
        if self.is_shut_down() {
            return Err(SyncError::ShutDown);
        }
        self.reconciler.insert_submitted(record.clone());
        Ok(self.store.get(&record.id).unwrap_or(record))
    }

    /// Waits until the job reaches `completed` or `failed`.
    pub async fn wait_for_terminal(&self, job_id: &str) -> Result<JobRecord, SyncError> {
        let mut changes = self.store.subscribe();
        let mut stopped = self.stopped.subscribe();

        loop {
            if *stopped.borrow() {
                return Err(SyncError::ShutDown);
            }
            if let Some(record) = self.store.get(job_id).filter(JobRecord::is_finished) {
                return Ok(record);
            }

            tokio::select! {
                change = changes.recv() => {
                    if let Err(broadcast::error::RecvError::Closed) = change {
                        return Err(SyncError::ShutDown);
                    }
                }
                _ = stopped.changed() => {}
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stops polling, closes every event stream and freezes the store.
    ///
    /// Synchronous: nothing touches the store once this returns.
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.store.seal();
        self.poll_shutdown.store(true, Ordering::Release);

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for task in tasks {
            task.abort();
        }

        let closed = lock_manager(&self.manager).close_all();
        self.stopped.send_replace(true);
        info!("Sync engine stopped ({} streams closed)", closed);
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Re-runs the subscription pass whenever the store changes, a stream task
/// exits or a poll cycle finishes.
///
/// A stream that failed to open is retried by the next pass some other
/// trigger causes.
async fn run_manager(
    manager: Arc<Mutex<SubscriptionManager>>,
    store: Arc<JobStore>,
    mut changes: broadcast::Receiver<StoreChange>,
    mut exits: mpsc::UnboundedReceiver<SubscriptionExit>,
    resync: Arc<Notify>,
) {
    sync_subscriptions(&manager, &store);

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(_) => drain_changes(&mut changes),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("Missed {} store changes, resyncing subscriptions", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(exit) = exits.recv() => {
                debug!("Stream task for job {} exited: {:?}", exit.job_id, exit.reason);
                lock_manager(&manager).handle_exit(&exit);
                // Refused streams wait for the next change or poll cycle
                if exit.reason == ExitReason::OpenFailed {
                    continue;
                }
            },
            _ = resync.notified() => {},
        }

        sync_subscriptions(&manager, &store);
    }
}

/// Coalesces a burst of changes into one pass.
fn drain_changes(changes: &mut broadcast::Receiver<StoreChange>) {
    use broadcast::error::TryRecvError;
    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

fn sync_subscriptions(manager: &Mutex<SubscriptionManager>, store: &JobStore) {
    let records = store.get_all();
    let delta = lock_manager(manager).reconcile(&records);
    if !delta.is_empty() {
        debug!(
            "Subscriptions: opened {:?}, closed {:?}",
            delta.opened, delta.closed
        );
    }
}
