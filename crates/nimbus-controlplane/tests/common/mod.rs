use async_trait::async_trait;
use nimbus_cloud::{
    AuthStatus, CloudAdapter, CreateSpec, MemoryAdapter, PollConfig, RemoteSnapshot, ResourceKind,
};
use nimbus_controlplane::{
    AdapterRegistry, ChannelNotifier, ControlPlane, ControlPlaneBuilder, ControlPlaneError,
    MemoryQuotaLedger, Notification, QuotaLedger, ResourceRecord, Result, ScheduleInput,
    ScheduleResult, SchedulerClient, Task,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;

pub const MANAGER: &str = "memory-1";
pub const OWNER: &str = "project-a";

/// Placement service answering from a script
#[derive(Default)]
pub struct StubScheduler {
    answer: Mutex<Option<Vec<ScheduleResult>>>,
    requests: Mutex<Vec<(ScheduleInput, usize)>>,
}

impl StubScheduler {
    pub fn answer(&self, results: Vec<ScheduleResult>) {
        *self.answer.lock().unwrap() = Some(results);
    }

    #[allow(dead_code)]
    pub fn requests(&self) -> Vec<(ScheduleInput, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchedulerClient for StubScheduler {
    async fn do_schedule(&self, input: &ScheduleInput, count: usize) -> Result<Vec<ScheduleResult>> {
        self.requests.lock().unwrap().push((input.clone(), count));
        self.answer
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ControlPlaneError::Schedule("placement service offline".into()))
    }
}

/// Quota ledger that remembers every cancellation
pub struct RecordingLedger {
    inner: MemoryQuotaLedger,
    cancels: Mutex<Vec<u64>>,
}

impl RecordingLedger {
    pub fn new(limit: u64) -> Self {
        Self {
            inner: MemoryQuotaLedger::new().with_limit(OWNER, ResourceKind::Disk, limit),
            cancels: Mutex::new(Vec::new()),
        }
    }

    pub fn pending(&self) -> u64 {
        self.inner.pending(OWNER, ResourceKind::Disk)
    }

    pub fn cancels(&self) -> Vec<u64> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuotaLedger for RecordingLedger {
    async fn reserve_pending(&self, owner: &str, kind: ResourceKind, amount: u64) -> Result<()> {
        self.inner.reserve_pending(owner, kind, amount).await
    }

    async fn cancel_pending(&self, owner: &str, kind: ResourceKind, amount: u64) -> Result<()> {
        self.cancels.lock().unwrap().push(amount);
        self.inner.cancel_pending(owner, kind, amount).await
    }
}

/// Memory provider whose creates and deletes stop halfway until released
pub struct GatedAdapter {
    inner: Arc<MemoryAdapter>,
    entered: Notify,
    released: Notify,
}

#[allow(dead_code)]
impl GatedAdapter {
    pub fn new(inner: Arc<MemoryAdapter>) -> Self {
        Self {
            inner,
            entered: Notify::new(),
            released: Notify::new(),
        }
    }

    /// Wait until a create or delete is parked inside the provider
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one parked call finish
    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn gate(&self) {
        self.entered.notify_one();
        self.released.notified().await;
    }
}

#[async_trait]
impl CloudAdapter for GatedAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn display_name(&self) -> &str {
        self.inner.display_name()
    }

    fn capabilities(&self) -> &[ResourceKind] {
        self.inner.capabilities()
    }

    async fn check_auth(&self) -> nimbus_cloud::Result<AuthStatus> {
        self.inner.check_auth().await
    }

    async fn list(&self, kind: ResourceKind) -> nimbus_cloud::Result<Vec<RemoteSnapshot>> {
        self.inner.list(kind).await
    }

    async fn get(&self, kind: ResourceKind, global_id: &str) -> nimbus_cloud::Result<RemoteSnapshot> {
        self.inner.get(kind, global_id).await
    }

    async fn create(
        &self,
        kind: ResourceKind,
        spec: &CreateSpec,
    ) -> nimbus_cloud::Result<RemoteSnapshot> {
        self.gate().await;
        self.inner.create(kind, spec).await
    }

    async fn delete(&self, kind: ResourceKind, global_id: &str) -> nimbus_cloud::Result<()> {
        self.gate().await;
        self.inner.delete(kind, global_id).await
    }
}

pub fn fast_poll() -> PollConfig {
    PollConfig {
        interval_ms: 10,
        max_interval_ms: 50,
        multiplier: 2.0,
        deadline_secs: 5,
    }
}

pub struct Harness {
    pub plane: ControlPlane,
    pub cloud: Arc<MemoryAdapter>,
    pub ledger: Arc<RecordingLedger>,
    pub scheduler: Arc<StubScheduler>,
    pub notifications: UnboundedReceiver<Notification>,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new() -> Self {
        Self::build(|b| b).await
    }

    pub async fn build(configure: impl FnOnce(ControlPlaneBuilder) -> ControlPlaneBuilder) -> Self {
        Self::build_with_ledger(Arc::new(RecordingLedger::new(1000)), configure).await
    }

    pub async fn build_with_ledger(
        ledger: Arc<RecordingLedger>,
        configure: impl FnOnce(ControlPlaneBuilder) -> ControlPlaneBuilder,
    ) -> Self {
        let cloud = Arc::new(MemoryAdapter::new());
        Self::assemble(ledger, cloud.clone(), cloud, configure).await
    }

    /// Harness whose provider parks every create and delete until released
    pub async fn gated() -> (Self, Arc<GatedAdapter>) {
        let cloud = Arc::new(MemoryAdapter::new());
        let gate = Arc::new(GatedAdapter::new(cloud.clone()));
        let ledger = Arc::new(RecordingLedger::new(1000));
        let h = Self::assemble(ledger, cloud, gate.clone(), |b| b).await;
        (h, gate)
    }

    async fn assemble(
        ledger: Arc<RecordingLedger>,
        cloud: Arc<MemoryAdapter>,
        adapter: Arc<dyn CloudAdapter>,
        configure: impl FnOnce(ControlPlaneBuilder) -> ControlPlaneBuilder,
    ) -> Self {
        let scheduler = Arc::new(StubScheduler::default());
        let (notifier, notifications) = ChannelNotifier::new();

        let builder = ControlPlane::builder()
            .adapters(AdapterRegistry::new().with(MANAGER, adapter))
            .notifier(Arc::new(notifier))
            .quota(ledger.clone())
            .scheduler(scheduler.clone())
            .lock_timeout(Duration::from_secs(5))
            .poll(fast_poll());
        let plane = configure(builder).build().await.unwrap();

        Self {
            plane,
            cloud,
            ledger,
            scheduler,
            notifications,
        }
    }

    pub fn start(&self) {
        self.plane.tasks().start(2).unwrap();
    }

    /// Record already known to the provider and to the inventory
    pub fn seed_remote(&self, record: ResourceRecord, global_id: &str) -> ResourceRecord {
        let mut snapshot = RemoteSnapshot::new(record.kind, global_id, &record.name);
        snapshot.attributes = record.metadata.clone();
        self.cloud.insert(snapshot);
        self.plane
            .inventory()
            .insert(record.with_external_id(global_id))
            .unwrap()
    }

    pub fn record(&self, kind: ResourceKind, name: &str) -> ResourceRecord {
        ResourceRecord::new(kind, name, OWNER, MANAGER)
    }

    pub async fn wait(&self, task_id: &str) -> Task {
        self.plane
            .tasks()
            .wait_for_terminal(task_id, Duration::from_secs(30))
            .await
            .unwrap()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}
