use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use action_flow::{
    references_credentials, validate_flow, Flow, FlowInterpreter, FlowOutcome, FlowSource,
    ResolutionScope, StepObserver, StepStamp,
};
use action_primitives::{DriverFactory, DriverSession};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use leadflow_core_types::{
    Credentials, ExecutionAttempt, ExecutionItem, ExecutionRun, FlowKey, ItemId, ItemStatus,
    RunId, StepLogEntry,
};
use leadflow_run_store::ExecutionStore;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::aggregate::RunAggregator;
use crate::credentials::CredentialProvider;
use crate::error::SchedulerError;
use crate::events::{ProgressEvent, RunSummary};
use crate::item::{FailDecision, ItemStateMachine, ItemTransitionError};
use crate::metrics::{SchedulerMetrics, SchedulerMetricsSnapshot};
use crate::model::{RunItem, RunRequest, SchedulerConfig, StopPolicy};
use crate::runtime::ClaimQueue;

/// Runs batches of leads through their flows on a bounded worker pool.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn ExecutionStore>,
    drivers: Arc<dyn DriverFactory>,
    flows: Arc<dyn FlowSource>,
    credentials: Arc<dyn CredentialProvider>,
    runs: Arc<DashMap<RunId, CancellationToken>>,
    metrics: Arc<SchedulerMetrics>,
}

/// A started run.
///
/// The event channel closes after the run-level `Done`/`Stopped` event.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: RunId,
    pub events: UnboundedReceiver<ProgressEvent>,
    pub completion: RunCompletion,
}

#[derive(Debug)]
pub struct RunCompletion(JoinHandle<Result<RunSummary, SchedulerError>>);

impl RunCompletion {
    pub async fn wait(self) -> Result<RunSummary, SchedulerError> {
        self.0
            .await
            .map_err(|err| SchedulerError::Internal(err.to_string()))?
    }
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn ExecutionStore>,
        drivers: Arc<dyn DriverFactory>,
        flows: Arc<dyn FlowSource>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            config,
            store,
            drivers,
            flows,
            credentials,
            runs: Arc::new(DashMap::new()),
            metrics: Arc::new(SchedulerMetrics::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Runs that have not finished yet.
    pub fn active_runs(&self) -> Vec<RunId> {
        self.runs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Validate the request, persist the run and its items, and start the
    /// workers. Nothing is scheduled when validation fails.
    pub async fn run_all(&self, request: RunRequest) -> Result<RunHandle, SchedulerError> {
        let concurrency = request.concurrency.unwrap_or(self.config.concurrency);
        if concurrency == 0 {
            return Err(SchedulerError::ZeroConcurrency);
        }
        if self.config.retry.max_attempts == 0 {
            return Err(SchedulerError::ZeroAttempts);
        }

        let flows = self.load_flows(&request.items)?;
        self.check_platforms(&flows)?;
        let credentials = self.collect_credentials(&flows).await?;

        let run_id = RunId::new();
        let run = ExecutionRun::start(
            run_id.clone(),
            concurrency,
            request.items.len() as u32,
            self.config.settings_json(concurrency),
        );
        self.store.create_run(run.clone()).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let queue = ClaimQueue::new();
        let mut slots = Vec::with_capacity(request.items.len());
        for (slot, item) in request.items.into_iter().enumerate() {
            let total_steps = flows.get(&item.flow).map_or(0, |flow| flow.steps.len());
            let mut record = ExecutionItem::pending(
                run_id.clone(),
                item.lead_id.clone(),
                item.flow.clone(),
                total_steps,
            );
            let artifact_dir = self.artifact_dir(&run_id, &record.id);
            record.artifact_dir = artifact_dir
                .as_ref()
                .map(|dir| dir.to_string_lossy().into_owned());
            self.store.create_item(record.clone()).await?;
            self.metrics.record_enqueued();
            let _ = events_tx.send(ProgressEvent::Queued {
                item_id: record.id.clone(),
                lead_id: item.lead_id.clone(),
                flow: item.flow.clone(),
            });
            queue.push(item.flow.platform.clone(), slot);
            slots.push(ItemSlot {
                input: item,
                artifact_dir,
                machine: Mutex::new(Some(ItemStateMachine::new(
                    record,
                    self.config.retry.max_attempts,
                ))),
            });
        }

        let cancel = CancellationToken::new();
        self.runs.insert(run_id.clone(), cancel.clone());

        let ctx = Arc::new(RunContext {
            run_id: run_id.clone(),
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            drivers: Arc::clone(&self.drivers),
            flows,
            credentials,
            interpreter: FlowInterpreter::new(self.config.interpreter),
            slots,
            queue,
            aggregator: RunAggregator::new(run, Arc::clone(&self.store)),
            events: events_tx,
            cancel,
            metrics: Arc::clone(&self.metrics),
        });

        info!(
            run_id = %run_id,
            items = ctx.slots.len(),
            concurrency,
            "Run scheduled"
        );

        let runs = Arc::clone(&self.runs);
        let span = tracing::info_span!("run", run_id = %run_id);
        let task = tokio::spawn(
            async move {
                let result = supervise(Arc::clone(&ctx), concurrency).await;
                runs.remove(&ctx.run_id);
                result
            }
            .instrument(span),
        );

        Ok(RunHandle {
            run_id,
            events: events_rx,
            completion: RunCompletion(task),
        })
    }

    /// Request cooperative cancellation. Returns `false` for unknown or
    /// already finished runs.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        match self.runs.get(run_id) {
            Some(token) => {
                info!(run_id = %run_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn load_flows(&self, items: &[RunItem]) -> Result<HashMap<FlowKey, Arc<Flow>>, SchedulerError> {
        let mut flows = HashMap::new();
        for item in items {
            if flows.contains_key(&item.flow) {
                continue;
            }
            let flow = self.flows.load(&item.flow)?;
            validate_flow(&flow)?;
            flows.insert(item.flow.clone(), flow);
        }
        Ok(flows)
    }

    fn check_platforms(&self, flows: &HashMap<FlowKey, Arc<Flow>>) -> Result<(), SchedulerError> {
        if !self.config.one_flow_per_platform {
            return Ok(());
        }
        let mut by_platform: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for key in flows.keys() {
            by_platform
                .entry(key.platform.as_str())
                .or_default()
                .push(key.to_string());
        }
        for (platform, mut keys) in by_platform {
            if keys.len() > 1 {
                keys.sort();
                return Err(SchedulerError::DuplicatePlatform {
                    platform: platform.to_string(),
                    flows: keys.join(", "),
                });
            }
        }
        Ok(())
    }

    async fn collect_credentials(
        &self,
        flows: &HashMap<FlowKey, Arc<Flow>>,
    ) -> Result<HashMap<String, Credentials>, SchedulerError> {
        let mut credentials = HashMap::new();
        for (key, flow) in flows {
            if credentials.contains_key(&key.platform) || !references_credentials(flow) {
                continue;
            }
            let found = self
                .credentials
                .credentials(&key.platform)
                .await
                .map_err(|source| SchedulerError::MissingCredentials {
                    flow: key.to_string(),
                    source,
                })?;
            credentials.insert(key.platform.clone(), found);
        }
        Ok(credentials)
    }

    fn artifact_dir(&self, run_id: &RunId, item_id: &ItemId) -> Option<PathBuf> {
        self.config
            .artifacts_dir
            .as_ref()
            .map(|root| root.join(&run_id.0).join(&item_id.0))
    }
}

struct ItemSlot {
    input: RunItem,
    artifact_dir: Option<PathBuf>,
    /// Taken by whoever claims or drains the slot
    machine: Mutex<Option<ItemStateMachine>>,
}

struct RunContext {
    run_id: RunId,
    config: SchedulerConfig,
    store: Arc<dyn ExecutionStore>,
    drivers: Arc<dyn DriverFactory>,
    flows: HashMap<FlowKey, Arc<Flow>>,
    credentials: HashMap<String, Credentials>,
    interpreter: FlowInterpreter,
    slots: Vec<ItemSlot>,
    queue: ClaimQueue,
    aggregator: RunAggregator,
    events: UnboundedSender<ProgressEvent>,
    cancel: CancellationToken,
    metrics: Arc<SchedulerMetrics>,
}

impl RunContext {
    fn emit(&self, event: ProgressEvent) {
        // a dropped receiver only means nobody is listening
        let _ = self.events.send(event);
    }

    fn take_machine(&self, slot: usize) -> Option<ItemStateMachine> {
        self.slots.get(slot).and_then(|s| s.machine.lock().take())
    }

    async fn save_item(&self, item: &ExecutionItem) {
        if let Err(err) = self.store.update_item(item.clone()).await {
            warn!(item_id = %item.id, error = %err, "Failed to persist item");
        }
    }

    async fn save_attempt(&self, attempt: ExecutionAttempt, created: bool) {
        let result = if created {
            self.store.create_attempt(attempt).await
        } else {
            self.store.update_attempt(attempt).await
        };
        if let Err(err) = result {
            warn!(error = %err, "Failed to persist attempt");
        }
    }

    async fn item_terminal(&self, status: ItemStatus) {
        if let Err(err) = self.aggregator.on_item_terminal(status).await {
            warn!(error = %err, "Failed to persist run counters");
        }
    }

    /// Cancel every slot nobody has claimed.
    async fn cancel_pending(&self) {
        for slot in self.queue.drain() {
            let Some(mut machine) = self.take_machine(slot) else {
                continue;
            };
            if machine.cancel().is_err() {
                continue;
            }
            let item_id = machine.item().id.clone();
            debug!(item_id = %item_id, "Pending item cancelled");
            self.save_item(machine.item()).await;
            self.metrics.record_cancelled();
            self.emit(ProgressEvent::Cancelled { item_id });
            self.item_terminal(ItemStatus::Cancelled).await;
        }
    }
}

async fn supervise(ctx: Arc<RunContext>, concurrency: usize) -> Result<RunSummary, SchedulerError> {
    let workers = concurrency.min(ctx.slots.len().max(1));
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(
                async move { worker_loop(ctx).await }
                    .instrument(tracing::debug_span!("worker", worker)),
            )
        })
        .collect();

    let all_done = join_all(handles);
    tokio::pin!(all_done);
    let results = tokio::select! {
        results = &mut all_done => results,
        _ = ctx.cancel.cancelled() => {
            ctx.cancel_pending().await;
            all_done.await
        }
    };
    for result in results {
        if let Err(err) = result {
            warn!(error = %err, "Worker task ended abnormally");
        }
    }
    // cancellation may have landed after the last worker exited
    ctx.cancel_pending().await;

    let stopped = ctx.cancel.is_cancelled();
    let run = ctx.aggregator.finalize(stopped).await?;
    let summary = RunSummary::from(&run);
    if stopped {
        ctx.emit(ProgressEvent::Stopped {
            summary: summary.clone(),
        });
    } else {
        ctx.emit(ProgressEvent::Done {
            summary: summary.clone(),
        });
    }
    Ok(summary)
}

async fn worker_loop(ctx: Arc<RunContext>) {
    while !ctx.cancel.is_cancelled() {
        let Some(slot) = ctx.queue.claim() else {
            break;
        };
        let Some(machine) = ctx.take_machine(slot) else {
            continue;
        };
        execute_item(&ctx, slot, machine).await;
    }
}

async fn execute_item(ctx: &RunContext, slot: usize, machine: ItemStateMachine) {
    let Some(item_slot) = ctx.slots.get(slot) else {
        return;
    };
    let input = &item_slot.input;
    let item_id = machine.item().id.clone();
    let Some(flow) = ctx.flows.get(&input.flow).cloned() else {
        warn!(item_id = %item_id, flow = %input.flow, "Flow vanished after validation");
        return;
    };
    let credentials = ctx.credentials.get(&input.flow.platform);
    let mut scope = ResolutionScope::new(&input.lead);
    if let Some(credentials) = credentials {
        scope = scope.with_credentials(credentials);
    }
    let interrupt = (ctx.config.stop_policy == StopPolicy::Interrupt).then_some(&ctx.cancel);

    if let Some(dir) = &item_slot.artifact_dir {
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            warn!(item_id = %item_id, error = %err, "Could not create artifact directory");
        }
    }

    let machine = Mutex::new(machine);
    loop {
        let claimed = machine.lock().claim();
        let attempt = match claimed {
            Ok(attempt) => attempt,
            Err(err) => {
                warn!(error = %err, "Claim rejected");
                return;
            }
        };
        let attempt_no = attempt.attempt;
        let snapshot = machine.lock().item().clone();
        ctx.save_attempt(attempt, true).await;
        ctx.save_item(&snapshot).await;
        ctx.metrics.record_started();
        ctx.emit(ProgressEvent::Started {
            item_id: item_id.clone(),
            attempt: attempt_no,
        });
        info!(
            item_id = %item_id,
            lead_id = %input.lead_id,
            flow = %input.flow,
            attempt = attempt_no,
            "Item started"
        );

        let session = DriverSession {
            run_id: ctx.run_id.clone(),
            item_id: item_id.clone(),
            attempt: attempt_no,
            platform: input.flow.platform.clone(),
            artifact_dir: item_slot.artifact_dir.clone(),
            trace: flow.trace,
        };
        let outcome = match ctx.drivers.create(&session).await {
            Ok(driver) => {
                let observer = ItemObserver {
                    ctx,
                    item_id: &item_id,
                    machine: &machine,
                };
                let stamp = StepStamp {
                    run_id: Some(ctx.run_id.clone()),
                    item_id: Some(item_id.clone()),
                    attempt: attempt_no,
                };
                let run = ctx
                    .interpreter
                    .run(&flow, &scope, driver.as_ref(), &observer, &stamp, interrupt)
                    .await;
                if let Err(err) = driver.close(!run.outcome.is_success()).await {
                    warn!(item_id = %item_id, error = %err, "Driver close failed");
                }
                run.outcome
            }
            Err(err) => FlowOutcome::Failed {
                step_index: 0,
                message: format!("driver setup failed: {err}"),
                artifact: None,
            },
        };

        match outcome {
            FlowOutcome::Completed => {
                let closed = machine.lock().succeed();
                finish(ctx, &machine, closed).await;
                ctx.metrics.record_succeeded();
                info!(item_id = %item_id, attempt = attempt_no, "Item succeeded");
                ctx.emit(ProgressEvent::Succeeded {
                    item_id: item_id.clone(),
                });
                ctx.item_terminal(ItemStatus::Success).await;
                return;
            }
            FlowOutcome::Cancelled { next_step } => {
                let closed = machine.lock().cancel();
                let closed = match closed {
                    Ok(Some(attempt)) => Ok(attempt),
                    Ok(None) => return,
                    Err(err) => Err(err),
                };
                finish(ctx, &machine, closed).await;
                ctx.metrics.record_cancelled();
                info!(item_id = %item_id, next_step, "Item cancelled mid-flow");
                ctx.emit(ProgressEvent::Cancelled {
                    item_id: item_id.clone(),
                });
                ctx.item_terminal(ItemStatus::Cancelled).await;
                return;
            }
            FlowOutcome::Failed { message, .. } => {
                let retry_allowed = !ctx.cancel.is_cancelled();
                let failed = machine.lock().fail(message.clone(), retry_allowed);
                let decision = match failed {
                    Ok((decision, attempt)) => {
                        finish(ctx, &machine, Ok(attempt)).await;
                        decision
                    }
                    Err(err) => {
                        warn!(error = %err, "Failure transition rejected");
                        return;
                    }
                };

                if let FailDecision::Retry { next_attempt } = decision {
                    let delay = ctx.config.retry.delay_after(attempt_no);
                    warn!(
                        item_id = %item_id,
                        attempt = attempt_no,
                        error = %message,
                        "Attempt failed, retrying"
                    );
                    let cancelled = tokio::select! {
                        _ = tokio::time::sleep(delay) => ctx.cancel.is_cancelled(),
                        _ = ctx.cancel.cancelled() => true,
                    };
                    if !cancelled {
                        ctx.metrics.record_retried();
                        ctx.emit(ProgressEvent::Retrying {
                            item_id: item_id.clone(),
                            attempt: next_attempt,
                            error: message.clone(),
                        });
                        continue;
                    }
                    let gave_up = machine.lock().give_up();
                    if let Err(err) = gave_up {
                        warn!(error = %err, "Could not withdraw retry");
                    }
                    let snapshot = machine.lock().item().clone();
                    ctx.save_item(&snapshot).await;
                }

                ctx.metrics.record_failed();
                warn!(item_id = %item_id, attempt = attempt_no, error = %message, "Item failed");
                ctx.emit(ProgressEvent::Failed {
                    item_id: item_id.clone(),
                    error: message,
                });
                ctx.item_terminal(ItemStatus::Error).await;
                return;
            }
        }
    }
}

/// Persist a closed attempt and the item state after a transition.
async fn finish(
    ctx: &RunContext,
    machine: &Mutex<ItemStateMachine>,
    closed: Result<ExecutionAttempt, ItemTransitionError>,
) {
    match closed {
        Ok(attempt) => ctx.save_attempt(attempt, false).await,
        Err(err) => warn!(error = %err, "Transition rejected"),
    }
    let snapshot = machine.lock().item().clone();
    ctx.save_item(&snapshot).await;
}

/// Persists step logs and publishes progress while a flow runs.
struct ItemObserver<'a> {
    ctx: &'a RunContext,
    item_id: &'a ItemId,
    machine: &'a Mutex<ItemStateMachine>,
}

#[async_trait]
impl StepObserver for ItemObserver<'_> {
    async fn step_started(&self, index: usize, total: usize) {
        self.ctx.emit(ProgressEvent::Progress {
            item_id: self.item_id.clone(),
            step: index + 1,
            total,
        });
    }

    async fn step_finished(&self, entry: &StepLogEntry) {
        if let Err(err) = self.ctx.store.append_step(entry.clone()).await {
            warn!(item_id = %self.item_id, error = %err, "Failed to persist step log");
        }
        let snapshot = {
            let mut machine = self.machine.lock();
            machine.advance(entry.step_index + 1);
            machine.item().clone()
        };
        self.ctx.save_item(&snapshot).await;
    }
}
