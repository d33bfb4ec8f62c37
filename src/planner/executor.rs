//! Plan executor for applying plans.
//!
//! Operations run on a bounded worker pool as soon as the operations they
//! depend on have completed. Every successful provider call is committed to
//! the state store before dependents are released. A failed operation skips
//! its dependents only; independent operations keep going.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::address::ResourceAddress;
use crate::config::{Attributes, DEFAULT_PARALLELISM, Reference, Value, Variables};
use crate::error::{ApplyError, InfraError, Result};
use crate::eval::{ResolvedResource, ResourceEnv};
use crate::graph::ResourceNode;
use crate::provider::Provider;
use crate::state::{StateRecord, StateSnapshot, StateStore};

use super::diff::resolve_desired;
use super::plan::{OperationKind, Plan, PlanOperation};

/// Executor for plans.
#[derive(Clone)]
pub struct ApplyExecutor {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    parallelism: usize,
    cancel: CancellationToken,
}

/// Outcome of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// The provider call succeeded and state was committed.
    Success,
    /// The provider call or the commit failed.
    Failed,
    /// Not run because a dependency did not succeed or the run was cancelled.
    Skipped,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Result of executing a single operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    /// Target address.
    pub address: ResourceAddress,
    /// Operation kind.
    pub kind: OperationKind,
    /// Outcome.
    pub status: OperationStatus,
    /// Provider identity after the operation, if the resource exists.
    pub identity: Option<String>,
    /// Error message, for failed or skipped operations.
    pub error: Option<String>,
    /// Wall time spent on the operation.
    pub duration_ms: u64,
}

impl OperationResult {
    fn skipped(op: &PlanOperation, reason: impl Into<String>) -> Self {
        Self {
            address: op.address.clone(),
            kind: op.kind,
            status: OperationStatus::Skipped,
            identity: None,
            error: Some(reason.into()),
            duration_ms: 0,
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every operation succeeded.
    Success,
    /// Some operations failed or were skipped.
    PartialFailure,
    /// The run was cancelled or a precondition failed.
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::PartialFailure => "partial failure",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// A computed output value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputValue {
    /// The value.
    pub value: Value,
    /// Hide the value in human-readable output.
    pub sensitive: bool,
}

/// Result of applying a plan.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Overall status.
    pub status: RunStatus,
    /// Per-operation results, in plan order.
    pub results: Vec<OperationResult>,
    /// Outputs computed from state after the run.
    pub outputs: BTreeMap<String, OutputValue>,
}

impl ApplyReport {
    fn empty(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Success,
            results: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    fn count(&self, status: OperationStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Number of successful operations.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(OperationStatus::Success)
    }

    /// Number of failed operations.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(OperationStatus::Failed)
    }

    /// Number of skipped operations.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(OperationStatus::Skipped)
    }

    /// Returns the result for an address.
    #[must_use]
    pub fn result(&self, address: &ResourceAddress) -> Option<&OperationResult> {
        self.results.iter().find(|r| &r.address == address)
    }

    /// Converts a non-successful run into an error.
    ///
    /// # Errors
    ///
    /// Returns `ApplyError::PartialFailure` or `ApplyError::Aborted`.
    pub fn into_result(self) -> Result<Self> {
        let incomplete: Vec<String> = self
            .results
            .iter()
            .filter(|r| r.status != OperationStatus::Success)
            .map(|r| r.address.to_string())
            .collect();
        match self.status {
            RunStatus::Success => Ok(self),
            RunStatus::PartialFailure => Err(InfraError::Apply(ApplyError::PartialFailure {
                failed: incomplete.len(),
                total: self.results.len(),
                addresses: incomplete,
            })),
            RunStatus::Aborted => Err(InfraError::Apply(ApplyError::Aborted {
                reason: format!("cancelled with {} operations not run", self.skipped()),
            })),
        }
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Apply {}: {} succeeded, {} failed, {} skipped",
            self.status,
            self.succeeded(),
            self.failed(),
            self.skipped()
        )
    }
}

impl std::fmt::Debug for ApplyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyExecutor")
            .field("provider", &self.provider.name())
            .field("store", &self.store.backend_type())
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

/// State shared by the operation tasks of one run.
struct RunShared {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    variables: Variables,
    records: StateSnapshot,
    env: RwLock<ResourceEnv>,
}

impl ApplyExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn StateStore>) -> Self {
        Self {
            provider,
            store,
            parallelism: DEFAULT_PARALLELISM,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the maximum number of operations in flight.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes a plan against `snapshot`, the state it was computed from.
    ///
    /// Operation failures are reported in the returned [`ApplyReport`], not
    /// as errors.
    ///
    /// # Errors
    ///
    /// Returns an error only if the operations reference each other in a
    /// way the plan ordering cannot produce.
    pub async fn execute(&self, plan: &Plan, snapshot: StateSnapshot) -> Result<ApplyReport> {
        let ops: Vec<PlanOperation> = plan.changes().cloned().collect();
        if ops.is_empty() {
            info!("No changes to apply");
            return Ok(ApplyReport::empty(plan.run_id));
        }

        info!(
            "Applying {} operations with parallelism {}",
            ops.len(),
            self.parallelism
        );

        let index: HashMap<ResourceAddress, usize> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| (op.address.clone(), i))
            .collect();

        let mut waiting: Vec<usize> = vec![0; ops.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
        for (i, op) in ops.iter().enumerate() {
            for dependency in &op.dependencies {
                if let Some(&d) = index.get(dependency) {
                    if d == i {
                        continue;
                    }
                    waiting[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let shared = Arc::new(RunShared {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            variables: plan.variables.clone(),
            env: RwLock::new(apply_environment(plan, &snapshot)),
            records: snapshot,
        });
        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        let mut results: Vec<Option<OperationResult>> = vec![None; ops.len()];
        let mut ready: BTreeSet<usize> = (0..ops.len()).filter(|&i| waiting[i] == 0).collect();
        let mut started: BTreeSet<usize> = BTreeSet::new();
        let mut tasks: JoinSet<(usize, OperationResult)> = JoinSet::new();
        let mut cancel_seen = false;

        loop {
            if !self.cancel.is_cancelled() {
                while let Some(i) = ready.pop_first() {
                    started.insert(i);
                    let op = ops[i].clone();
                    let shared = Arc::clone(&shared);
                    let semaphore = Arc::clone(&semaphore);
                    let cancel = self.cancel.clone();
                    let span = info_span!("apply", address = %op.address, kind = %op.kind);
                    tasks.spawn(
                        async move {
                            let Ok(_permit) = semaphore.acquire_owned().await else {
                                return (i, OperationResult::skipped(&op, "worker pool closed"));
                            };
                            if cancel.is_cancelled() {
                                return (i, OperationResult::skipped(&op, "run cancelled"));
                            }
                            (i, run_operation(&shared, &op).await)
                        }
                        .instrument(span),
                    );
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok((i, result))) => {
                            let succeeded = result.status == OperationStatus::Success;
                            results[i] = Some(result);
                            if succeeded {
                                for &next in &dependents[i] {
                                    waiting[next] -= 1;
                                    if waiting[next] == 0 && results[next].is_none() {
                                        ready.insert(next);
                                    }
                                }
                            } else {
                                skip_dependents(i, &ops, &dependents, &mut results);
                            }
                        }
                        Some(Err(e)) => error!("Operation task failed: {e}"),
                        None => {}
                    }
                }
                () = self.cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    warn!("Cancellation requested, waiting for in-flight operations");
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let results: Vec<OperationResult> = results
            .into_iter()
            .enumerate()
            .map(|(i, result)| {
                result.unwrap_or_else(|| {
                    if started.contains(&i) && !cancelled {
                        OperationResult {
                            status: OperationStatus::Failed,
                            ..OperationResult::skipped(&ops[i], "operation did not complete")
                        }
                    } else if cancelled {
                        OperationResult::skipped(&ops[i], "run cancelled")
                    } else {
                        OperationResult::skipped(&ops[i], "dependency did not complete")
                    }
                })
            })
            .collect();

        let complete = results.iter().all(|r| r.status == OperationStatus::Success);
        let status = if complete {
            RunStatus::Success
        } else if cancelled {
            RunStatus::Aborted
        } else {
            RunStatus::PartialFailure
        };

        let report = ApplyReport {
            run_id: plan.run_id,
            status,
            results,
            outputs: BTreeMap::new(),
        };
        info!("{report}");
        Ok(report)
    }
}

/// Marks every transitive dependent of `failed` as skipped.
fn skip_dependents(
    failed: usize,
    ops: &[PlanOperation],
    dependents: &[Vec<usize>],
    results: &mut [Option<OperationResult>],
) {
    let mut stack = vec![failed];
    while let Some(i) = stack.pop() {
        for &next in &dependents[i] {
            if results[next].is_none() {
                warn!("Skipping {}: {} did not complete", ops[next].address, ops[i].address);
                results[next] = Some(OperationResult::skipped(
                    &ops[next],
                    format!("dependency {} did not complete", ops[i].address),
                ));
                stack.push(next);
            }
        }
    }
}

/// Builds the environment for apply-time evaluation.
///
/// Recorded attributes are known; every planned instance is registered for
/// splat expressions.
fn apply_environment(plan: &Plan, snapshot: &StateSnapshot) -> ResourceEnv {
    let mut env = ResourceEnv::new();
    for op in &plan.operations {
        let Some(node) = &op.node else { continue };
        env.register_instance(&op.address);
        for expr in node.attributes.values() {
            for reference in expr.references() {
                if let Reference::Splat(splat) = reference {
                    env.register_set(&splat.resource_type, &splat.name);
                }
            }
        }
    }
    for record in snapshot.values() {
        env.insert(record.address.clone(), ResolvedResource::known(record.attributes.clone()));
    }
    env
}

async fn run_operation(shared: &RunShared, op: &PlanOperation) -> OperationResult {
    info!("{}", op.description());
    let started = Instant::now();

    let outcome = match op.kind {
        OperationKind::Create => shared.create(op).await.map(Some),
        OperationKind::Update => shared.update(op).await.map(Some),
        OperationKind::Replace => match shared.destroy(op).await {
            Ok(()) => shared.create(op).await.map(Some),
            Err(e) => Err(e),
        },
        OperationKind::Destroy => shared.destroy(op).await.map(|()| None),
        OperationKind::NoOp => Ok(None),
    };

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match outcome {
        Ok(identity) => {
            info!("{} complete", op.address);
            OperationResult {
                address: op.address.clone(),
                kind: op.kind,
                status: OperationStatus::Success,
                identity,
                error: None,
                duration_ms,
            }
        }
        Err(e) => {
            error!("{} failed: {e}", op.address);
            OperationResult {
                address: op.address.clone(),
                kind: op.kind,
                status: OperationStatus::Failed,
                identity: None,
                error: Some(e.to_string()),
                duration_ms,
            }
        }
    }
}

impl RunShared {
    fn node<'o>(op: &'o PlanOperation) -> Result<&'o ResourceNode> {
        op.node
            .as_ref()
            .ok_or_else(|| InfraError::internal(format!("{}: operation has no resource node", op.address)))
    }

    fn record(&self, address: &ResourceAddress) -> Result<&StateRecord> {
        self.records
            .get(address)
            .ok_or_else(|| InfraError::internal(format!("{address}: no recorded state to update")))
    }

    /// Configured attributes, with unknowns resolved from committed upstream state.
    async fn desired(&self, op: &PlanOperation) -> Result<Attributes> {
        let node = Self::node(op)?;
        let planned: Attributes = op
            .after
            .iter()
            .flatten()
            .filter(|(name, _)| node.attributes.contains_key(*name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let desired = if planned.values().any(Value::contains_unknown) {
            debug!("Resolving unknown attributes of {}", op.address);
            let env = self.env.read().await;
            resolve_desired(self.provider.as_ref(), &self.variables, node, &env)?
        } else {
            planned
        };

        if let Some((name, _)) = desired.iter().find(|(_, v)| v.contains_unknown()) {
            return Err(InfraError::internal(format!(
                "{}: attribute '{name}' is still unknown",
                op.address
            )));
        }
        Ok(desired)
    }

    async fn create(&self, op: &PlanOperation) -> Result<String> {
        let node = Self::node(op)?;
        let desired = self.desired(op).await?;

        let (identity, attributes) = self
            .provider
            .create(&op.address.resource_type, &desired)
            .await?;

        let record = StateRecord::new(
            op.address.clone(),
            identity.clone(),
            attributes.clone(),
            node.dependencies.clone(),
        );
        self.store.commit(&record).await?;
        self.env
            .write()
            .await
            .insert(op.address.clone(), ResolvedResource::known(attributes));
        Ok(identity)
    }

    async fn update(&self, op: &PlanOperation) -> Result<String> {
        let node = Self::node(op)?;
        let record = self.record(&op.address)?;
        let desired = self.desired(op).await?;

        let attributes = self
            .provider
            .update(&op.address.resource_type, &record.identity, &desired)
            .await?;

        let next = record.updated(attributes.clone(), node.dependencies.clone());
        self.store.commit(&next).await?;
        self.env
            .write()
            .await
            .insert(op.address.clone(), ResolvedResource::known(attributes));
        Ok(record.identity.clone())
    }

    async fn destroy(&self, op: &PlanOperation) -> Result<()> {
        if let Some(record) = self.records.get(&op.address) {
            match self
                .provider
                .delete(&op.address.resource_type, &record.identity)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("{} ({}) was already deleted", op.address, record.identity);
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.store.remove(&op.address).await
    }
}
