//! Run orchestration.
//!
//! The [`Engine`] ties the pipeline together: variable binding, graph
//! construction, state loading and refresh, diffing, and execution. Every
//! call is one run; the [`RunContext`] carries the provider and store
//! handles, the run options and the cancellation token through it.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{
    ConfigHasher, ConfigValidator, Configuration, DEFAULT_PARALLELISM, VariableBinder, Variables,
};
use crate::error::{PlanError, Result};
use crate::eval::{Evaluator, ResolvedResource, Scope};
use crate::graph::{GraphBuilder, ResourceGraph};
use crate::planner::{
    ApplyExecutor, ApplyReport, DiffEngine, DriftEntry, DriftKind, OutputValue, Plan,
};
use crate::provider::Provider;
use crate::state::{
    LockGuard, StateSnapshot, StateStore, acquire_lock_with_timeout, generate_holder_id, state_digest,
};

/// Options for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of operations in flight.
    pub parallelism: usize,
    /// Re-read recorded resources through the provider before diffing.
    pub refresh: bool,
    /// How long to wait for a held state lock. Zero fails immediately.
    pub lock_timeout: Duration,
    /// Caller-supplied variable values.
    pub variables: Variables,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            refresh: true,
            lock_timeout: Duration::ZERO,
            variables: Variables::new(),
        }
    }
}

impl RunOptions {
    /// Takes the options declared in the configuration's `engine` and
    /// `state` sections.
    #[must_use]
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            parallelism: config.engine.parallelism.max(1),
            refresh: config.engine.refresh,
            lock_timeout: Duration::from_secs(config.state.lock_timeout_secs.unwrap_or(0)),
            variables: Variables::new(),
        }
    }

    /// Sets the parallelism.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Enables or disables refresh.
    #[must_use]
    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the supplied variable values.
    #[must_use]
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }
}

/// Handles and options shared by every stage of a run.
#[derive(Clone)]
pub struct RunContext {
    /// Run identifier, carried by plans computed in this run.
    pub run_id: Uuid,
    /// Provider.
    pub provider: Arc<dyn Provider>,
    /// State store.
    pub store: Arc<dyn StateStore>,
    /// Options.
    pub options: RunOptions,
    /// Cancellation signal.
    pub cancel: CancellationToken,
    /// Lock holder identity.
    pub holder: String,
}

impl RunContext {
    /// Creates a context for a new run.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn StateStore>, options: RunOptions) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            provider,
            store,
            options,
            cancel: CancellationToken::new(),
            holder: generate_holder_id(),
        }
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the lock holder identity.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("provider", &self.provider.name())
            .field("store", &self.store.backend_type())
            .field("options", &self.options)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

/// Plans and applies one configuration.
#[derive(Debug)]
pub struct Engine {
    config: Configuration,
    context: RunContext,
    hasher: ConfigHasher,
}

impl Engine {
    /// Creates an engine for a configuration.
    #[must_use]
    pub const fn new(config: Configuration, context: RunContext) -> Self {
        Self {
            config,
            context,
            hasher: ConfigHasher::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &Configuration {
        &self.config
    }

    /// Returns the run context.
    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.context
    }

    /// Validates the configuration and binds its variables.
    ///
    /// Nothing else in a run happens before this succeeds.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for structural problems, missing or
    /// mistyped variables, or a failing validation rule.
    pub fn bind_variables(&self) -> Result<Variables> {
        let validation = ConfigValidator::new().validate(&self.config)?;
        for warning in &validation.warnings {
            warn!("{warning}");
        }
        VariableBinder::new(&self.config.variables).bind(&self.context.options.variables)
    }

    /// Binds variables and builds the resource graph.
    ///
    /// # Errors
    ///
    /// Returns any binding or graph construction error.
    pub fn graph(&self) -> Result<(Variables, ResourceGraph)> {
        let variables = self.bind_variables()?;
        let graph = GraphBuilder::new(&self.config, &variables).build()?;
        Ok((variables, graph))
    }

    /// Computes a plan converging the recorded state to the configuration.
    ///
    /// # Errors
    ///
    /// Returns configuration errors, lock errors, or provider errors from
    /// refresh.
    pub async fn plan(&self) -> Result<Plan> {
        self.locked(async {
            let (variables, graph) = self.graph()?;
            let snapshot = self.context.store.load().await?;
            self.compute_plan(variables, &graph, &snapshot, false).await
        })
        .await
    }

    /// Computes a plan destroying every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns lock errors or provider errors from refresh.
    pub async fn plan_destroy(&self) -> Result<Plan> {
        self.locked(async {
            let snapshot = self.context.store.load().await?;
            self.compute_plan(Variables::new(), &ResourceGraph::default(), &snapshot, true)
                .await
        })
        .await
    }

    /// Applies a saved plan, or plans and applies in one locked cycle.
    ///
    /// Operation failures are reported in the returned [`ApplyReport`].
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired, the saved plan is
    /// stale, or planning fails. No provider call has been made in that
    /// case.
    pub async fn apply(&self, saved: Option<&Plan>) -> Result<ApplyReport> {
        self.locked(async {
            let snapshot = self.context.store.load().await?;
            let plan = match saved {
                Some(plan) => {
                    self.check_fresh(plan, &snapshot)?;
                    plan.clone()
                }
                None => {
                    let (variables, graph) = self.graph()?;
                    self.compute_plan(variables, &graph, &snapshot, false).await?
                }
            };
            self.execute(&plan, snapshot).await
        })
        .await
    }

    /// Destroys every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or planning fails.
    pub async fn destroy(&self) -> Result<ApplyReport> {
        self.locked(async {
            let snapshot = self.context.store.load().await?;
            let plan = self
                .compute_plan(Variables::new(), &ResourceGraph::default(), &snapshot, true)
                .await?;
            self.execute(&plan, snapshot).await
        })
        .await
    }

    /// Computes the outputs from the recorded state.
    ///
    /// # Errors
    ///
    /// Returns configuration errors or state load errors.
    pub async fn outputs(&self) -> Result<BTreeMap<String, OutputValue>> {
        let (variables, graph) = self.graph()?;
        let snapshot = self.context.store.load().await?;
        Ok(self.compute_outputs(&variables, &graph, &snapshot))
    }

    /// Compares recorded state with the remote objects.
    ///
    /// # Errors
    ///
    /// Returns state load errors or provider errors other than not-found.
    pub async fn drift(&self) -> Result<Vec<DriftEntry>> {
        let snapshot = self.context.store.load().await?;
        let variables = Variables::new();
        let refreshed = DiffEngine::new(self.context.provider.as_ref(), &variables)
            .refresh(&snapshot)
            .await?;
        info!(
            "Checked {} resources, {} drifted",
            snapshot.len(),
            refreshed.drift.len()
        );
        Ok(refreshed.drift)
    }

    /// Runs `work` while holding the state lock.
    ///
    /// The lock is renewed while `work` runs and released even if the
    /// returned future is dropped before completing.
    async fn locked<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let lock = acquire_lock_with_timeout(
            self.context.store.as_ref(),
            &self.context.holder,
            self.context.options.lock_timeout,
        )
        .await?;
        debug!("Acquired state lock {}", lock.lock_id);
        let guard = LockGuard::hold(Arc::clone(&self.context.store), lock);

        let result = work.await;

        if let Err(e) = guard.release().await {
            warn!("Failed to release state lock: {e}");
        }
        result
    }

    async fn compute_plan(
        &self,
        variables: Variables,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
        destroy: bool,
    ) -> Result<Plan> {
        let differ = DiffEngine::new(self.context.provider.as_ref(), &variables);

        let view = if self.context.options.refresh && !snapshot.is_empty() {
            let refreshed = differ.refresh(snapshot).await?;
            let mut view = refreshed.snapshot;
            for entry in &refreshed.drift {
                warn!("Drift detected on {}: {:?}", entry.address, entry.kind);
                // A vanished object nobody wants anymore still needs its record removed.
                if entry.kind == DriftKind::Missing
                    && !graph.contains(&entry.address)
                    && let Some(record) = snapshot.get(&entry.address)
                {
                    view.insert(entry.address.clone(), record.clone());
                }
            }
            view
        } else {
            snapshot.clone()
        };

        let operations = differ.diff(graph, &view)?;
        let plan = Plan {
            run_id: self.context.run_id,
            created_at: Utc::now(),
            config_digest: self.hasher.hash_config(&self.config),
            state_digest: state_digest(snapshot),
            variables,
            destroy,
            operations,
        };
        info!("Plan: {}", plan.summary());
        Ok(plan)
    }

    fn check_fresh(&self, plan: &Plan, snapshot: &StateSnapshot) -> Result<()> {
        let found = state_digest(snapshot);
        if !ConfigHasher::hashes_match(&plan.state_digest, &found) {
            return Err(PlanError::Stale {
                expected: plan.state_digest.clone(),
                found,
            }
            .into());
        }
        if plan.config_digest != self.hasher.hash_config(&self.config) {
            warn!("Configuration changed since the plan was created; applying the saved plan");
        }
        Ok(())
    }

    async fn execute(&self, plan: &Plan, snapshot: StateSnapshot) -> Result<ApplyReport> {
        let mut report = ApplyExecutor::new(
            Arc::clone(&self.context.provider),
            Arc::clone(&self.context.store),
        )
        .with_parallelism(self.context.options.parallelism)
        .with_cancellation(self.context.cancel.clone())
        .execute(plan, snapshot)
        .await?;

        if !plan.destroy {
            match GraphBuilder::new(&self.config, &plan.variables).build() {
                Ok(graph) => {
                    let state = self.context.store.load().await?;
                    report.outputs = self.compute_outputs(&plan.variables, &graph, &state);
                }
                Err(e) => warn!("Skipping outputs: {e}"),
            }
        }
        Ok(report)
    }

    fn compute_outputs(
        &self,
        variables: &Variables,
        graph: &ResourceGraph,
        snapshot: &StateSnapshot,
    ) -> BTreeMap<String, OutputValue> {
        let mut env = graph.environment();
        for record in snapshot.values() {
            env.insert(
                record.address.clone(),
                ResolvedResource::known(record.attributes.clone()),
            );
        }

        let evaluator = Evaluator::new(variables, &env);
        let mut outputs = BTreeMap::new();
        for (name, decl) in &self.config.outputs {
            let origin = format!("output.{name}");
            match evaluator.evaluate(&decl.value, Scope::new(&origin)) {
                Ok(value) => {
                    outputs.insert(
                        name.clone(),
                        OutputValue {
                            value,
                            sensitive: decl.sensitive,
                        },
                    );
                }
                Err(e) => warn!("Skipping output {name}: {e}"),
            }
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ResourceAddress;
    use crate::config::{ConfigParser, TypeConstraint, Value};
    use crate::error::{ConfigError, InfraError};
    use crate::planner::{OperationKind, OperationStatus, RunStatus};
    use crate::provider::{AttributeSchema, Fault, ResourceSchema, SimulatedProvider, Verb};
    use crate::state::MemoryStateStore;

    fn provider() -> SimulatedProvider {
        SimulatedProvider::new().with_schema(
            ResourceSchema::new("thing")
                .attribute("x", AttributeSchema::required(TypeConstraint::String).force_new())
                .attribute("label", AttributeSchema::optional(TypeConstraint::String))
                .attribute("id", AttributeSchema::read_only(TypeConstraint::String)),
        )
    }

    fn engine_with(
        yaml: &str,
        provider: &SimulatedProvider,
        store: &MemoryStateStore,
        options: RunOptions,
    ) -> Engine {
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("config");
        let context = RunContext::new(Arc::new(provider.clone()), Arc::new(store.clone()), options);
        Engine::new(config, context)
    }

    fn engine(yaml: &str, provider: &SimulatedProvider, store: &MemoryStateStore) -> Engine {
        engine_with(yaml, provider, store, RunOptions::default())
    }

    fn addr(name: &str) -> ResourceAddress {
        ResourceAddress::new("thing", name)
    }

    const PAIR: &str = r"
resources:
  - type: thing
    name: a
    attributes:
      x: one
  - type: thing
    name: b
    attributes:
      x: b
      label: { ref: thing.a.x }
outputs:
  a_id:
    value: { ref: thing.a.id }
  label:
    value: { ref: thing.b.label }
";

    #[tokio::test]
    async fn test_apply_then_plan_is_empty() {
        let provider = provider();
        let store = MemoryStateStore::new();
        let engine = engine(PAIR, &provider, &store);

        let report = engine.apply(None).await.expect("apply");
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.outputs["label"].value, Value::from("one"));

        let first = engine.plan().await.expect("plan");
        assert!(first.is_empty());
        assert_eq!(first.change_count(), 0);

        let second = engine.plan().await.expect("plan");
        assert!(second.is_empty());
        assert!(
            second
                .operations
                .iter()
                .all(|op| op.kind == OperationKind::NoOp)
        );
        assert_eq!(second.operations.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_does_not_mutate() {
        let provider = provider();
        let store = MemoryStateStore::new();
        let engine = engine(PAIR, &provider, &store);

        let plan = engine.plan().await.expect("plan");
        assert_eq!(plan.summary().create, 2);
        assert!(store.load().await.expect("load").is_empty());
        assert!(provider.objects().await.is_empty());
        assert!(!store.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_replace_then_update_dependent() {
        let provider = provider();
        let store = MemoryStateStore::new();
        engine(PAIR, &provider, &store).apply(None).await.expect("apply");
        let before = store.load().await.expect("load");

        let changed = PAIR.replace("x: one", "x: two");
        let engine = engine(&changed, &provider, &store);
        let plan = engine.plan().await.expect("plan");

        let kinds: Vec<(String, OperationKind)> = plan
            .changes()
            .map(|op| (op.address.to_string(), op.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (String::from("thing.a"), OperationKind::Replace),
                (String::from("thing.b"), OperationKind::Update),
            ]
        );

        let report = engine.apply(Some(&plan)).await.expect("apply");
        assert_eq!(report.status, RunStatus::Success);

        let after = store.load().await.expect("load");
        let a = &after[&addr("a")];
        let b = &after[&addr("b")];
        assert_ne!(a.identity, before[&addr("a")].identity);
        assert_eq!(b.identity, before[&addr("b")].identity);
        assert_eq!(b.attributes.get("label"), Some(&Value::from("two")));
        assert_eq!(report.outputs["a_id"].value, Value::from(a.identity.as_str()));
    }

    #[tokio::test]
    async fn test_independent_failure_is_partial() {
        let provider = provider();
        provider
            .inject_fault(Fault::new(Verb::Create, "thing").when("x", "c"))
            .await;
        let store = MemoryStateStore::new();
        let config = r"
resources:
  - type: thing
    name: c
    attributes:
      x: c
  - type: thing
    name: d
    attributes:
      x: d
";
        let report = engine(config, &provider, &store)
            .apply(None)
            .await
            .expect("apply");

        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(
            report.result(&addr("c")).map(|r| r.status),
            Some(OperationStatus::Failed)
        );
        assert_eq!(
            report.result(&addr("d")).map(|r| r.status),
            Some(OperationStatus::Success)
        );

        let state = store.load().await.expect("load");
        assert_eq!(state.keys().collect::<Vec<_>>(), vec![&addr("d")]);
    }

    #[tokio::test]
    async fn test_validation_fails_before_any_provider_call() {
        let provider = provider();
        let store = MemoryStateStore::new();
        let config = r#"
variables:
  environment:
    type: string
    validation:
      - condition: { one_of: { value: { var: environment }, options: [dev, staging, prod] } }
        error_message: "environment must be one of dev, staging, prod"
resources:
  - type: thing
    name: a
    attributes:
      x: { var: environment }
"#;
        let options = RunOptions::default()
            .with_variables(Variables::from([(String::from("environment"), Value::from("qa"))]));
        let engine = engine_with(config, &provider, &store, options);

        let err = engine.apply(None).await.unwrap_err();
        match err {
            InfraError::Config(ConfigError::Validation { variable, message }) => {
                assert_eq!(variable, "environment");
                assert_eq!(message, "environment must be one of dev, staging, prod");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(engine.graph().is_err());
        assert!(provider.calls().await.is_empty());
        assert!(!store.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_held_lock_fails_without_timeout() {
        let provider = provider();
        let store = MemoryStateStore::new();
        let held = store.acquire_lock("someone-else").await.expect("lock");

        let err = engine(PAIR, &provider, &store).apply(None).await.unwrap_err();
        assert!(err.is_locked());
        assert!(provider.calls().await.is_empty());

        store.release_lock(&held.lock_id).await.expect("release");
    }

    #[tokio::test]
    async fn test_lock_timeout_waits_for_release() {
        let provider = provider();
        let store = MemoryStateStore::new();
        let held = store.acquire_lock("someone-else").await.expect("lock");

        let releaser = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            releaser.release_lock(&held.lock_id).await
        });

        let options = RunOptions::default().with_lock_timeout(Duration::from_secs(5));
        let report = engine_with(PAIR, &provider, &store, options)
            .apply(None)
            .await
            .expect("apply");
        assert_eq!(report.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_concurrent_applies_are_serialized() {
        let provider = provider().with_latency(Duration::from_millis(50));
        let store = MemoryStateStore::new();
        let first = engine(PAIR, &provider, &store);
        let second = engine(PAIR, &provider, &store);

        let (a, b) = tokio::join!(first.apply(None), second.apply(None));
        let locked = [a, b]
            .into_iter()
            .filter(|r| matches!(r, Err(e) if e.is_locked()))
            .count();
        assert_eq!(locked, 1);
        assert_eq!(store.load().await.expect("load").len(), 2);
    }

    #[tokio::test]
    async fn test_lock_is_renewed_during_long_apply() {
        let provider = provider().with_latency(Duration::from_millis(250));
        let store = MemoryStateStore::new().with_lock_ttl(Duration::from_millis(300));
        let first = engine(PAIR, &provider, &store);
        let second = engine(PAIR, &provider, &store);

        let (a, b) = tokio::join!(first.apply(None), async {
            tokio::time::sleep(Duration::from_millis(400)).await;
            second.apply(None).await
        });

        assert_eq!(a.expect("first apply").status, RunStatus::Success);
        assert!(b.unwrap_err().is_locked());
        assert!(!store.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_dropped_apply_releases_lock() {
        let provider = provider().with_latency(Duration::from_millis(500));
        let store = MemoryStateStore::new();
        let engine = engine(PAIR, &provider, &store);

        let outcome = tokio::time::timeout(Duration::from_millis(100), engine.apply(None)).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_stale_plan_is_rejected() {
        let provider = provider();
        let store = MemoryStateStore::new();
        let engine = engine(PAIR, &provider, &store);

        let plan = engine.plan().await.expect("plan");
        engine.apply(None).await.expect("apply");

        let err = engine.apply(Some(&plan)).await.unwrap_err();
        assert!(matches!(err, InfraError::Plan(PlanError::Stale { .. })));
        assert_eq!(store.load().await.expect("load").len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_detects_drift_and_missing_objects() {
        let provider = provider();
        let store = MemoryStateStore::new();
        let engine = engine(PAIR, &provider, &store);
        engine.apply(None).await.expect("apply");

        let state = store.load().await.expect("load");
        let a = &state[&addr("a")];
        let b = &state[&addr("b")];
        assert!(
            provider
                .set_remote_attribute(&b.identity, "label", Value::from("edited"))
                .await
        );
        assert!(provider.remove_remote(&a.identity).await);

        let drift = engine.drift().await.expect("drift");
        assert_eq!(drift.len(), 2);

        let plan = engine.plan().await.expect("plan");
        assert_eq!(plan.get(&addr("a")).map(|op| op.kind), Some(OperationKind::Create));
        assert_eq!(plan.get(&addr("b")).map(|op| op.kind), Some(OperationKind::Update));

        let stale = engine_with(PAIR, &provider, &store, RunOptions::default().with_refresh(false));
        assert!(stale.plan().await.expect("plan").is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let provider = provider();
        let store = MemoryStateStore::new();
        let engine = engine(PAIR, &provider, &store);
        engine.apply(None).await.expect("apply");

        let plan = engine.plan_destroy().await.expect("plan");
        assert_eq!(plan.summary().destroy, 2);
        assert_eq!(plan.changes().next().map(|op| op.address.clone()), Some(addr("b")));

        let report = engine.destroy().await.expect("destroy");
        assert_eq!(report.status, RunStatus::Success);
        assert!(report.outputs.is_empty());
        assert!(store.load().await.expect("load").is_empty());
        assert!(provider.objects().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_apply_is_aborted() {
        let provider = provider();
        let store = MemoryStateStore::new();
        let config = ConfigParser::new().parse_yaml(PAIR, None).expect("config");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let context = RunContext::new(
            Arc::new(provider.clone()),
            Arc::new(store.clone()),
            RunOptions::default(),
        )
        .with_cancellation(cancel);

        let report = Engine::new(config, context).apply(None).await.expect("apply");
        assert_eq!(report.status, RunStatus::Aborted);
        assert!(store.load().await.expect("load").is_empty());
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_network_template_converges() {
        let provider = SimulatedProvider::network();
        let store = MemoryStateStore::new();
        let options = RunOptions::default()
            .with_variables(Variables::from([(String::from("environment"), Value::from("dev"))]));
        let engine = engine_with(crate::NETWORK_TEMPLATE, &provider, &store, options);

        let report = engine.apply(None).await.expect("apply");
        assert_eq!(report.status, RunStatus::Success, "{:?}", report.results);

        let outputs = engine.outputs().await.expect("outputs");
        let vpc = store
            .load()
            .await
            .expect("load")
            .remove(&ResourceAddress::new("vpc", "main"))
            .expect("vpc record");
        assert_eq!(outputs["vpc_id"].value, Value::from(vpc.identity.as_str()));
        match &outputs["public_subnet_ids"].value {
            Value::List(ids) => assert_eq!(ids.len(), 2),
            other => panic!("unexpected output: {other}"),
        }

        assert!(engine.plan().await.expect("plan").is_empty());

        engine.destroy().await.expect("destroy");
        assert!(provider.objects().await.is_empty());
    }
}
