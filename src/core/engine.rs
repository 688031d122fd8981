//! Execution engine — the scheduler/orchestrator that walks a flow graph
//! for one triggering event.
//!
//! The driver keeps a ready-set of nodes whose predecessors have resolved,
//! dispatches them to a bounded [`JoinSet`] of workers, and applies the
//! retry/timeout/error-handling contract from the flow settings. Delay
//! nodes suspend their branch through a timer re-queue without occupying a
//! worker slot. Step recording is a strict global sequence per execution.

use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::condition;
use crate::core::context::RuntimeContext;
use crate::core::event_bus::FlowEvent;
use crate::core::recorder::StepRecorder;
use crate::core::variables::{resolve_placeholders, VariableStore};
use crate::effects::{EffectContext, EffectRegistry};
use crate::error::{FlowError, FlowResult, NodeError};
use crate::graph::validator::validate;
use crate::graph::{BranchHandle, FlowGraph};
use crate::model::{
    ActionKind, ExecutionStatus, FlowExecution, FlowSettings, NodeConfig, TriggerType,
    VariableScope,
};
use crate::store::FlowStore;

/// Engine-level configuration, independent of any single flow.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max in-flight effect workers per execution.
    pub max_in_flight: usize,
    /// Upper bound on the retry backoff delay.
    pub backoff_cap_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_in_flight: 4,
            backoff_cap_ms: 30_000,
        }
    }
}

/// External command to a running execution.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Cancel,
}

/// Handle to a spawned execution: poll status, wait for a terminal state,
/// or request cancellation.
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    status_rx: watch::Receiver<ExecutionStatus>,
    command_tx: mpsc::Sender<EngineCommand>,
}

impl ExecutionHandle {
    pub fn status(&self) -> ExecutionStatus {
        *self.status_rx.borrow()
    }

    /// Block until the execution reaches a terminal status.
    pub async fn wait(&self) -> ExecutionStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = *rx.borrow();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    pub async fn cancel(&self) {
        let _ = self.command_tx.send(EngineCommand::Cancel).await;
    }
}

/// The execution engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ExecutionEngine {
    store: Arc<dyn FlowStore>,
    effects: Arc<EffectRegistry>,
    variables: Arc<VariableStore>,
    ctx: Arc<RuntimeContext>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn FlowStore>,
        effects: Arc<EffectRegistry>,
        variables: Arc<VariableStore>,
        ctx: Arc<RuntimeContext>,
        config: EngineConfig,
    ) -> Self {
        ExecutionEngine {
            store,
            effects,
            variables,
            ctx,
            config,
        }
    }

    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    /// Create an execution and drive it to a terminal state inline.
    /// Node-level failures are reported through the returned execution's
    /// status, not as an `Err`.
    pub async fn run(
        &self,
        flow_id: Uuid,
        trigger_type: TriggerType,
        input: Value,
    ) -> FlowResult<FlowExecution> {
        let execution = self.prepare(flow_id, trigger_type, input).await?;
        let (status_tx, _status_rx) = watch::channel(ExecutionStatus::Pending);
        let (_command_tx, command_rx) = mpsc::channel(4);
        Driver::new(self.clone(), execution, command_rx, status_tx)?
            .run()
            .await
    }

    /// Create an execution, spawn the driver, and return a handle.
    pub async fn start(
        &self,
        flow_id: Uuid,
        trigger_type: TriggerType,
        input: Value,
    ) -> FlowResult<ExecutionHandle> {
        let execution = self.prepare(flow_id, trigger_type, input).await?;
        let execution_id = execution.id;
        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Pending);
        let (command_tx, command_rx) = mpsc::channel(4);
        let driver = Driver::new(self.clone(), execution, command_rx, status_tx)?;
        tokio::spawn(async move {
            if let Err(err) = driver.run().await {
                tracing::error!(%execution_id, error = %err, "execution driver aborted");
            }
        });
        Ok(ExecutionHandle {
            execution_id,
            status_rx,
            command_tx,
        })
    }

    /// The dispatcher-facing contract: start an execution for a flow and
    /// return its id.
    pub async fn execute(
        &self,
        flow_id: Uuid,
        trigger_type: TriggerType,
        input: Value,
    ) -> FlowResult<Uuid> {
        Ok(self.start(flow_id, trigger_type, input).await?.execution_id)
    }

    async fn prepare(
        &self,
        flow_id: Uuid,
        trigger_type: TriggerType,
        input: Value,
    ) -> FlowResult<FlowExecution> {
        let flow = self
            .store
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::FlowNotFound(flow_id))?;

        let report = validate(&flow);
        if !report.is_valid {
            return Err(FlowError::Validation(Box::new(report)));
        }

        let execution =
            FlowExecution::new(self.ctx.next_id(), &flow, trigger_type, input, self.ctx.now());
        self.store.create_execution(execution.clone()).await?;
        Ok(execution)
    }
}

// --- driver internals ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
    /// Downstream of an exhausted failure under `continue`; never
    /// dispatched, no step record.
    Dead,
}

#[derive(Debug)]
struct ReadyNode {
    node_id: String,
    retry: u32,
    /// Present on retries: the node keeps its original step and order.
    step: Option<(Uuid, u32)>,
}

struct WorkerOutput {
    output: Value,
    branch: Option<BranchHandle>,
}

struct NodeOutcome {
    node_id: String,
    step_id: Uuid,
    order: u32,
    retry: u32,
    result: Result<WorkerOutput, NodeError>,
}

enum TimerMsg {
    RetryReady(ReadyNode),
    DelayDone {
        node_id: String,
        step_id: Uuid,
        output: Value,
    },
}

enum LoopEvent {
    Command(Option<EngineCommand>),
    DeadlineHit,
    Timer(Option<TimerMsg>),
    Joined(Option<Result<NodeOutcome, tokio::task::JoinError>>),
}

struct Driver {
    engine: ExecutionEngine,
    graph: Arc<FlowGraph>,
    recorder: Arc<StepRecorder>,
    execution: FlowExecution,
    settings: FlowSettings,
    deadline: Instant,
    states: HashMap<String, NodeState>,
    outputs: HashMap<String, Value>,
    completed_order: Vec<String>,
    branch_choice: HashMap<String, BranchHandle>,
    ready: VecDeque<ReadyNode>,
    join_set: JoinSet<NodeOutcome>,
    timer_tx: mpsc::UnboundedSender<TimerMsg>,
    timer_rx: mpsc::UnboundedReceiver<TimerMsg>,
    pending_timers: usize,
    command_rx: mpsc::Receiver<EngineCommand>,
    command_open: bool,
    status_tx: watch::Sender<ExecutionStatus>,
    stopping: bool,
    cancelled: bool,
    timed_out: bool,
    stop_error: Option<(String, String)>,
}

impl Driver {
    fn new(
        engine: ExecutionEngine,
        execution: FlowExecution,
        command_rx: mpsc::Receiver<EngineCommand>,
        status_tx: watch::Sender<ExecutionStatus>,
    ) -> FlowResult<Self> {
        let graph = Arc::new(FlowGraph::build(
            &execution.snapshot.nodes,
            &execution.snapshot.connections,
        )?);
        let recorder = Arc::new(StepRecorder::new(
            engine.store.clone(),
            engine.ctx.clone(),
            execution.id,
        ));
        let settings = execution.snapshot.settings.clone();
        let deadline = Instant::now() + Duration::from_millis(settings.timeout_ms);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let mut states = HashMap::new();
        for node_id in graph.node_ids() {
            states.insert(node_id, NodeState::Pending);
        }

        let mut ready = VecDeque::new();
        for trigger in graph.triggers() {
            states.insert(trigger.id.clone(), NodeState::Queued);
            ready.push_back(ReadyNode {
                node_id: trigger.id.clone(),
                retry: 0,
                step: None,
            });
        }

        Ok(Driver {
            engine,
            graph,
            recorder,
            execution,
            settings,
            deadline,
            states,
            outputs: HashMap::new(),
            completed_order: Vec::new(),
            branch_choice: HashMap::new(),
            ready,
            join_set: JoinSet::new(),
            timer_tx,
            timer_rx,
            pending_timers: 0,
            command_rx,
            command_open: true,
            status_tx,
            stopping: false,
            cancelled: false,
            timed_out: false,
            stop_error: None,
        })
    }

    async fn run(mut self) -> FlowResult<FlowExecution> {
        let result = self.run_inner().await;
        self.finalize(result).await
    }

    async fn run_inner(&mut self) -> FlowResult<()> {
        // pending → running on first dispatch
        self.execution.status = ExecutionStatus::Running;
        self.execution.started_at = Some(self.engine.ctx.now());
        self.engine
            .store
            .update_execution(self.execution.clone())
            .await?;
        let _ = self.status_tx.send(ExecutionStatus::Running);
        self.engine.ctx.emit(FlowEvent::ExecutionStarted {
            execution_id: self.execution.id,
            flow_id: self.execution.flow_id,
            timestamp: self.engine.ctx.now(),
        });

        // seed flow-scope variables from the snapshot
        for (name, value) in &self.execution.snapshot.variables {
            self.engine.variables.set(
                VariableScope::Flow,
                Some(self.execution.flow_id),
                name.clone(),
                value.clone(),
                false,
            );
        }

        loop {
            while !self.stopping && self.join_set.len() < self.engine.config.max_in_flight {
                let Some(item) = self.ready.pop_front() else {
                    break;
                };
                self.dispatch(item).await?;
            }

            let idle = self.join_set.is_empty() && self.pending_timers == 0;
            if idle && (self.ready.is_empty() || self.stopping) {
                break;
            }

            let event = {
                let command_open = self.command_open;
                let has_workers = !self.join_set.is_empty();
                let command_rx = &mut self.command_rx;
                let timer_rx = &mut self.timer_rx;
                let join_set = &mut self.join_set;
                let deadline = self.deadline;
                tokio::select! {
                    biased;
                    cmd = command_rx.recv(), if command_open => LoopEvent::Command(cmd),
                    _ = tokio::time::sleep_until(deadline) => LoopEvent::DeadlineHit,
                    msg = timer_rx.recv() => LoopEvent::Timer(msg),
                    joined = join_set.join_next(), if has_workers => LoopEvent::Joined(joined),
                }
            };

            match event {
                LoopEvent::Command(Some(EngineCommand::Cancel)) => {
                    self.cancelled = true;
                    self.stopping = true;
                    self.abort_workers().await;
                    break;
                }
                LoopEvent::Command(None) => {
                    self.command_open = false;
                }
                LoopEvent::DeadlineHit => {
                    self.timed_out = true;
                    self.stopping = true;
                    self.abort_workers().await;
                    break;
                }
                LoopEvent::Timer(Some(msg)) => {
                    self.pending_timers -= 1;
                    match msg {
                        TimerMsg::RetryReady(item) => {
                            self.ready.push_back(item);
                        }
                        TimerMsg::DelayDone {
                            node_id,
                            step_id,
                            output,
                        } => {
                            self.complete_node(&node_id, step_id, 0, output, None).await?;
                        }
                    }
                }
                LoopEvent::Timer(None) => {
                    return Err(FlowError::Internal("timer channel closed".into()));
                }
                LoopEvent::Joined(Some(Ok(outcome))) => {
                    self.handle_outcome(outcome).await?;
                }
                LoopEvent::Joined(Some(Err(join_err))) => {
                    if !join_err.is_cancelled() {
                        return Err(FlowError::Internal(format!(
                            "node task join error: {join_err}"
                        )));
                    }
                }
                LoopEvent::Joined(None) => {}
            }
        }

        Ok(())
    }

    async fn abort_workers(&mut self) {
        self.join_set.abort_all();
        while self.join_set.join_next().await.is_some() {}
    }

    async fn dispatch(&mut self, item: ReadyNode) -> FlowResult<()> {
        let graph = self.graph.clone();
        let node = graph
            .node(&item.node_id)
            .ok_or_else(|| FlowError::Internal(format!("node not found: {}", item.node_id)))?
            .clone();

        self.states.insert(node.id.clone(), NodeState::Running);
        let input = self.resolve_input(&node.id);

        let (step_id, order) = match item.step {
            Some(existing) => existing,
            None => {
                let order = self.recorder.next_order();
                let snapshot = self.engine.variables.redact(
                    &input,
                    self.execution.flow_id,
                    self.execution.id,
                );
                let step_id = self.recorder.begin_step(&node.id, order, snapshot).await?;
                self.engine.ctx.emit(FlowEvent::NodeStarted {
                    execution_id: self.execution.id,
                    node_id: node.id.clone(),
                    timestamp: self.engine.ctx.now(),
                });
                (step_id, order)
            }
        };

        match &node.config {
            NodeConfig::Delay { duration_ms } => {
                // Timer-scheduled re-queue; no worker slot held.
                self.pending_timers += 1;
                let tx = self.timer_tx.clone();
                let node_id = node.id.clone();
                let duration = Duration::from_millis(*duration_ms);
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    let _ = tx.send(TimerMsg::DelayDone {
                        node_id,
                        step_id,
                        output: input,
                    });
                });
            }
            NodeConfig::Trigger { .. } => {
                let node_id = node.id.clone();
                self.join_set.spawn(async move {
                    NodeOutcome {
                        node_id,
                        step_id,
                        order,
                        retry: item.retry,
                        result: Ok(WorkerOutput {
                            output: input,
                            branch: None,
                        }),
                    }
                });
            }
            NodeConfig::Condition {
                field,
                operator,
                value,
            } => {
                let node_id = node.id.clone();
                let field = field.clone();
                let operator = *operator;
                let expected = value.clone();
                self.join_set.spawn(async move {
                    let taken = condition::evaluate(&input, &field, operator, &expected);
                    let branch = if taken {
                        BranchHandle::True
                    } else {
                        BranchHandle::False
                    };
                    NodeOutcome {
                        node_id,
                        step_id,
                        order,
                        retry: item.retry,
                        result: Ok(WorkerOutput {
                            output: json!({ "result": taken }),
                            branch: Some(branch),
                        }),
                    }
                });
            }
            _ => {
                let (kind, config_value) = effect_binding(&node.config)?;
                let config_value = resolve_placeholders(
                    &config_value,
                    &self.engine.variables,
                    self.execution.flow_id,
                    self.execution.id,
                );
                let effects = self.engine.effects.clone();
                let ectx = EffectContext {
                    execution_id: self.execution.id,
                    flow_id: self.execution.flow_id,
                    node_id: node.id.clone(),
                    ctx: self.engine.ctx.clone(),
                };
                let node_id = node.id.clone();
                let retry = item.retry;
                let deadline = self.deadline;
                self.join_set.spawn(async move {
                    let result = match effects.get(kind) {
                        Some(executor) => {
                            // Per-node timeout: whatever remains of the
                            // execution budget.
                            match tokio::time::timeout_at(
                                deadline,
                                executor.execute(&config_value, &input, &ectx),
                            )
                            .await
                            {
                                Ok(result) => result.map(|output| WorkerOutput {
                                    output,
                                    branch: None,
                                }),
                                Err(_) => Err(NodeError::Timeout),
                            }
                        }
                        None => Err(NodeError::ExecutorNotFound(kind.as_str().to_string())),
                    };
                    NodeOutcome {
                        node_id,
                        step_id,
                        order,
                        retry,
                        result,
                    }
                });
            }
        }

        Ok(())
    }

    async fn handle_outcome(&mut self, outcome: NodeOutcome) -> FlowResult<()> {
        match outcome.result {
            Ok(worker) => {
                self.complete_node(
                    &outcome.node_id,
                    outcome.step_id,
                    outcome.retry,
                    worker.output,
                    worker.branch,
                )
                .await
            }
            Err(err) => {
                self.fail_node(outcome.node_id, outcome.step_id, outcome.order, outcome.retry, err)
                    .await
            }
        }
    }

    async fn complete_node(
        &mut self,
        node_id: &str,
        step_id: Uuid,
        retry: u32,
        output: Value,
        branch: Option<BranchHandle>,
    ) -> FlowResult<()> {
        let snapshot =
            self.engine
                .variables
                .redact(&output, self.execution.flow_id, self.execution.id);
        self.recorder.complete_step(step_id, snapshot, retry).await?;

        self.states
            .insert(node_id.to_string(), NodeState::Completed);
        self.outputs.insert(node_id.to_string(), output.clone());
        self.completed_order.push(node_id.to_string());

        if let Some(branch) = branch {
            self.branch_choice.insert(node_id.to_string(), branch);
            self.engine.ctx.emit(FlowEvent::BranchSelected {
                execution_id: self.execution.id,
                node_id: node_id.to_string(),
                branch: branch.as_str().to_string(),
                timestamp: self.engine.ctx.now(),
            });
        }
        self.engine.ctx.emit(FlowEvent::NodeCompleted {
            execution_id: self.execution.id,
            node_id: node_id.to_string(),
            output,
            timestamp: self.engine.ctx.now(),
        });

        self.promote().await
    }

    async fn fail_node(
        &mut self,
        node_id: String,
        step_id: Uuid,
        order: u32,
        retry: u32,
        err: NodeError,
    ) -> FlowResult<()> {
        let can_retry = retry < self.settings.retry_attempts && !self.stopping;
        if can_retry {
            let delay = backoff_delay(&self.settings, retry, self.engine.config.backoff_cap_ms);
            self.recorder
                .append_log(
                    step_id,
                    format!(
                        "attempt {} failed: {}; retrying in {}ms",
                        retry + 1,
                        err,
                        delay.as_millis()
                    ),
                )
                .await?;
            self.states.insert(node_id.clone(), NodeState::Queued);
            self.pending_timers += 1;
            let tx = self.timer_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(TimerMsg::RetryReady(ReadyNode {
                    node_id,
                    retry: retry + 1,
                    step: Some((step_id, order)),
                }));
            });
            return Ok(());
        }

        let message = err.to_string();
        self.recorder.fail_step(step_id, &message, retry).await?;
        self.states.insert(node_id.clone(), NodeState::Failed);
        self.engine.ctx.emit(FlowEvent::NodeFailed {
            execution_id: self.execution.id,
            node_id: node_id.clone(),
            error: message.clone(),
            retry_count: retry,
            timestamp: self.engine.ctx.now(),
        });

        match self.settings.error_handling {
            crate::model::ErrorHandling::Stop => {
                // Abort the run; in-flight siblings are allowed to finish.
                // The first exhausted node names the execution error.
                self.stopping = true;
                if self.stop_error.is_none() {
                    self.stop_error = Some((node_id, message));
                }
            }
            crate::model::ErrorHandling::Continue => {
                // Branch is dead; other ready nodes proceed.
                self.promote().await?;
            }
        }
        Ok(())
    }

    /// Re-evaluate pending nodes until no state changes: nodes with a live
    /// resolved edge become ready; nodes whose every edge died through an
    /// untaken condition branch are recorded `skipped`; nodes downstream of
    /// a failure are dead and get no record.
    async fn promote(&mut self) -> FlowResult<()> {
        let graph = self.graph.clone();
        loop {
            let mut changed = false;
            for node_id in graph.node_ids() {
                if self.states.get(&node_id) != Some(&NodeState::Pending) {
                    continue;
                }
                let incoming: Vec<_> = graph
                    .incoming(&node_id)
                    .into_iter()
                    .cloned()
                    .collect();
                if incoming.is_empty() {
                    // Non-trigger root: unreachable, leave untouched.
                    continue;
                }

                let mut unresolved = false;
                let mut live = false;
                let mut dead_fail = false;
                for edge in &incoming {
                    match self.states.get(&edge.source) {
                        Some(NodeState::Completed) => {
                            let source_is_condition = graph
                                .node(&edge.source)
                                .map(|n| n.config.is_condition())
                                .unwrap_or(false);
                            if source_is_condition {
                                if self.branch_choice.get(&edge.source) == Some(&edge.handle) {
                                    live = true;
                                }
                                // untaken branch: edge dead by skip
                            } else {
                                live = true;
                            }
                        }
                        Some(NodeState::Skipped) => {}
                        Some(NodeState::Failed) | Some(NodeState::Dead) => dead_fail = true,
                        _ => unresolved = true,
                    }
                }

                if unresolved {
                    continue;
                }
                if live {
                    self.states.insert(node_id.clone(), NodeState::Queued);
                    self.ready.push_back(ReadyNode {
                        node_id,
                        retry: 0,
                        step: None,
                    });
                } else if dead_fail {
                    self.states.insert(node_id.clone(), NodeState::Dead);
                } else {
                    let order = self.recorder.next_order();
                    self.recorder.skip_step(&node_id, order).await?;
                    self.states.insert(node_id.clone(), NodeState::Skipped);
                    self.engine.ctx.emit(FlowEvent::NodeSkipped {
                        execution_id: self.execution.id,
                        node_id,
                        timestamp: self.engine.ctx.now(),
                    });
                }
                changed = true;
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Merge the trigger payload, ancestor outputs (in completion order) and
    /// the visible variables into one node input object.
    fn resolve_input(&self, node_id: &str) -> Value {
        let mut merged = match &self.execution.input_data {
            Value::Object(obj) => obj.clone(),
            Value::Null => Map::new(),
            other => {
                let mut m = Map::new();
                m.insert("payload".to_string(), other.clone());
                m
            }
        };

        let ancestors = self.ancestors(node_id);
        for ancestor_id in &self.completed_order {
            if !ancestors.contains(ancestor_id) {
                continue;
            }
            if let Some(Value::Object(output)) = self.outputs.get(ancestor_id) {
                for (k, v) in output {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }

        let vars = self
            .engine
            .variables
            .visible(self.execution.flow_id, self.execution.id);
        if !vars.is_empty() {
            merged.insert("vars".to_string(), Value::Object(vars));
        }

        Value::Object(merged)
    }

    fn ancestors(&self, node_id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![node_id.to_string()];
        while let Some(current) = stack.pop() {
            for edge in self.graph.incoming(&current) {
                if seen.insert(edge.source.clone()) {
                    stack.push(edge.source.clone());
                }
            }
        }
        seen
    }

    async fn finalize(mut self, result: FlowResult<()>) -> FlowResult<FlowExecution> {
        let now = self.engine.ctx.now();
        let mut fatal = false;

        match result {
            Ok(()) => {
                if self.cancelled {
                    self.execution.status = ExecutionStatus::Cancelled;
                    self.execution.error_message = Some("execution cancelled".into());
                    let _ = self.recorder.fail_running_steps("execution cancelled").await;
                    self.engine.ctx.emit(FlowEvent::ExecutionCancelled {
                        execution_id: self.execution.id,
                        timestamp: now,
                    });
                } else if self.timed_out {
                    self.execution.status = ExecutionStatus::Failed;
                    self.execution.error_message =
                        Some(FlowError::ExecutionTimeout.to_string());
                    self.execution.error_details = Some(json!({ "kind": "timeout" }));
                    let _ = self.recorder.fail_running_steps("execution timed out").await;
                    self.engine.ctx.emit(FlowEvent::ExecutionFailed {
                        execution_id: self.execution.id,
                        error: "execution timed out".into(),
                        timestamp: now,
                    });
                } else if let Some((node_id, error)) = self.stop_error.take() {
                    self.execution.status = ExecutionStatus::Failed;
                    self.execution.error_message =
                        Some(format!("node {node_id} failed: {error}"));
                    self.execution.error_details =
                        Some(json!({ "kind": "node_failure", "node_id": node_id }));
                    // A sibling may still hold a pending retry; its step must
                    // not stay `running` inside a terminal execution.
                    let _ = self
                        .recorder
                        .fail_running_steps("execution stopped after node failure")
                        .await;
                    self.engine.ctx.emit(FlowEvent::ExecutionFailed {
                        execution_id: self.execution.id,
                        error,
                        timestamp: now,
                    });
                } else {
                    self.execution.status = ExecutionStatus::Completed;
                    self.engine.ctx.emit(FlowEvent::ExecutionCompleted {
                        execution_id: self.execution.id,
                        timestamp: now,
                    });
                }
            }
            Err(err) => {
                // Fatal abort: no partial step may be left running.
                fatal = true;
                let message = err.to_string();
                self.execution.status = ExecutionStatus::Failed;
                self.execution.error_message = Some(message.clone());
                self.execution.error_details = Some(json!({ "fatal": true, "error": message }));
                let _ = self.recorder.fail_running_steps("fatal abort").await;
                self.engine.ctx.emit(FlowEvent::ExecutionFailed {
                    execution_id: self.execution.id,
                    error: message,
                    timestamp: now,
                });
            }
        }

        self.execution.completed_at = Some(now);
        self.execution.duration_ms = self
            .execution
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64);

        let persisted = self
            .engine
            .store
            .update_execution(self.execution.clone())
            .await;
        self.engine.variables.clear_execution(self.execution.id);
        let _ = self.status_tx.send(self.execution.status);

        // Per-run counters on the owning flow, best effort.
        if let Ok(Some(mut flow)) = self.engine.store.get_flow(self.execution.flow_id).await {
            flow.execution_count += 1;
            if self.execution.status == ExecutionStatus::Completed {
                flow.success_count += 1;
            }
            let _ = self.engine.store.update_flow(flow).await;
        }

        if fatal {
            tracing::error!(
                execution_id = %self.execution.id,
                error = ?self.execution.error_message,
                "execution aborted fatally"
            );
        }

        match persisted {
            Ok(()) => Ok(self.execution),
            Err(err) => Err(err),
        }
    }
}

/// Map an action-like node configuration onto its effect dispatch key and
/// effect-facing configuration value.
fn effect_binding(config: &NodeConfig) -> FlowResult<(ActionKind, Value)> {
    match config {
        NodeConfig::Action { action, params } => Ok((*action, params.clone())),
        NodeConfig::Ai {
            prompt,
            model,
            params,
        } => Ok((
            ActionKind::AiGenerate,
            json!({ "prompt": prompt, "model": model, "params": params }),
        )),
        NodeConfig::Notification { channel, params } => Ok((
            ActionKind::NotificationSend,
            json!({ "channel": channel, "params": params }),
        )),
        NodeConfig::Data { transform } => Ok((
            ActionKind::DataTransform,
            serde_json::to_value(transform)
                .map_err(|e| FlowError::Internal(e.to_string()))?,
        )),
        other => Err(FlowError::Internal(format!(
            "node type {:?} has no effect binding",
            other.node_type()
        ))),
    }
}

fn backoff_delay(settings: &FlowSettings, retry: u32, cap_ms: u64) -> Duration {
    let base = settings
        .retry_delay_ms
        .saturating_mul(1u64 << retry.min(16));
    let capped = base.min(cap_ms.max(settings.retry_delay_ms));
    // Jitter so simultaneous retries across branches do not align.
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis((capped as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let settings = FlowSettings {
            retry_delay_ms: 100,
            ..Default::default()
        };
        let d0 = backoff_delay(&settings, 0, 30_000);
        let d3 = backoff_delay(&settings, 3, 30_000);
        assert!(d0.as_millis() >= 80 && d0.as_millis() <= 120);
        assert!(d3.as_millis() >= 640 && d3.as_millis() <= 960);

        let capped = backoff_delay(&settings, 16, 500);
        assert!(capped.as_millis() <= 600);
    }

    #[test]
    fn effect_binding_for_action_like_nodes() {
        let (kind, config) = effect_binding(&NodeConfig::Ai {
            prompt: "hello".into(),
            model: None,
            params: Value::Null,
        })
        .unwrap();
        assert_eq!(kind, ActionKind::AiGenerate);
        assert_eq!(config["prompt"], "hello");

        assert!(effect_binding(&NodeConfig::Delay { duration_ms: 1 }).is_err());
    }
}
