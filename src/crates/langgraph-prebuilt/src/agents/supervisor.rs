//! Multi-Agent Supervisor - Routing Work to Specialist Workers
//!
//! The **Supervisor** pattern centralizes task routing: a supervisor decides
//! which worker (or workers, in parallel) should handle a piece of work,
//! dispatches it, and an aggregator combines whatever the workers return.
//!
//! # Overview
//!
//! 1. **Route**: Supervisor picks one or more workers for the current task
//! 2. **Execute**: Chosen workers run concurrently
//! 3. **Aggregate**: Results are combined into a final answer
//! 4. **Repeat**: If a worker reports its task unfinished, route again
//!
//! **Use Supervisor when:**
//! - A task naturally decomposes across distinct specialist workers
//! - Workers can run independently and in parallel
//! - Routing decisions benefit from an explicit, auditable trail
//!
//! **Don't use when:**
//! - A single agent can already handle the whole task (use ReAct)
//! - Steps are strictly sequential with no parallel branches (use Plan-Execute)
//!
//! # Routing strategies
//!
//! | Strategy | Serde tag | How it picks a worker |
//! |----------|-----------|------------------------|
//! | LLM-based | `llm_based` | Supervisor LLM emits a JSON routing decision |
//! | Rule-based | `rule_based` | First matching keyword rule, else a default worker |
//! | Round-robin | `round_robin` | Cycles through registered workers in order |
//! | Skill-based | `skill_based` | Workers whose skills appear in the task text |
//! | Load-balanced | `load_balanced` | The worker with the lowest current workload |
//!
//! An `llm_based` decision that names a worker id the registry doesn't know
//! falls back to round-robin selection with `confidence` forced to `0.0`, so
//! a hallucinated worker name can never silently misroute a task.
//!
//! # Human-in-the-loop
//!
//! A worker function may call
//! [`langgraph_core::inline_interrupt::interrupt_for_input`] (or the other
//! `interrupt_for_*` helpers) to pause the graph mid-task and ask a human a
//! question. The error bubbles up through the supervisor node exactly like
//! any other node error, the engine persists a checkpoint at that point, and
//! the caller resumes the compiled graph with the human's answer once it has
//! one.

use crate::error::{PrebuiltError, Result};
use crate::messages::Message;
use langgraph_core::compiled::CompiledGraph;
use langgraph_core::StateGraph;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for LLM functions used by the supervisor and aggregator roles
pub type LlmFunction =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Message>> + Send>> + Send + Sync>;

/// Type alias for a worker's task function: takes the task payload, returns
/// its result as JSON. A worker signals it wants another routing round by
/// returning `{"done": false, ...}`; omitting `done` is treated as `true`.
pub type WorkerFunction =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// How a supervisor picks which worker(s) handle the current task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Supervisor LLM emits a routing decision as JSON
    LlmBased,
    /// First keyword rule that matches the task text wins
    RuleBased,
    /// Cycles through registered workers in a fixed order
    RoundRobin,
    /// Workers whose declared skills appear in the task text
    SkillBased,
    /// The worker currently carrying the least work
    LoadBalanced,
}

/// A routing decision made by the supervisor for one dispatch round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Single target worker, when exactly one was chosen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    /// Multiple target workers, when the task fans out in parallel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agents: Option<Vec<String>>,
    /// Why this routing decision was made
    pub reasoning: String,
    /// Confidence in this decision, 0.0 to 1.0
    pub confidence: f64,
    /// Strategy that produced this decision
    pub strategy: RoutingStrategy,
    /// When the decision was made
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl RoutingDecision {
    /// All worker ids this decision targets, single or multiple
    pub fn targets(&self) -> Vec<String> {
        match (&self.target_agent, &self.target_agents) {
            (_, Some(many)) => many.clone(),
            (Some(one), None) => vec![one.clone()],
            (None, None) => Vec::new(),
        }
    }
}

/// A worker's declared capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Worker identifier, matched against routing decisions
    pub worker_id: String,
    /// Skills this worker advertises, used by skill-based routing
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Tracks registered workers and how much work each currently carries
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, WorkerDescriptor>,
    workload: HashMap<String, usize>,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, or replace its descriptor if already registered
    pub fn register(&mut self, descriptor: WorkerDescriptor) {
        self.workload.entry(descriptor.worker_id.clone()).or_insert(0);
        self.workers.insert(descriptor.worker_id.clone(), descriptor);
    }

    /// Worker ids, sorted for deterministic round-robin ordering
    pub fn worker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a worker id is registered
    pub fn contains(&self, worker_id: &str) -> bool {
        self.workers.contains_key(worker_id)
    }

    /// Number of registered workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the registry has no workers
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Skills declared by a worker, empty if unregistered
    pub fn skills_of(&self, worker_id: &str) -> &[String] {
        self.workers
            .get(worker_id)
            .map(|w| w.skills.as_slice())
            .unwrap_or(&[])
    }

    /// Current workload count for a worker
    pub fn workload_of(&self, worker_id: &str) -> usize {
        self.workload.get(worker_id).copied().unwrap_or(0)
    }

    /// Mark a worker as having taken on one more task
    pub fn increment_workload(&mut self, worker_id: &str) {
        *self.workload.entry(worker_id.to_string()).or_insert(0) += 1;
    }

    /// Mark a worker as having completed one task
    pub fn decrement_workload(&mut self, worker_id: &str) {
        if let Some(count) = self.workload.get_mut(worker_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// The worker with the lowest workload, ties broken alphabetically by id
    pub fn least_loaded(&self) -> Option<String> {
        self.worker_ids()
            .into_iter()
            .min_by_key(|id| self.workload_of(id))
    }

    /// Workers whose skills include at least one skill present in `task_text`
    /// (case-insensitive substring match). Returns an empty vec if none match.
    pub fn matching_skills(&self, task_text: &str) -> Vec<String> {
        let lower = task_text.to_lowercase();
        let mut matched: Vec<String> = self
            .worker_ids()
            .into_iter()
            .filter(|id| {
                self.skills_of(id)
                    .iter()
                    .any(|skill| lower.contains(&skill.to_lowercase()))
            })
            .collect();
        matched.sort();
        matched
    }

    /// Build a registry from the `workers` object shape used in supervisor
    /// input (`{"researcher": {"skills": ["research"]}, ...}`).
    pub fn from_value(value: &Value) -> Self {
        let mut registry = Self::new();
        if let Some(map) = value.as_object() {
            for (worker_id, descriptor) in map {
                let skills = descriptor
                    .get("skills")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                registry.register(WorkerDescriptor {
                    worker_id: worker_id.clone(),
                    skills,
                });
            }
        }
        registry
    }

    /// Merge another registry's workers into this one, keeping existing
    /// workload counts for workers already present
    pub fn merge(&mut self, other: WorkerRegistry) {
        for (id, descriptor) in other.workers {
            if !self.workers.contains_key(&id) {
                self.workload.insert(id.clone(), 0);
            }
            self.workers.insert(id, descriptor);
        }
    }
}

/// Outcome of a single worker's task execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Identifies the dispatch this result answers
    pub assignment_id: String,
    /// Worker that produced this result
    pub worker_id: String,
    /// Whether the worker completed the task without error
    pub success: bool,
    /// The worker's output, when successful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The failure reason, when unsuccessful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When this result was recorded
    pub completed_at: chrono::DateTime<chrono::Utc>,
    /// Arbitrary worker-supplied metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Rule-based routing entry: first matching keyword wins
#[derive(Debug, Clone)]
pub struct RoutingRule {
    /// Keyword matched case-insensitively against the task text
    pub keyword: String,
    /// Worker to route to when `keyword` matches
    pub worker_id: String,
}

/// Configuration for a multi-agent supervisor
pub struct SupervisorConfig {
    workers: WorkerRegistry,
    worker_fns: HashMap<String, WorkerFunction>,
    supervisor_llm: Option<LlmFunction>,
    aggregator_llm: Option<LlmFunction>,
    routing_strategy: RoutingStrategy,
    rules: Vec<RoutingRule>,
    default_worker: Option<String>,
    max_iterations: usize,
    max_tool_retries: usize,
}

impl SupervisorConfig {
    /// Start a configuration with no workers registered
    pub fn new() -> Self {
        Self {
            workers: WorkerRegistry::new(),
            worker_fns: HashMap::new(),
            supervisor_llm: None,
            aggregator_llm: None,
            routing_strategy: RoutingStrategy::SkillBased,
            rules: Vec::new(),
            default_worker: None,
            max_iterations: 10,
            max_tool_retries: 3,
        }
    }

    /// Register a worker and the function that executes its tasks
    pub fn with_worker(mut self, descriptor: WorkerDescriptor, worker_fn: WorkerFunction) -> Self {
        self.worker_fns.insert(descriptor.worker_id.clone(), worker_fn);
        self.workers.register(descriptor);
        self
    }

    /// Set the routing strategy
    pub fn with_routing_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.routing_strategy = strategy;
        self
    }

    /// Set the LLM used for `llm_based` routing decisions
    pub fn with_supervisor_llm(mut self, llm: LlmFunction) -> Self {
        self.supervisor_llm = Some(llm);
        self
    }

    /// Set the LLM used to synthesize a final answer from task results. If
    /// unset, the aggregator concatenates worker results into a JSON array.
    pub fn with_aggregator_llm(mut self, llm: LlmFunction) -> Self {
        self.aggregator_llm = Some(llm);
        self
    }

    /// Add a keyword rule for `rule_based` routing, evaluated in the order added
    pub fn with_rule(mut self, keyword: impl Into<String>, worker_id: impl Into<String>) -> Self {
        self.rules.push(RoutingRule {
            keyword: keyword.into(),
            worker_id: worker_id.into(),
        });
        self
    }

    /// Worker used by `rule_based` routing when no rule matches
    pub fn with_default_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.default_worker = Some(worker_id.into());
        self
    }

    /// Maximum routing rounds before the run is marked failed
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Maximum retries for a single worker's task before it's recorded as failed
    pub fn with_max_tool_retries(mut self, max: usize) -> Self {
        self.max_tool_retries = max;
        self
    }

    /// Build the compiled supervisor agent graph
    pub fn build(self) -> Result<CompiledGraph> {
        build_supervisor_graph(self)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of the JSON object an `llm_based` routing prompt asks the model to emit
#[derive(Debug, Deserialize)]
struct RawRoutingDecision {
    target_agent: Option<String>,
    #[serde(default)]
    target_agents: Option<Vec<String>>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: f64,
}

/// Find the first balanced `{...}` object in `text`
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Round-robin worker selection: `ids` must already be in a stable order
fn select_round_robin(ids: &[String], cursor: usize) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    Some(ids[cursor % ids.len()].clone())
}

/// Pick a rule-based target, falling back to `default_worker` if no rule matches
fn select_rule_based(task_text: &str, rules: &[RoutingRule], default_worker: Option<&str>) -> Option<String> {
    let lower = task_text.to_lowercase();
    rules
        .iter()
        .find(|rule| lower.contains(&rule.keyword.to_lowercase()))
        .map(|rule| rule.worker_id.clone())
        .or_else(|| default_worker.map(str::to_string))
}

/// Parse an LLM's routing response into a decision, falling back to
/// round-robin with zero confidence when unparseable or when it names a
/// worker the registry doesn't recognize.
fn parse_routing_decision(
    response: &Message,
    registry: &WorkerRegistry,
    round_robin_cursor: usize,
) -> (RoutingDecision, bool) {
    let parsed = extract_json_object(&response.content)
        .and_then(|json_str| serde_json::from_str::<RawRoutingDecision>(json_str).ok());

    let worker_ids = registry.worker_ids();

    let fallback = |reason: &str| {
        let target = select_round_robin(&worker_ids, round_robin_cursor);
        (
            RoutingDecision {
                target_agent: target,
                target_agents: None,
                reasoning: reason.to_string(),
                confidence: 0.0,
                strategy: RoutingStrategy::LlmBased,
                timestamp: chrono::Utc::now(),
            },
            true,
        )
    };

    match parsed {
        Some(raw) => {
            let targets = match (&raw.target_agent, &raw.target_agents) {
                (_, Some(many)) => many.clone(),
                (Some(one), None) => vec![one.clone()],
                (None, None) => Vec::new(),
            };

            if targets.is_empty() || !targets.iter().all(|t| registry.contains(t)) {
                return fallback("routing response named an unknown or missing worker; falling back to round-robin");
            }

            let decision = RoutingDecision {
                target_agent: raw.target_agent,
                target_agents: raw.target_agents,
                reasoning: raw.reasoning,
                confidence: raw.confidence.clamp(0.0, 1.0),
                strategy: RoutingStrategy::LlmBased,
                timestamp: chrono::Utc::now(),
            };
            (decision, false)
        }
        None => fallback("routing response did not contain a parseable decision; falling back to round-robin"),
    }
}

/// Build the supervisor agent graph
fn build_supervisor_graph(config: SupervisorConfig) -> Result<CompiledGraph> {
    let mut graph = StateGraph::new();

    let workers = Arc::new(config.workers);
    let worker_fns = Arc::new(config.worker_fns);
    let supervisor_llm = config.supervisor_llm.clone();
    let aggregator_llm = config.aggregator_llm.clone();
    let strategy = config.routing_strategy;
    let rules = Arc::new(config.rules);
    let default_worker = config.default_worker.clone();
    let max_iterations = config.max_iterations;
    let max_tool_retries = config.max_tool_retries;

    graph.add_node("supervisor", move |state: Value| {
        let workers = workers.clone();
        let worker_fns = worker_fns.clone();
        let supervisor_llm = supervisor_llm.clone();
        let rules = rules.clone();
        let default_worker = default_worker.clone();

        Box::pin(async move {
            let mut state_obj = state.as_object().cloned().unwrap_or_default();

            let mut registry = workers.as_ref().clone();
            if let Some(workers_value) = state_obj.get("workers") {
                registry.merge(WorkerRegistry::from_value(workers_value));
            }

            let task_text = state_obj
                .get("input")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            let iteration_count = state_obj
                .get("iteration_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;

            let round_robin_cursor = state_obj
                .get("_round_robin_cursor")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;

            state_obj.insert("status".to_string(), json!("routing"));

            if iteration_count >= max_iterations {
                state_obj.insert("status".to_string(), json!("failed"));
                state_obj.insert(
                    "failure_reason".to_string(),
                    json!("maximum routing iterations reached"),
                );
                return Ok(Value::Object(state_obj));
            }

            let worker_ids = registry.worker_ids();
            let (decision, used_fallback) = match strategy {
                RoutingStrategy::LlmBased => {
                    if let Some(llm) = &supervisor_llm {
                        let prompt = format!(
                            "Decide which worker(s) should handle this task.\n\nTask: {}\n\nAvailable workers: {}\n\n\
                             Respond with a JSON object containing target_agent OR target_agents, reasoning, and confidence (0.0-1.0).",
                            task_text,
                            worker_ids.join(", ")
                        );
                        let input = json!({"messages": [{"role": "user", "content": prompt}]});
                        let response = llm(input)
                            .await
                            .map_err(|e| langgraph_core::GraphError::Execution(e.to_string()))?;
                        parse_routing_decision(&response, &registry, round_robin_cursor)
                    } else {
                        let target = select_round_robin(&worker_ids, round_robin_cursor);
                        (
                            RoutingDecision {
                                target_agent: target,
                                target_agents: None,
                                reasoning: "no supervisor LLM configured; falling back to round-robin".to_string(),
                                confidence: 0.0,
                                strategy: RoutingStrategy::LlmBased,
                                timestamp: chrono::Utc::now(),
                            },
                            true,
                        )
                    }
                }
                RoutingStrategy::RuleBased => {
                    let target = select_rule_based(&task_text, &rules, default_worker.as_deref());
                    (
                        RoutingDecision {
                            target_agent: target.clone(),
                            target_agents: None,
                            reasoning: if target.is_some() {
                                "matched a keyword rule".to_string()
                            } else {
                                "no rule matched and no default worker configured".to_string()
                            },
                            confidence: if target.is_some() { 1.0 } else { 0.0 },
                            strategy: RoutingStrategy::RuleBased,
                            timestamp: chrono::Utc::now(),
                        },
                        false,
                    )
                }
                RoutingStrategy::RoundRobin => {
                    let target = select_round_robin(&worker_ids, round_robin_cursor);
                    (
                        RoutingDecision {
                            target_agent: target,
                            target_agents: None,
                            reasoning: "cycling through registered workers in order".to_string(),
                            confidence: 1.0,
                            strategy: RoutingStrategy::RoundRobin,
                            timestamp: chrono::Utc::now(),
                        },
                        false,
                    )
                }
                RoutingStrategy::SkillBased => {
                    let matched = registry.matching_skills(&task_text);
                    if matched.is_empty() {
                        (
                            RoutingDecision {
                                target_agent: None,
                                target_agents: Some(worker_ids.clone()),
                                reasoning: "no worker's skills matched the task text; broadcasting to all workers".to_string(),
                                confidence: 0.5,
                                strategy: RoutingStrategy::SkillBased,
                                timestamp: chrono::Utc::now(),
                            },
                            true,
                        )
                    } else if matched.len() == 1 {
                        (
                            RoutingDecision {
                                target_agent: Some(matched[0].clone()),
                                target_agents: None,
                                reasoning: format!("worker '{}' skills matched the task text", matched[0]),
                                confidence: 1.0,
                                strategy: RoutingStrategy::SkillBased,
                                timestamp: chrono::Utc::now(),
                            },
                            false,
                        )
                    } else {
                        (
                            RoutingDecision {
                                target_agent: None,
                                target_agents: Some(matched.clone()),
                                reasoning: format!("workers {} all have skills matching the task text", matched.join(", ")),
                                confidence: 1.0,
                                strategy: RoutingStrategy::SkillBased,
                                timestamp: chrono::Utc::now(),
                            },
                            false,
                        )
                    }
                }
                RoutingStrategy::LoadBalanced => {
                    let target = registry.least_loaded();
                    (
                        RoutingDecision {
                            target_agent: target,
                            target_agents: None,
                            reasoning: "routed to the worker with the lowest current workload".to_string(),
                            confidence: 1.0,
                            strategy: RoutingStrategy::LoadBalanced,
                            timestamp: chrono::Utc::now(),
                        },
                        false,
                    )
                }
            };

            let targets = decision.targets();
            state_obj.insert(
                "routing_decision".to_string(),
                serde_json::to_value(&decision).map_err(langgraph_core::GraphError::Serialization)?,
            );
            state_obj.insert(
                "_round_robin_cursor".to_string(),
                json!((round_robin_cursor + 1) % worker_ids.len().max(1)),
            );

            if targets.is_empty() {
                state_obj.insert("status".to_string(), json!("failed"));
                state_obj.insert("failure_reason".to_string(), json!("routing produced no target worker"));
                return Ok(Value::Object(state_obj));
            }

            state_obj.insert("status".to_string(), json!("executing"));

            let task_payload = json!({"input": task_text});
            let dispatches: Vec<_> = targets
                .iter()
                .map(|worker_id| {
                    let worker_id = worker_id.clone();
                    let task_payload = task_payload.clone();
                    let worker_fns = worker_fns.clone();
                    async move {
                        let assignment_id = uuid::Uuid::new_v4().to_string();
                        let mut attempt = 0usize;
                        loop {
                            let outcome = match worker_fns.get(&worker_id) {
                                Some(worker_fn) => worker_fn(task_payload.clone()).await,
                                None => Err(PrebuiltError::Custom(format!(
                                    "no worker function registered for '{worker_id}'"
                                ))),
                            };

                            match outcome {
                                Ok(result) => {
                                    break TaskResult {
                                        assignment_id,
                                        worker_id: worker_id.clone(),
                                        success: true,
                                        result: Some(result),
                                        error: None,
                                        completed_at: chrono::Utc::now(),
                                        metadata: None,
                                    };
                                }
                                Err(e) => {
                                    attempt += 1;
                                    if attempt > max_tool_retries {
                                        break TaskResult {
                                            assignment_id,
                                            worker_id: worker_id.clone(),
                                            success: false,
                                            result: None,
                                            error: Some(e.to_string()),
                                            completed_at: chrono::Utc::now(),
                                            metadata: None,
                                        };
                                    }
                                }
                            }
                        }
                    }
                })
                .collect();

            let results: Vec<TaskResult> = futures::future::join_all(dispatches).await;

            let mut task_results: Vec<TaskResult> = state_obj
                .get("task_results")
                .and_then(|v| serde_json::from_value::<Vec<TaskResult>>(v.clone()).ok())
                .unwrap_or_default();

            let all_succeeded = results.iter().all(|r| r.success);
            let any_unfinished = results.iter().any(|r| {
                r.result
                    .as_ref()
                    .and_then(|v| v.get("done"))
                    .and_then(|v| v.as_bool())
                    == Some(false)
            });

            task_results.extend(results);
            state_obj.insert(
                "task_results".to_string(),
                serde_json::to_value(&task_results).map_err(langgraph_core::GraphError::Serialization)?,
            );
            state_obj.insert("iteration_count".to_string(), json!(iteration_count + 1));
            state_obj.insert("routing_fallback_used".to_string(), json!(used_fallback));

            if !all_succeeded {
                state_obj.insert("status".to_string(), json!("failed"));
                state_obj.insert(
                    "failure_reason".to_string(),
                    json!("one or more workers failed after exhausting retries"),
                );
            } else if any_unfinished && iteration_count + 1 < max_iterations {
                state_obj.insert("status".to_string(), json!("executing"));
            } else {
                state_obj.insert("status".to_string(), json!("aggregating"));
            }

            Ok(Value::Object(state_obj))
        })
    });

    graph.add_node("aggregator", move |state: Value| {
        let aggregator_llm = aggregator_llm.clone();

        Box::pin(async move {
            let mut state_obj = state.as_object().cloned().unwrap_or_default();

            let task_results: Vec<TaskResult> = state_obj
                .get("task_results")
                .and_then(|v| serde_json::from_value::<Vec<TaskResult>>(v.clone()).ok())
                .unwrap_or_default();

            let final_output = if let Some(llm) = &aggregator_llm {
                let summary_input = json!({
                    "messages": [{
                        "role": "user",
                        "content": format!(
                            "Combine these worker results into a single final answer:\n{}",
                            serde_json::to_string_pretty(&task_results).unwrap_or_default()
                        )
                    }]
                });
                let response = llm(summary_input)
                    .await
                    .map_err(|e| langgraph_core::GraphError::Execution(e.to_string()))?;
                json!(response.content)
            } else {
                json!(task_results
                    .iter()
                    .filter(|r| r.success)
                    .filter_map(|r| r.result.clone())
                    .collect::<Vec<_>>())
            };

            state_obj.insert("final_output".to_string(), final_output);
            state_obj.insert("status".to_string(), json!("completed"));

            Ok(Value::Object(state_obj))
        })
    });

    graph.add_edge("__start__", "supervisor");

    graph.add_conditional_edge(
        "supervisor",
        move |state: &Value| {
            use langgraph_core::send::ConditionalEdgeResult;

            match state.get("status").and_then(|v| v.as_str()) {
                Some("aggregating") => ConditionalEdgeResult::Node("aggregator".to_string()),
                Some("failed") => ConditionalEdgeResult::Node("__end__".to_string()),
                _ => ConditionalEdgeResult::Node("supervisor".to_string()),
            }
        },
        vec![
            ("aggregator".to_string(), "aggregator".to_string()),
            ("__end__".to_string(), "__end__".to_string()),
            ("supervisor".to_string(), "supervisor".to_string()),
        ]
        .into_iter()
        .collect(),
    );

    graph.add_edge("aggregator", "__end__");

    graph.compile().map_err(PrebuiltError::Graph)
}

/// Create a multi-agent supervisor with no workers registered yet; use
/// [`SupervisorConfig::with_worker`] to add them before calling `.build()`.
pub fn create_multi_agent_supervisor() -> SupervisorConfig {
    SupervisorConfig::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_value_matches_s1_shape() {
        let value = json!({
            "researcher": {"skills": ["research"]},
            "writer": {"skills": ["writing"]}
        });
        let registry = WorkerRegistry::from_value(&value);

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("researcher"));
        assert!(registry.contains("writer"));
        assert_eq!(registry.skills_of("researcher"), &["research".to_string()]);
    }

    #[test]
    fn test_skill_based_matches_both_workers_for_combined_task() {
        let registry = WorkerRegistry::from_value(&json!({
            "researcher": {"skills": ["research"]},
            "writer": {"skills": ["writing"]}
        }));

        let matched = registry.matching_skills("Research AI trends and write a summary");
        assert_eq!(matched, vec!["researcher".to_string(), "writer".to_string()]);
    }

    #[test]
    fn test_skill_based_no_match_returns_empty() {
        let registry = WorkerRegistry::from_value(&json!({
            "researcher": {"skills": ["research"]}
        }));

        let matched = registry.matching_skills("Bake a cake");
        assert!(matched.is_empty());
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(select_round_robin(&ids, 0), Some("a".to_string()));
        assert_eq!(select_round_robin(&ids, 1), Some("b".to_string()));
        assert_eq!(select_round_robin(&ids, 3), Some("a".to_string()));
    }

    #[test]
    fn test_round_robin_empty_registry_returns_none() {
        let ids: Vec<String> = Vec::new();
        assert_eq!(select_round_robin(&ids, 0), None);
    }

    #[test]
    fn test_rule_based_first_match_wins() {
        let rules = vec![
            RoutingRule {
                keyword: "refund".to_string(),
                worker_id: "billing".to_string(),
            },
            RoutingRule {
                keyword: "bug".to_string(),
                worker_id: "support".to_string(),
            },
        ];
        let target = select_rule_based("I need a refund for a bug", &rules, Some("fallback"));
        assert_eq!(target, Some("billing".to_string()));
    }

    #[test]
    fn test_rule_based_falls_back_to_default() {
        let rules = vec![RoutingRule {
            keyword: "refund".to_string(),
            worker_id: "billing".to_string(),
        }];
        let target = select_rule_based("unrelated task", &rules, Some("fallback"));
        assert_eq!(target, Some("fallback".to_string()));
    }

    #[test]
    fn test_load_balanced_picks_least_loaded() {
        let mut registry = WorkerRegistry::new();
        registry.register(WorkerDescriptor {
            worker_id: "a".to_string(),
            skills: vec![],
        });
        registry.register(WorkerDescriptor {
            worker_id: "b".to_string(),
            skills: vec![],
        });
        registry.increment_workload("a");
        registry.increment_workload("a");

        assert_eq!(registry.least_loaded(), Some("b".to_string()));
    }

    #[test]
    fn test_workload_increment_and_decrement() {
        let mut registry = WorkerRegistry::new();
        registry.register(WorkerDescriptor {
            worker_id: "a".to_string(),
            skills: vec![],
        });

        registry.increment_workload("a");
        registry.increment_workload("a");
        assert_eq!(registry.workload_of("a"), 2);

        registry.decrement_workload("a");
        assert_eq!(registry.workload_of("a"), 1);
    }

    #[test]
    fn test_decrement_never_goes_negative() {
        let mut registry = WorkerRegistry::new();
        registry.register(WorkerDescriptor {
            worker_id: "a".to_string(),
            skills: vec![],
        });

        registry.decrement_workload("a");
        assert_eq!(registry.workload_of("a"), 0);
    }

    #[test]
    fn test_parse_routing_decision_from_clean_json() {
        let registry = WorkerRegistry::from_value(&json!({"researcher": {"skills": []}}));
        let response = Message::ai(r#"{"target_agent": "researcher", "reasoning": "fits", "confidence": 0.9}"#);

        let (decision, used_fallback) = parse_routing_decision(&response, &registry, 0);

        assert!(!used_fallback);
        assert_eq!(decision.target_agent, Some("researcher".to_string()));
        assert_eq!(decision.confidence, 0.9);
    }

    #[test]
    fn test_parse_routing_decision_unknown_worker_falls_back_to_round_robin() {
        let registry = WorkerRegistry::from_value(&json!({"researcher": {"skills": []}, "writer": {"skills": []}}));
        let response = Message::ai(r#"{"target_agent": "nonexistent", "reasoning": "x", "confidence": 0.8}"#);

        let (decision, used_fallback) = parse_routing_decision(&response, &registry, 0);

        assert!(used_fallback);
        assert_eq!(decision.confidence, 0.0);
        assert_eq!(decision.target_agent, Some("researcher".to_string()));
    }

    #[test]
    fn test_parse_routing_decision_unparseable_falls_back() {
        let registry = WorkerRegistry::from_value(&json!({"researcher": {"skills": []}}));
        let response = Message::ai("I'm not sure who should do this.");

        let (decision, used_fallback) = parse_routing_decision(&response, &registry, 0);

        assert!(used_fallback);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_routing_decision_targets_handles_single_and_multiple() {
        let single = RoutingDecision {
            target_agent: Some("a".to_string()),
            target_agents: None,
            reasoning: String::new(),
            confidence: 1.0,
            strategy: RoutingStrategy::RoundRobin,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(single.targets(), vec!["a".to_string()]);

        let multi = RoutingDecision {
            target_agent: None,
            target_agents: Some(vec!["a".to_string(), "b".to_string()]),
            reasoning: String::new(),
            confidence: 1.0,
            strategy: RoutingStrategy::SkillBased,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(multi.targets(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_routing_strategy_serde_tags_match_expected_names() {
        assert_eq!(serde_json::to_string(&RoutingStrategy::LlmBased).unwrap(), "\"llm_based\"");
        assert_eq!(serde_json::to_string(&RoutingStrategy::RuleBased).unwrap(), "\"rule_based\"");
        assert_eq!(serde_json::to_string(&RoutingStrategy::RoundRobin).unwrap(), "\"round_robin\"");
        assert_eq!(serde_json::to_string(&RoutingStrategy::SkillBased).unwrap(), "\"skill_based\"");
        assert_eq!(serde_json::to_string(&RoutingStrategy::LoadBalanced).unwrap(), "\"load_balanced\"");
    }

    #[test]
    fn test_task_result_serialization_round_trips() {
        let result = TaskResult {
            assignment_id: "abc".to_string(),
            worker_id: "researcher".to_string(),
            success: true,
            result: Some(json!({"summary": "done"})),
            error: None,
            completed_at: chrono::Utc::now(),
            metadata: None,
        };

        let serialized = serde_json::to_string(&result).unwrap();
        let deserialized: TaskResult = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.worker_id, "researcher");
        assert!(deserialized.success);
    }
}
