//! In-memory fakes for the provider traits (testing only)
//!
//! All fakes share a [`CallLog`] so tests can assert call counts and the
//! relative order of calls across providers (e.g. the endpoint update
//! happening before the first agent call). Status sequences are scripted
//! and failures can be injected per operation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use autodeploy_state::{ArtifactRef, EndpointRef};

use crate::backends::*;

// ---------------------------------------------------------------------------
// CallLog
// ---------------------------------------------------------------------------

/// Shared, ordered record of provider calls (`"<provider>.<operation>"`).
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of calls whose name starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Index of the first call starting with `prefix`.
    pub fn first(&self, prefix: &str) -> Option<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .position(|c| c.starts_with(prefix))
    }

    /// Index of the last call starting with `prefix`.
    pub fn last(&self, prefix: &str) -> Option<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rposition(|c| c.starts_with(prefix))
    }
}

/// One-shot failures keyed by operation name.
#[derive(Debug, Default)]
struct Failures {
    pending: Mutex<HashMap<&'static str, VecDeque<ProviderError>>>,
}

impl Failures {
    fn push(&self, op: &'static str, err: ProviderError) {
        self.pending
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(err);
    }

    fn take(&self, op: &'static str) -> ProviderResult<()> {
        match self
            .pending
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(|q| q.pop_front())
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeRegistry {
    log: CallLog,
    images: Mutex<Vec<ArtifactRef>>,
    failures: Failures,
}

impl FakeRegistry {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            images: Mutex::new(Vec::new()),
            failures: Failures::default(),
        }
    }

    pub fn with_images(self, images: Vec<ArtifactRef>) -> Self {
        *self.images.lock().unwrap() = images;
        self
    }

    pub fn push_image(&self, image: ArtifactRef) {
        self.images.lock().unwrap().push(image);
    }

    /// Fail the next `list_images` call with `err`.
    pub fn fail_next(&self, err: ProviderError) {
        self.failures.push("list_images", err);
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn list_images(&self, repository: &str) -> ProviderResult<Vec<ArtifactRef>> {
        self.log.record("registry.list_images");
        self.failures.take("list_images")?;
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.repository == repository)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FakeEndpoint
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeEndpoint {
    log: CallLog,
    target: String,
    region: String,
    current: Mutex<Option<EndpointRef>>,
    /// Statuses returned after an image change; `Ready` once exhausted.
    statuses: Mutex<VecDeque<EndpointStatus>>,
    /// Scripted `current_image` answers; falls back to `current`.
    observed: Mutex<VecDeque<Option<EndpointRef>>>,
    applied: Mutex<Vec<EndpointRef>>,
    failures: Failures,
}

impl FakeEndpoint {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            target: "arn:aws:lambda:us-east-1:123456789012:function:AgentCoreToolExecutor"
                .to_string(),
            region: "us-east-1".to_string(),
            current: Mutex::new(None),
            statuses: Mutex::new(VecDeque::new()),
            observed: Mutex::new(VecDeque::new()),
            applied: Mutex::new(Vec::new()),
            failures: Failures::default(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Reference this endpoint would hold after applying `artifact`.
    pub fn reference_for(&self, artifact: &ArtifactRef) -> EndpointRef {
        EndpointRef {
            target: self.target.clone(),
            image_uri: artifact.image_uri(&self.region),
            digest: artifact.digest.clone(),
        }
    }

    pub fn set_current(&self, current: Option<EndpointRef>) {
        *self.current.lock().unwrap() = current;
    }

    pub fn script_statuses(&self, statuses: Vec<EndpointStatus>) {
        *self.statuses.lock().unwrap() = statuses.into();
    }

    /// Script what `current_image` reports, one entry per call.
    pub fn script_observed(&self, observed: Vec<Option<EndpointRef>>) {
        *self.observed.lock().unwrap() = observed.into();
    }

    /// References applied so far, oldest first.
    pub fn applied(&self) -> Vec<EndpointRef> {
        self.applied.lock().unwrap().clone()
    }

    pub fn fail_next_apply(&self, err: ProviderError) {
        self.failures.push("apply_image", err);
    }

    pub fn fail_next_current(&self, err: ProviderError) {
        self.failures.push("current_image", err);
    }
}

#[async_trait]
impl ToolEndpoint for FakeEndpoint {
    async fn apply_image(&self, artifact: &ArtifactRef) -> ProviderResult<EndpointRef> {
        self.log.record("endpoint.apply_image");
        self.failures.take("apply_image")?;
        let reference = self.reference_for(artifact);
        *self.current.lock().unwrap() = Some(reference.clone());
        self.applied.lock().unwrap().push(reference.clone());
        Ok(reference)
    }

    async fn status(&self) -> ProviderResult<EndpointStatus> {
        self.log.record("endpoint.status");
        self.failures.take("status")?;
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(EndpointStatus::Ready))
    }

    async fn current_image(&self) -> ProviderResult<Option<EndpointRef>> {
        self.log.record("endpoint.current_image");
        self.failures.take("current_image")?;
        if let Some(next) = self.observed.lock().unwrap().pop_front() {
            return Ok(next);
        }
        Ok(self.current.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// FakeAgentApi
// ---------------------------------------------------------------------------

/// How preparation ends for agents of a [`FakeAgentApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Prepared,
    Failed(String),
    /// Stays `Preparing` forever.
    Never,
}

#[derive(Debug, Clone)]
struct FakeAgent {
    id: AgentId,
    name: String,
    status: AgentStatus,
    /// `get_status` calls left before a transitional status resolves.
    polls_left: u32,
    action_groups: Vec<ActionGroupSpec>,
}

#[derive(Debug)]
struct AgentScript {
    creating_polls: u32,
    preparing_polls: u32,
    prepare_outcome: PrepareOutcome,
    schema_rejection: Option<String>,
    lookup_misses: u32,
}

impl Default for AgentScript {
    fn default() -> Self {
        Self {
            creating_polls: 1,
            preparing_polls: 2,
            prepare_outcome: PrepareOutcome::Prepared,
            schema_rejection: None,
            lookup_misses: 0,
        }
    }
}

/// Agent-management API that keeps agents in memory and walks them through
/// `Creating -> NotPrepared -> Preparing -> Prepared` as they are polled.
#[derive(Debug)]
pub struct FakeAgentApi {
    log: CallLog,
    agents: Mutex<Vec<FakeAgent>>,
    script: Mutex<AgentScript>,
    next_id: AtomicU64,
    failures: Failures,
}

impl FakeAgentApi {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            agents: Mutex::new(Vec::new()),
            script: Mutex::new(AgentScript::default()),
            next_id: AtomicU64::new(1),
            failures: Failures::default(),
        }
    }

    /// `get_status` calls that still report `Creating` after creation.
    pub fn with_creating_polls(self, polls: u32) -> Self {
        self.script.lock().unwrap().creating_polls = polls;
        self
    }

    /// `get_status` calls that still report `Preparing` after `prepare`.
    pub fn with_preparing_polls(self, polls: u32) -> Self {
        self.script.lock().unwrap().preparing_polls = polls;
        self
    }

    pub fn with_prepare_outcome(self, outcome: PrepareOutcome) -> Self {
        self.script.lock().unwrap().prepare_outcome = outcome;
        self
    }

    /// Reject every action group with a validation error.
    pub fn rejecting_schema(self, message: impl Into<String>) -> Self {
        self.script.lock().unwrap().schema_rejection = Some(message.into());
        self
    }

    /// Make the next `misses` name lookups return nothing, as if the
    /// listing had not caught up with a creation yet.
    pub fn with_lookup_misses(self, misses: u32) -> Self {
        self.script.lock().unwrap().lookup_misses = misses;
        self
    }

    /// Fail the next call of `op` (`create_agent`, `find_agent_by_name`,
    /// `get_status`, `list_action_groups`, `attach_action_group`, `prepare`).
    pub fn fail_next(&self, op: &'static str, err: ProviderError) {
        self.failures.push(op, err);
    }

    /// Insert an existing agent, as left behind by an earlier run.
    pub fn seed_agent(
        &self,
        name: &str,
        status: AgentStatus,
        action_groups: Vec<ActionGroupSpec>,
    ) -> AgentId {
        let id = self.allocate_id();
        let polls_left = match status {
            AgentStatus::Creating => self.script.lock().unwrap().creating_polls,
            AgentStatus::Preparing => self.script.lock().unwrap().preparing_polls,
            _ => 0,
        };
        self.agents.lock().unwrap().push(FakeAgent {
            id: id.clone(),
            name: name.to_string(),
            status,
            polls_left,
            action_groups,
        });
        id
    }

    pub fn agents(&self) -> Vec<AgentSummary> {
        self.agents
            .lock()
            .unwrap()
            .iter()
            .map(|a| AgentSummary {
                id: a.id.clone(),
                name: a.name.clone(),
                status: a.status.clone(),
            })
            .collect()
    }

    pub fn agents_named(&self, name: &str) -> usize {
        self.agents
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.name == name)
            .count()
    }

    pub fn action_groups(&self, agent_id: &AgentId) -> Vec<ActionGroupSpec> {
        self.agents
            .lock()
            .unwrap()
            .iter()
            .find(|a| &a.id == agent_id)
            .map(|a| a.action_groups.clone())
            .unwrap_or_default()
    }

    fn allocate_id(&self) -> AgentId {
        AgentId(format!(
            "AGENT{:05}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ))
    }

    fn with_agent<T>(
        &self,
        agent_id: &AgentId,
        f: impl FnOnce(&mut FakeAgent) -> ProviderResult<T>,
    ) -> ProviderResult<T> {
        let mut agents = self.agents.lock().unwrap();
        let agent = agents
            .iter_mut()
            .find(|a| &a.id == agent_id)
            .ok_or_else(|| ProviderError::not_found(format!("agent {} not found", agent_id)))?;
        f(agent)
    }
}

#[async_trait]
impl AgentApi for FakeAgentApi {
    async fn create_agent(&self, draft: &AgentDraft) -> ProviderResult<AgentId> {
        self.log.record("agent.create_agent");
        self.failures.take("create_agent")?;

        if self.agents.lock().unwrap().iter().any(|a| a.name == draft.name) {
            return Err(ProviderError::conflict(format!(
                "agent name {} already exists",
                draft.name
            )));
        }
        let creating_polls = self.script.lock().unwrap().creating_polls;
        let id = self.allocate_id();
        self.agents.lock().unwrap().push(FakeAgent {
            id: id.clone(),
            name: draft.name.clone(),
            status: AgentStatus::Creating,
            polls_left: creating_polls,
            action_groups: Vec::new(),
        });
        Ok(id)
    }

    async fn find_agent_by_name(&self, name: &str) -> ProviderResult<Option<AgentSummary>> {
        self.log.record("agent.find_agent_by_name");
        self.failures.take("find_agent_by_name")?;
        {
            let mut script = self.script.lock().unwrap();
            if script.lookup_misses > 0 {
                script.lookup_misses -= 1;
                return Ok(None);
            }
        }
        Ok(self
            .agents
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.name == name)
            .map(|a| AgentSummary {
                id: a.id.clone(),
                name: a.name.clone(),
                status: a.status.clone(),
            }))
    }

    async fn get_status(&self, agent_id: &AgentId) -> ProviderResult<AgentStatus> {
        self.log.record("agent.get_status");
        self.failures.take("get_status")?;
        let outcome = self.script.lock().unwrap().prepare_outcome.clone();
        self.with_agent(agent_id, |agent| {
            if agent.status.is_transitional() {
                if agent.polls_left > 0 {
                    agent.polls_left -= 1;
                    return Ok(agent.status.clone());
                }
                agent.status = match (&agent.status, &outcome) {
                    (AgentStatus::Preparing, PrepareOutcome::Prepared) => AgentStatus::Prepared,
                    (AgentStatus::Preparing, PrepareOutcome::Failed(reason)) => {
                        AgentStatus::Failed(reason.clone())
                    }
                    (AgentStatus::Preparing, PrepareOutcome::Never) => AgentStatus::Preparing,
                    _ => AgentStatus::NotPrepared,
                };
            }
            Ok(agent.status.clone())
        })
    }

    async fn list_action_groups(&self, agent_id: &AgentId) -> ProviderResult<Vec<String>> {
        self.log.record("agent.list_action_groups");
        self.failures.take("list_action_groups")?;
        self.with_agent(agent_id, |agent| {
            Ok(agent.action_groups.iter().map(|g| g.name.clone()).collect())
        })
    }

    async fn attach_action_group(
        &self,
        agent_id: &AgentId,
        spec: &ActionGroupSpec,
    ) -> ProviderResult<()> {
        self.log.record("agent.attach_action_group");
        self.failures.take("attach_action_group")?;
        if let Some(message) = self.script.lock().unwrap().schema_rejection.clone() {
            return Err(ProviderError::validation(message));
        }
        self.with_agent(agent_id, |agent| {
            if agent.status == AgentStatus::Creating {
                return Err(ProviderError::validation("agent is still being created"));
            }
            if agent.action_groups.iter().any(|g| g.name == spec.name) {
                return Err(ProviderError::conflict(format!(
                    "action group {} already exists",
                    spec.name
                )));
            }
            agent.action_groups.push(spec.clone());
            Ok(())
        })
    }

    async fn prepare(&self, agent_id: &AgentId) -> ProviderResult<()> {
        self.log.record("agent.prepare");
        self.failures.take("prepare")?;
        let preparing_polls = self.script.lock().unwrap().preparing_polls;
        self.with_agent(agent_id, |agent| match agent.status {
            AgentStatus::Creating => Err(ProviderError::conflict("agent is still being created")),
            AgentStatus::Preparing => Ok(()),
            _ => {
                agent.status = AgentStatus::Preparing;
                agent.polls_left = preparing_polls;
                Ok(())
            }
        })
    }
}

// ---------------------------------------------------------------------------
// FakeBuildRunner
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeBuildRunner {
    log: CallLog,
    project: String,
    /// Statuses reported per poll; the last one repeats.
    statuses: Mutex<VecDeque<BuildStatus>>,
    started: Mutex<Vec<BuildId>>,
    failures: Failures,
}

impl FakeBuildRunner {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            project: "agent-core-builder".to_string(),
            statuses: Mutex::new(VecDeque::from(vec![BuildStatus::Succeeded])),
            started: Mutex::new(Vec::new()),
            failures: Failures::default(),
        }
    }

    pub fn with_statuses(self, statuses: Vec<BuildStatus>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub fn started(&self) -> Vec<BuildId> {
        self.started.lock().unwrap().clone()
    }

    pub fn fail_next_start(&self, err: ProviderError) {
        self.failures.push("start_build", err);
    }
}

#[async_trait]
impl BuildRunner for FakeBuildRunner {
    async fn start_build(&self) -> ProviderResult<BuildId> {
        self.log.record("build.start_build");
        self.failures.take("start_build")?;
        let mut started = self.started.lock().unwrap();
        let id = BuildId(format!("{}:{:04}", self.project, started.len() + 1));
        started.push(id.clone());
        Ok(id)
    }

    async fn build_status(&self, build_id: &BuildId) -> ProviderResult<BuildStatus> {
        self.log.record("build.build_status");
        self.failures.take("build_status")?;
        if !self.started.lock().unwrap().contains(build_id) {
            return Err(ProviderError::not_found(format!("build {} not found", build_id)));
        }
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        Ok(status.unwrap_or(BuildStatus::InProgress))
    }
}
