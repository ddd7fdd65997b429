//! Agent provisioning state machine.
//!
//! ```text
//! Pending --create_agent--> Created --attach_action_group--> ActionGroupAttached
//!         --prepare--> Prepared --mark_ready--> Ready
//! ```
//!
//! with `Failed` reachable from every non-terminal state. Each call to
//! [`ProvisioningMachine::step`] performs exactly one transition so the
//! caller can persist progress in between.
//!
//! Creation is the only non-idempotent provider call. When it reports a
//! name conflict (or fails transiently and the agent turns out to exist)
//! the machine adopts the existing agent and resumes from the state its
//! provider status implies, instead of creating a second one.

use std::fmt;

use autodeploy_state::DeploymentState;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backends::{
    ActionGroupSpec, AgentApi, AgentDraft, AgentId, AgentStatus, ProviderError, ProviderErrorKind,
};
use crate::config::Policies;
use crate::domain::DeployError;
use crate::retry::{poll_until, retry_transient, PollError, PollStatus};

pub const CREATE_AGENT: &str = "create_agent";
pub const ATTACH_ACTION_GROUP: &str = "attach_action_group";
pub const PREPARE: &str = "prepare";
pub const MARK_READY: &str = "mark_ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    Pending,
    Created,
    ActionGroupAttached,
    Prepared,
    Ready,
    Failed,
}

impl ProvisioningState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProvisioningState::Ready | ProvisioningState::Failed)
    }

    /// Deployment record state this provisioning state corresponds to.
    /// `Pending` has none; the record stays where the orchestrator left it.
    pub fn deployment_state(self) -> Option<DeploymentState> {
        match self {
            ProvisioningState::Pending => None,
            ProvisioningState::Created => Some(DeploymentState::Created),
            ProvisioningState::ActionGroupAttached => Some(DeploymentState::ActionGroupAttached),
            ProvisioningState::Prepared => Some(DeploymentState::Prepared),
            ProvisioningState::Ready => Some(DeploymentState::Ready),
            ProvisioningState::Failed => Some(DeploymentState::Failed),
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisioningState::Pending => "pending",
            ProvisioningState::Created => "created",
            ProvisioningState::ActionGroupAttached => "action_group_attached",
            ProvisioningState::Prepared => "prepared",
            ProvisioningState::Ready => "ready",
            ProvisioningState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub name: &'static str,
    pub from: ProvisioningState,
    pub to: ProvisioningState,
    /// The step adopted an agent created by an earlier delivery.
    pub adopted: bool,
}

pub struct ProvisioningMachine<'a> {
    api: &'a dyn AgentApi,
    policies: &'a Policies,
    draft: AgentDraft,
    action_group: ActionGroupSpec,
    state: ProvisioningState,
    agent_id: Option<AgentId>,
    prepare_issued: bool,
    adopted: bool,
    failed_transition: Option<&'static str>,
}

impl<'a> ProvisioningMachine<'a> {
    pub fn new(
        api: &'a dyn AgentApi,
        policies: &'a Policies,
        draft: AgentDraft,
        action_group: ActionGroupSpec,
    ) -> Self {
        Self {
            api,
            policies,
            draft,
            action_group,
            state: ProvisioningState::Pending,
            agent_id: None,
            prepare_issued: false,
            adopted: false,
            failed_transition: None,
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    pub fn agent_id(&self) -> Option<&AgentId> {
        self.agent_id.as_ref()
    }

    pub fn adopted(&self) -> bool {
        self.adopted
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Transition that failed, once the machine is `Failed`.
    pub fn failed_transition(&self) -> Option<&'static str> {
        self.failed_transition
    }

    /// Name of the transition the next `step` performs.
    pub fn next_transition(&self) -> Option<&'static str> {
        match self.state {
            ProvisioningState::Pending => Some(CREATE_AGENT),
            ProvisioningState::Created => Some(ATTACH_ACTION_GROUP),
            ProvisioningState::ActionGroupAttached => Some(PREPARE),
            ProvisioningState::Prepared => Some(MARK_READY),
            ProvisioningState::Ready | ProvisioningState::Failed => None,
        }
    }

    /// Perform one transition. Returns `Ok(None)` once terminal.
    ///
    /// On error the machine is `Failed` and the error names the failure
    /// class; [`failed_transition`](Self::failed_transition) names the step.
    pub async fn step(&mut self) -> Result<Option<Transition>, DeployError> {
        let Some(name) = self.next_transition() else {
            return Ok(None);
        };
        let from = self.state;

        let result = match from {
            ProvisioningState::Pending => self.create_agent().await,
            ProvisioningState::Created => self.attach_action_group().await,
            ProvisioningState::ActionGroupAttached => self.prepare().await,
            ProvisioningState::Prepared => Ok(ProvisioningState::Ready),
            ProvisioningState::Ready | ProvisioningState::Failed => return Ok(None),
        };

        match result {
            Ok(to) => {
                self.state = to;
                debug!(transition = name, %from, %to, "provisioning step complete");
                Ok(Some(Transition {
                    name,
                    from,
                    to,
                    adopted: name == CREATE_AGENT && self.adopted,
                }))
            }
            Err(err) => {
                warn!(transition = name, %from, error = %err, "provisioning step failed");
                self.state = ProvisioningState::Failed;
                self.failed_transition = Some(name);
                Err(err)
            }
        }
    }

    /// Step until terminal. Returns the final state.
    pub async fn run_to_completion(&mut self) -> Result<ProvisioningState, DeployError> {
        while self.step().await?.is_some() {}
        Ok(self.state)
    }

    // ---------------------------------------------------------------------
    // transitions
    // ---------------------------------------------------------------------

    async fn create_agent(&mut self) -> Result<ProvisioningState, DeployError> {
        match self.api.create_agent(&self.draft).await {
            Ok(id) => {
                info!(agent_id = %id, agent_name = %self.draft.name, "agent created");
                self.agent_id = Some(id);
                Ok(ProvisioningState::Created)
            }
            Err(err) if err.kind == ProviderErrorKind::Conflict => {
                info!(agent_name = %self.draft.name, "agent name taken, adopting existing agent");
                self.adopt(err, true).await
            }
            // The request may have landed; look before giving up.
            Err(err) if err.is_transient() => self.adopt(err, false).await,
            Err(err) => Err(api_error(CREATE_AGENT, &err)),
        }
    }

    /// Find the agent that owns our name and resume from its status.
    ///
    /// After a conflict the agent must exist, so lookups are retried for the
    /// listing's consistency window. After a transient create failure a
    /// single lookup decides.
    async fn adopt(
        &mut self,
        cause: ProviderError,
        conflict: bool,
    ) -> Result<ProvisioningState, DeployError> {
        let api = self.api;
        let name = self.draft.name.clone();

        let found = if conflict {
            let lookup = poll_until(&self.policies.adopt, "agent lookup", || {
                let name = name.clone();
                async move {
                    Ok(match api.find_agent_by_name(&name).await? {
                        Some(summary) => PollStatus::Done(summary),
                        None => PollStatus::Pending("not listed yet".to_string()),
                    })
                }
            })
            .await;
            match lookup {
                Ok(summary) => Some(summary),
                Err(PollError::TimedOut { waited_ms, .. }) => {
                    return Err(DeployError::ProvisioningApi {
                        transition: CREATE_AGENT.to_string(),
                        message: format!(
                            "{}; agent {} not found after {}ms",
                            cause, name, waited_ms
                        ),
                    })
                }
                Err(PollError::Fatal(err)) => return Err(api_error(CREATE_AGENT, &err)),
            }
        } else {
            retry_transient(&self.policies.adopt, "agent lookup", || {
                api.find_agent_by_name(&name)
            })
            .await
            .map_err(|err| api_error(CREATE_AGENT, &err))?
        };

        let Some(summary) = found else {
            return Err(api_error(CREATE_AGENT, &cause));
        };

        self.adopted = true;
        self.agent_id = Some(summary.id.clone());
        info!(agent_id = %summary.id, status = %summary.status, "adopted existing agent");

        let mut status = summary.status;
        if matches!(status, AgentStatus::Creating | AgentStatus::Updating) {
            status = self.wait_until_settled(CREATE_AGENT).await?;
        }

        match status {
            AgentStatus::NotPrepared => {
                if self.has_action_group().await? {
                    Ok(ProvisioningState::ActionGroupAttached)
                } else {
                    Ok(ProvisioningState::Created)
                }
            }
            AgentStatus::Preparing => {
                self.prepare_issued = true;
                Ok(ProvisioningState::ActionGroupAttached)
            }
            AgentStatus::Prepared => Ok(ProvisioningState::Prepared),
            AgentStatus::Failed(reason) => Err(DeployError::ProvisioningApi {
                transition: CREATE_AGENT.to_string(),
                message: format!("adopted agent is in a failed state: {}", reason),
            }),
            AgentStatus::Creating | AgentStatus::Updating => Ok(ProvisioningState::Created),
        }
    }

    async fn attach_action_group(&mut self) -> Result<ProvisioningState, DeployError> {
        let agent_id = self.require_agent(ATTACH_ACTION_GROUP)?;

        if let AgentStatus::Failed(reason) = self.wait_until_settled(ATTACH_ACTION_GROUP).await? {
            return Err(DeployError::ProvisioningApi {
                transition: ATTACH_ACTION_GROUP.to_string(),
                message: format!("agent failed before action group attach: {}", reason),
            });
        }

        match self
            .api
            .attach_action_group(&agent_id, &self.action_group)
            .await
        {
            Ok(()) => {
                info!(
                    agent_id = %agent_id,
                    action_group = %self.action_group.name,
                    tools = self.action_group.schema.len(),
                    "action group attached"
                );
                Ok(ProvisioningState::ActionGroupAttached)
            }
            Err(err) if err.kind == ProviderErrorKind::Validation => {
                Err(DeployError::SchemaRejected(err.message))
            }
            Err(err) if err.kind == ProviderErrorKind::Conflict => {
                if self.has_action_group().await? {
                    info!(agent_id = %agent_id, "action group already attached");
                    Ok(ProvisioningState::ActionGroupAttached)
                } else {
                    Err(api_error(ATTACH_ACTION_GROUP, &err))
                }
            }
            Err(err) => Err(api_error(ATTACH_ACTION_GROUP, &err)),
        }
    }

    async fn prepare(&mut self) -> Result<ProvisioningState, DeployError> {
        let agent_id = self.require_agent(PREPARE)?;

        if !self.prepare_issued {
            match self.api.prepare(&agent_id).await {
                Ok(()) => {}
                // Already preparing; keep waiting on the run in flight.
                Err(err) if err.kind == ProviderErrorKind::Conflict => {
                    debug!(agent_id = %agent_id, error = %err, "prepare already in progress");
                }
                Err(err) => return Err(api_error(PREPARE, &err)),
            }
            self.prepare_issued = true;
        }

        let api = self.api;
        let id = agent_id.clone();
        let waited = poll_until(&self.policies.preparation, "agent preparation", || {
            let id = id.clone();
            async move {
                match api.get_status(&id).await? {
                    AgentStatus::Prepared => Ok(PollStatus::Done(())),
                    AgentStatus::Failed(reason) => Err(ProviderError::fatal(format!(
                        "preparation failed: {}",
                        reason
                    ))),
                    other => Ok(PollStatus::Pending(other.to_string())),
                }
            }
        })
        .await;

        match waited {
            Ok(()) => {
                info!(agent_id = %agent_id, "agent prepared");
                Ok(ProvisioningState::Prepared)
            }
            Err(PollError::TimedOut { waited_ms, .. }) => Err(DeployError::PreparationTimeout {
                agent_id: agent_id.0,
                waited_ms,
            }),
            Err(PollError::Fatal(err)) => Err(api_error(PREPARE, &err)),
        }
    }

    // ---------------------------------------------------------------------
    // helpers
    // ---------------------------------------------------------------------

    fn require_agent(&self, transition: &'static str) -> Result<AgentId, DeployError> {
        self.agent_id
            .clone()
            .ok_or_else(|| DeployError::ProvisioningApi {
                transition: transition.to_string(),
                message: "no agent id".to_string(),
            })
    }

    /// Poll until the agent leaves `Creating` / `Updating`.
    async fn wait_until_settled(
        &self,
        transition: &'static str,
    ) -> Result<AgentStatus, DeployError> {
        let agent_id = self.require_agent(transition)?;
        let api = self.api;
        let id = agent_id.clone();
        let settled = poll_until(&self.policies.agent_settle, "agent settle", || {
            let id = id.clone();
            async move {
                let status = api.get_status(&id).await?;
                Ok(match status {
                    AgentStatus::Creating | AgentStatus::Updating => {
                        PollStatus::Pending(status.to_string())
                    }
                    settled => PollStatus::Done(settled),
                })
            }
        })
        .await;

        match settled {
            Ok(status) => Ok(status),
            Err(PollError::TimedOut {
                waited_ms,
                last_status,
                ..
            }) => Err(DeployError::ProvisioningApi {
                transition: transition.to_string(),
                message: format!(
                    "agent {} still {} after {}ms",
                    agent_id,
                    last_status.unwrap_or_else(|| "unavailable".to_string()),
                    waited_ms
                ),
            }),
            Err(PollError::Fatal(err)) => Err(api_error(transition, &err)),
        }
    }

    async fn has_action_group(&self) -> Result<bool, DeployError> {
        let agent_id = self.require_agent(ATTACH_ACTION_GROUP)?;
        let groups = retry_transient(&self.policies.agent_settle, "action group listing", || {
            self.api.list_action_groups(&agent_id)
        })
        .await
        .map_err(|err| api_error(ATTACH_ACTION_GROUP, &err))?;
        Ok(groups.iter().any(|g| g == &self.action_group.name))
    }
}

fn api_error(transition: &str, err: &ProviderError) -> DeployError {
    DeployError::ProvisioningApi {
        transition: transition.to_string(),
        message: err.to_string(),
    }
}
