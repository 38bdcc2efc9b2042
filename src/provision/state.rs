//! Per-connection provisioning state machine
//!
//! Type-safe state machine for one connection's migration under a bridge,
//! using the state-machines crate in dynamic mode so the engine can drive
//! it from command results.

use state_machines::state_machine;
use std::fmt;

state_machine! {
    name: BridgeMachine,
    dynamic: true,
    initial: Eligible,
    states: [Eligible, BridgeCreated, BridgeConfigured, MemberAttached, OriginalRetired, Done, Failed],
    events {
        create {
            transition: { from: Eligible, to: BridgeCreated }
        }
        configure {
            transition: { from: BridgeCreated, to: BridgeConfigured }
        }
        attach {
            transition: { from: BridgeConfigured, to: MemberAttached }
        }
        retire {
            transition: { from: MemberAttached, to: OriginalRetired }
        }
        finish {
            transition: { from: OriginalRetired, to: Done }
        }
        fail {
            transition: { from: [Eligible, BridgeCreated, BridgeConfigured, MemberAttached, OriginalRetired], to: Failed }
        }
    }
}

/// Simple stage enum for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Eligible,
    BridgeCreated,
    BridgeConfigured,
    MemberAttached,
    OriginalRetired,
    Done,
    Failed,
}

impl Stage {
    /// Parse stage from the machine's state name
    pub fn from_name(s: &str) -> Self {
        match s {
            "BridgeCreated" => Stage::BridgeCreated,
            "BridgeConfigured" => Stage::BridgeConfigured,
            "MemberAttached" => Stage::MemberAttached,
            "OriginalRetired" => Stage::OriginalRetired,
            "Done" => Stage::Done,
            "Failed" => Stage::Failed,
            _ => Stage::Eligible,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Eligible => "eligible",
            Stage::BridgeCreated => "bridge-created",
            Stage::BridgeConfigured => "bridge-configured",
            Stage::MemberAttached => "member-attached",
            Stage::OriginalRetired => "original-retired",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Steps the engine performs, named for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Look up the physical interface bound to the profile
    ResolveMember,
    CreateBridge,
    ConfigureBridge,
    AttachMember,
    RetireOriginal,
    PersistSysctl,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transition::ResolveMember => "resolve-member",
            Transition::CreateBridge => "create-bridge",
            Transition::ConfigureBridge => "configure-bridge",
            Transition::AttachMember => "attach-member",
            Transition::RetireOriginal => "retire-original",
            Transition::PersistSysctl => "persist-sysctl",
        };
        write!(f, "{}", s)
    }
}

/// Runtime data for one connection being migrated
pub struct ProfileRun {
    /// The state machine (dynamic mode with unit context)
    pub machine: DynamicBridgeMachine<()>,
    /// Original profile name
    pub profile: String,
    /// Physical interface, once resolved
    pub member: Option<String>,
    /// Allocated bridge name, once created
    pub bridge: Option<String>,
}

impl ProfileRun {
    pub fn new(profile: impl Into<String>) -> Self {
        let machine = BridgeMachine::new(()).into_dynamic();
        Self {
            machine,
            profile: profile.into(),
            member: None,
            bridge: None,
        }
    }

    /// Get current stage
    pub fn stage(&self) -> Stage {
        Stage::from_name(self.machine.current_state())
    }

    /// Advance after a transition's command succeeded
    pub fn advance(&mut self, transition: Transition) -> Result<(), state_machines::DynamicError> {
        let event = match transition {
            // Resolution happens while still eligible
            Transition::ResolveMember => return Ok(()),
            Transition::CreateBridge => BridgeMachineEvent::Create,
            Transition::ConfigureBridge => BridgeMachineEvent::Configure,
            Transition::AttachMember => BridgeMachineEvent::Attach,
            Transition::RetireOriginal => BridgeMachineEvent::Retire,
            Transition::PersistSysctl => BridgeMachineEvent::Finish,
        };
        self.machine.handle(event)
    }

    /// Trigger fail event
    pub fn fail(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(BridgeMachineEvent::Fail)
    }
}
