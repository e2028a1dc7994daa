//! Installation state machine.
//!
//! Pure functions from (current state, trigger) to the next state. Callers
//! persist the result; nothing here touches storage or the network.
//!
//! The remote inventory is authoritative, so sync and action triggers are
//! total. Only entering `installing` is validated.

use thiserror::Error;
use wphub_connector::ConnectorAction;
use wphub_types::{Installation, InstallationStatus};

/// The mutable part of an installation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationState {
    pub status: InstallationStatus,
    pub installed_version: Option<String>,
    pub is_active: bool,
    pub is_enabled: bool,
}

impl InstallationState {
    /// State of an entity with no installation row yet.
    pub fn absent(is_enabled: bool) -> Self {
        Self {
            status: absent_status(is_enabled),
            installed_version: None,
            is_active: false,
            is_enabled,
        }
    }

    pub fn of(inst: &Installation) -> Self {
        Self {
            status: inst.status,
            installed_version: inst.installed_version.clone(),
            is_active: inst.is_active,
            is_enabled: inst.is_enabled,
        }
    }

    pub fn is_present(&self) -> bool {
        self.installed_version.is_some()
    }

    /// True for a row with no installed version whose status or activity
    /// flag still claims otherwise: `error`, `installing`, or an `active` /
    /// `inactive` status left without a version.
    pub fn is_unsettled_absent(&self) -> bool {
        !self.is_present() && (self.status != absent_status(self.is_enabled) || self.is_active)
    }

    /// True when `self` and `other` differ in anything a sync report decides.
    pub fn differs_from(&self, other: &InstallationState) -> bool {
        self.status != other.status
            || self.installed_version != other.installed_version
            || self.is_active != other.is_active
            || self.is_enabled != other.is_enabled
    }

    /// Copies this state onto an existing row, leaving identity and
    /// bookkeeping fields alone.
    pub fn write_into(&self, inst: &mut Installation) {
        inst.status = self.status;
        inst.installed_version = self.installed_version.clone();
        inst.is_active = self.is_active;
        inst.is_enabled = self.is_enabled;
    }
}

/// Events that move an installation between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The site's report lists the entity.
    SyncPresent { version: String, is_active: bool },
    /// The site's report does not list the entity.
    SyncAbsent,
    /// The connector acknowledged an action with `success: true`.
    /// `version` is the version the connector (or its inventory) reported.
    ActionSucceeded {
        action: ConnectorAction,
        version: Option<String>,
    },
    /// The connector acknowledged an action with `success: false`.
    ActionFailed,
    /// An install request is about to be sent.
    InstallStarted,
    /// The administrator opted the entity in or out for the site.
    SetEnabled(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot start install: already installed (status {status})")]
    AlreadyInstalled { status: InstallationStatus },
}

/// Computes the state that follows `trigger`.
pub fn transition(
    current: &InstallationState,
    trigger: &Trigger,
) -> Result<InstallationState, TransitionError> {
    let mut next = current.clone();

    match trigger {
        Trigger::SyncPresent { version, is_active } => {
            next.status = active_status(*is_active);
            next.installed_version = Some(version.clone());
            next.is_active = *is_active;
        }
        Trigger::SyncAbsent => {
            next.status = absent_status(current.is_enabled);
            next.installed_version = None;
            next.is_active = false;
        }
        Trigger::ActionSucceeded { action, version } => match action {
            ConnectorAction::Install | ConnectorAction::Activate | ConnectorAction::Deactivate => {
                let is_active = *action != ConnectorAction::Deactivate;
                match version.clone().or_else(|| current.installed_version.clone()) {
                    Some(version) => {
                        next.status = active_status(is_active);
                        next.installed_version = Some(version);
                        next.is_active = is_active;
                    }
                    // presence is unknown without a version; the caller
                    // re-reads the site's inventory
                    None => {
                        next.status = absent_status(current.is_enabled);
                        next.installed_version = None;
                        next.is_active = false;
                    }
                }
            }
            ConnectorAction::Uninstall => {
                next.status = InstallationStatus::Available;
                next.installed_version = None;
                next.is_active = false;
                next.is_enabled = true;
            }
        },
        Trigger::ActionFailed => {
            next.status = InstallationStatus::Error;
            next.installed_version = None;
            next.is_active = false;
        }
        Trigger::InstallStarted => {
            if current.is_present() {
                return Err(TransitionError::AlreadyInstalled {
                    status: current.status,
                });
            }
            next.status = InstallationStatus::Installing;
        }
        Trigger::SetEnabled(enabled) => {
            next.is_enabled = *enabled;
            // in-flight installs keep their marker
            if !current.is_present() && current.status != InstallationStatus::Installing {
                next.status = absent_status(*enabled);
            }
        }
    }

    Ok(next)
}

fn active_status(is_active: bool) -> InstallationStatus {
    if is_active {
        InstallationStatus::Active
    } else {
        InstallationStatus::Inactive
    }
}

fn absent_status(is_enabled: bool) -> InstallationStatus {
    if is_enabled {
        InstallationStatus::Available
    } else {
        InstallationStatus::Unavailable
    }
}
