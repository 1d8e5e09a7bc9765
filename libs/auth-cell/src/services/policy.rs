//! Role and ownership checks for every protected operation, evaluated in
//! one place instead of per endpoint.

use std::fmt;

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use shared_models::auth::{AuthContext, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    PublishSlot,
    DeleteSlot,
    SetOnlineStatus,
    BookAppointment,
    ViewAppointment,
    ConfirmAppointment,
    CancelAppointment,
    CompleteAppointment,
    JoinVideo,
    ManageReminder,
    CheckSymptoms,
}

impl Operation {
    /// Role required for the operation; `None` means either role.
    pub fn required_role(&self) -> Option<Role> {
        match self {
            Operation::PublishSlot
            | Operation::DeleteSlot
            | Operation::SetOnlineStatus
            | Operation::ConfirmAppointment
            | Operation::CompleteAppointment => Some(Role::Doctor),
            Operation::BookAppointment | Operation::ManageReminder | Operation::CheckSymptoms => {
                Some(Role::Patient)
            }
            Operation::ViewAppointment | Operation::CancelAppointment | Operation::JoinVideo => None,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Operation::PublishSlot => "publish availability slots",
            Operation::DeleteSlot => "delete availability slots",
            Operation::SetOnlineStatus => "change online status",
            Operation::BookAppointment => "book appointments",
            Operation::ViewAppointment => "view this appointment",
            Operation::ConfirmAppointment => "confirm appointments",
            Operation::CancelAppointment => "cancel this appointment",
            Operation::CompleteAppointment => "complete appointments",
            Operation::JoinVideo => "join this video session",
            Operation::ManageReminder => "manage medication reminders",
            Operation::CheckSymptoms => "use the symptom checker",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Who owns the resource an operation targets. A `None` side places no
/// constraint on callers of that role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceOwner {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
}

impl ResourceOwner {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn patient(patient_id: Uuid) -> Self {
        Self {
            patient_id: Some(patient_id),
            doctor_id: None,
        }
    }

    pub fn doctor(doctor_id: Uuid) -> Self {
        Self {
            patient_id: None,
            doctor_id: Some(doctor_id),
        }
    }

    pub fn shared(patient_id: Uuid, doctor_id: Uuid) -> Self {
        Self {
            patient_id: Some(patient_id),
            doctor_id: Some(doctor_id),
        }
    }

    fn owner_for(&self, role: Role) -> Option<Uuid> {
        match role {
            Role::Patient => self.patient_id,
            Role::Doctor => self.doctor_id,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{role} accounts cannot {operation}")]
    RoleNotPermitted { role: Role, operation: Operation },

    #[error("Not permitted to {operation}: resource belongs to another user")]
    NotOwner { operation: Operation },
}

pub struct AccessPolicy;

impl AccessPolicy {
    pub fn authorize(ctx: &AuthContext, operation: Operation, owner: ResourceOwner) -> Result<(), PolicyError> {
        if let Some(required) = operation.required_role() {
            if ctx.role != required {
                warn!("User {} ({}) denied: {}", ctx.user_id, ctx.role, operation);
                return Err(PolicyError::RoleNotPermitted {
                    role: ctx.role,
                    operation,
                });
            }
        }

        match owner.owner_for(ctx.role) {
            Some(owner_id) if owner_id != ctx.user_id => {
                warn!("User {} denied on foreign resource: {}", ctx.user_id, operation);
                Err(PolicyError::NotOwner { operation })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn patient() -> AuthContext {
        AuthContext::new(Uuid::new_v4(), Role::Patient)
    }

    fn doctor() -> AuthContext {
        AuthContext::new(Uuid::new_v4(), Role::Doctor)
    }

    #[test]
    fn patient_cannot_confirm() {
        let p = patient();
        let d = doctor();
        let owner = ResourceOwner::shared(p.user_id, d.user_id);

        assert_matches!(
            AccessPolicy::authorize(&p, Operation::ConfirmAppointment, owner),
            Err(PolicyError::RoleNotPermitted { role: Role::Patient, .. })
        );
        assert!(AccessPolicy::authorize(&d, Operation::ConfirmAppointment, owner).is_ok());
    }

    #[test]
    fn either_participant_may_cancel() {
        let p = patient();
        let d = doctor();
        let owner = ResourceOwner::shared(p.user_id, d.user_id);

        assert!(AccessPolicy::authorize(&p, Operation::CancelAppointment, owner).is_ok());
        assert!(AccessPolicy::authorize(&d, Operation::CancelAppointment, owner).is_ok());
    }

    #[test]
    fn outsiders_are_rejected() {
        let p = patient();
        let d = doctor();
        let owner = ResourceOwner::shared(p.user_id, d.user_id);

        assert_matches!(
            AccessPolicy::authorize(&patient(), Operation::ViewAppointment, owner),
            Err(PolicyError::NotOwner { .. })
        );
        assert_matches!(
            AccessPolicy::authorize(&doctor(), Operation::CompleteAppointment, owner),
            Err(PolicyError::NotOwner { .. })
        );
    }

    #[test]
    fn doctors_cannot_book_or_keep_reminders() {
        let d = doctor();
        assert!(AccessPolicy::authorize(&d, Operation::BookAppointment, ResourceOwner::none()).is_err());
        assert!(AccessPolicy::authorize(&d, Operation::ManageReminder, ResourceOwner::none()).is_err());
        assert!(AccessPolicy::authorize(&d, Operation::PublishSlot, ResourceOwner::doctor(d.user_id)).is_ok());
    }
}
