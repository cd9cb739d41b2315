//! State transition rules for merchants and employees.
//!
//! Pure functions: they take the current state and the requested change and
//! return the next state or a validation error. Every workflow write goes
//! through these, so they are the only place legality is decided.

use super::employee::EmployeeStatus;
use super::merchant::{MerchantStatus, MerchantType, UpgradeStatus};
use crate::error::{MerchantError, Result};

pub const ERR_UPGRADE_ALREADY_ACTIVE: &str = "merchant upgrade already active";
pub const ERR_UPGRADE_ALREADY_PENDING: &str = "merchant already has a pending upgrade request";
pub const ERR_NO_UPGRADE_REQUEST: &str = "merchant does not have upgrade request";
pub const ERR_NOTHING_TO_CLEAR: &str = "merchant has no rejected upgrade to clear";
pub const ERR_UPGRADE_STILL_PENDING: &str = "merchant upgrade request is still pending";
pub const ERR_REGISTRATION_APPROVED: &str = "merchant registration already approved";
pub const ERR_INVALID_UPGRADE_TARGET: &str = "merchant type is not an upgrade tier";

/// Status pair for a merchant being created.
///
/// Without an explicit status the merchant starts as `New` and the activation
/// flag then decides, exactly as an update from `New` would.
pub fn creation_status(requested: Option<MerchantStatus>, is_active: bool) -> (MerchantStatus, bool) {
    match requested {
        None => update_status(MerchantStatus::New, None, is_active),
        Some(status) => (status, status == MerchantStatus::Active),
    }
}

/// Status pair for an existing merchant.
///
/// A requested status of `New` (or none) means "derive from `is_active`":
/// active when the flag is set, otherwise the old status, downgraded to
/// `Inactive` if it was `Active`. Any other status wins over the flag.
pub fn update_status(
    old: MerchantStatus,
    requested: Option<MerchantStatus>,
    is_active: bool,
) -> (MerchantStatus, bool) {
    match requested.unwrap_or(MerchantStatus::New) {
        MerchantStatus::New => {
            if is_active {
                (MerchantStatus::Active, true)
            } else if old == MerchantStatus::Active {
                (MerchantStatus::Inactive, false)
            } else {
                (old, false)
            }
        }
        status => (status, status == MerchantStatus::Active),
    }
}

/// Pending marker for a new upgrade request.
pub fn request_upgrade(current: UpgradeStatus, requested: MerchantType) -> Result<UpgradeStatus> {
    if current == UpgradeStatus::Active {
        return Err(MerchantError::validation(ERR_UPGRADE_ALREADY_ACTIVE));
    }
    if current.is_pending() {
        return Err(MerchantError::validation(ERR_UPGRADE_ALREADY_PENDING));
    }
    match requested {
        MerchantType::Manage => Ok(UpgradeStatus::PendingManage),
        MerchantType::Associate => Ok(UpgradeStatus::PendingAssociate),
        MerchantType::Regular => Err(MerchantError::validation(ERR_INVALID_UPGRADE_TARGET)),
    }
}

/// Rejected marker for a pending upgrade request.
pub fn reject_upgrade(current: UpgradeStatus) -> Result<UpgradeStatus> {
    match current {
        UpgradeStatus::PendingManage => Ok(UpgradeStatus::RejectManage),
        UpgradeStatus::PendingAssociate => Ok(UpgradeStatus::RejectAssociate),
        UpgradeStatus::Active => Err(MerchantError::validation(ERR_UPGRADE_ALREADY_ACTIVE)),
        UpgradeStatus::None | UpgradeStatus::RejectManage | UpgradeStatus::RejectAssociate => {
            Err(MerchantError::validation(ERR_NO_UPGRADE_REQUEST))
        }
    }
}

/// Tier granted when a pending upgrade request is approved.
pub fn approve_upgrade(current: UpgradeStatus) -> Result<MerchantType> {
    match current {
        UpgradeStatus::PendingManage => Ok(MerchantType::Manage),
        UpgradeStatus::PendingAssociate => Ok(MerchantType::Associate),
        UpgradeStatus::Active => Err(MerchantError::validation(ERR_UPGRADE_ALREADY_ACTIVE)),
        UpgradeStatus::None | UpgradeStatus::RejectManage | UpgradeStatus::RejectAssociate => {
            Err(MerchantError::validation(ERR_NO_UPGRADE_REQUEST))
        }
    }
}

/// A registration can be rejected until it has been approved.
pub fn ensure_rejectable_registration(status: MerchantStatus, is_active: bool) -> Result<()> {
    if is_active && status == MerchantStatus::Active {
        return Err(MerchantError::validation(ERR_REGISTRATION_APPROVED));
    }
    Ok(())
}

/// Blank upgrade status for a merchant dismissing its rejected request.
pub fn clear_rejected_upgrade(current: UpgradeStatus) -> Result<UpgradeStatus> {
    match current {
        UpgradeStatus::None => Err(MerchantError::validation(ERR_NOTHING_TO_CLEAR)),
        UpgradeStatus::Active => Err(MerchantError::validation(ERR_UPGRADE_ALREADY_ACTIVE)),
        UpgradeStatus::PendingManage | UpgradeStatus::PendingAssociate => {
            Err(MerchantError::validation(ERR_UPGRADE_STILL_PENDING))
        }
        UpgradeStatus::RejectManage | UpgradeStatus::RejectAssociate => Ok(UpgradeStatus::None),
    }
}

/// Which notifications a committed transition warrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionEffects {
    pub activated: bool,
    pub approved: bool,
}

impl TransitionEffects {
    pub fn any(&self) -> bool {
        self.activated || self.approved
    }
}

/// Decides dispatch only; never mutates state.
pub fn transition_effects(
    old_is_active: bool,
    old_upgrade: UpgradeStatus,
    new_is_active: bool,
    new_upgrade: UpgradeStatus,
) -> TransitionEffects {
    TransitionEffects {
        activated: !old_is_active && new_is_active,
        approved: old_upgrade != UpgradeStatus::Active && new_upgrade == UpgradeStatus::Active,
    }
}

/// Admin or owner driven employee status change.
pub fn employee_status_change(
    current: EmployeeStatus,
    requested: EmployeeStatus,
) -> Result<EmployeeStatus> {
    use EmployeeStatus::*;
    match (current, requested) {
        (Invited, Active) | (Invited, Revoked) => Ok(requested),
        (Active, Inactive) | (Active, Revoked) => Ok(requested),
        (Inactive, Active) | (Inactive, Revoked) => Ok(requested),
        (Revoked, _) => Err(MerchantError::validation(
            "employee is revoked, send a new invitation instead",
        )),
        (_, Invited) => Err(MerchantError::validation(
            "employee can only return to invited through re-invitation",
        )),
        (from, to) => Err(MerchantError::validation(format!(
            "employee status cannot change from {from} to {to}"
        ))),
    }
}

/// Status after re-inviting a revoked employee. Allowed once.
pub fn reinvite(current: EmployeeStatus, already_reinvited: bool) -> Result<EmployeeStatus> {
    match current {
        EmployeeStatus::Revoked if !already_reinvited => Ok(EmployeeStatus::Invited),
        EmployeeStatus::Revoked => Err(MerchantError::validation(
            "employee has already been re-invited once",
        )),
        EmployeeStatus::Invited => Err(MerchantError::validation(
            "employee invitation is still pending",
        )),
        EmployeeStatus::Active | EmployeeStatus::Inactive => Err(MerchantError::validation(
            "only revoked employees can be re-invited",
        )),
    }
}
