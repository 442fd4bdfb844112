//! One-shot terminal commands over a registered session.
//!
//! These back the operator actions of the terminals view: read device
//! info, push the host clock, enable/disable/restart/power off, and write a
//! user record. All of them block and belong on the task executor.

use crate::device::types::{DeviceInfo, Endpoint, PRIVILEGE_ADMIN, PRIVILEGE_DEFAULT, UserRecord};
use crate::error::{FleetError, Result};
use crate::session::SessionRegistry;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Power and mode actions an operator can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAction {
    Enable,
    Disable,
    Restart,
    PowerOff,
}

impl DeviceAction {
    /// Whether the terminal drops the connection after this action.
    pub fn closes_link(self) -> bool {
        matches!(self, Self::Restart | Self::PowerOff)
    }
}

impl std::fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Restart => "restart",
            Self::PowerOff => "power off",
        };
        f.write_str(name)
    }
}

/// Commands against already-connected terminals.
#[derive(Clone)]
pub struct DeviceCommands {
    registry: Arc<SessionRegistry>,
}

impl DeviceCommands {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Read identity, clock and capacity counters.
    pub fn device_info(&self, endpoint: &Endpoint) -> Result<DeviceInfo> {
        let session = self.registry.session(endpoint)?;
        session.with_driver(|driver| {
            Ok(DeviceInfo {
                serial_number: driver.serial_number()?,
                device_name: driver.device_name()?,
                firmware_version: driver.firmware_version()?,
                platform: driver.platform()?,
                mac: driver.mac()?,
                time: driver.time()?,
                counters: driver.read_capacity_counters()?,
            })
        })
    }

    /// Push `now` to the terminal clock.
    pub fn sync_time(&self, endpoint: &Endpoint, now: NaiveDateTime) -> Result<()> {
        let session = self.registry.session(endpoint)?;
        session.with_driver(|driver| driver.set_time(now))?;
        info!(endpoint = %endpoint, "device clock set to {now}");
        Ok(())
    }

    /// Run a power/mode action. Restart and power-off drop the registry
    /// entry since the terminal closes the link.
    pub fn perform(&self, endpoint: &Endpoint, action: DeviceAction) -> Result<()> {
        let session = self.registry.session(endpoint)?;
        session.with_driver(|driver| match action {
            DeviceAction::Enable => driver.enable_device(),
            DeviceAction::Disable => driver.disable_device(),
            DeviceAction::Restart => driver.restart(),
            DeviceAction::PowerOff => driver.power_off(),
        })?;
        if action.closes_link() {
            self.registry.forget(endpoint);
        }
        info!(endpoint = %endpoint, "device action '{action}' executed");
        Ok(())
    }

    /// Write `user` into its `uid` slot on the terminal.
    ///
    /// # Errors
    ///
    /// [`FleetError::Validation`] for an empty `user_id`, a non-numeric
    /// card, or a `user_id` already enrolled under a different `uid`.
    pub fn upload_user(&self, endpoint: &Endpoint, user: &UserRecord) -> Result<()> {
        let mut user = normalize_user(user)?;
        let session = self.registry.session(endpoint)?;
        session.with_driver(|driver| {
            let enrolled = driver.users()?;
            if let Some(clash) = enrolled
                .iter()
                .find(|u| u.user_id == user.user_id && u.uid != user.uid)
            {
                return Err(FleetError::Validation(format!(
                    "user_id {} already enrolled in slot {}",
                    user.user_id, clash.uid
                )));
            }
            user.privilege = clamp_privilege(user.privilege);
            driver.set_user(&user)
        })?;
        info!(endpoint = %endpoint, user_id = %user.user_id, "user updated on device");
        Ok(())
    }
}

fn normalize_user(user: &UserRecord) -> Result<UserRecord> {
    let mut user = user.clone();
    user.user_id = user.user_id.trim().to_owned();
    if user.user_id.is_empty() {
        return Err(FleetError::Validation("user_id must not be empty".to_owned()));
    }
    user.card = user.card.trim().to_owned();
    if user.card.is_empty() {
        user.card = "0".to_owned();
    }
    if user.card.parse::<u64>().is_err() {
        return Err(FleetError::Validation(format!(
            "card `{}` is not numeric",
            user.card
        )));
    }
    Ok(user)
}

/// Terminals only distinguish admin from everyone else.
fn clamp_privilege(privilege: u8) -> u8 {
    if privilege == PRIVILEGE_ADMIN {
        PRIVILEGE_ADMIN
    } else {
        PRIVILEGE_DEFAULT
    }
}
