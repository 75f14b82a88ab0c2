// Server & Instance node values

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of `/{job}/servers/{ip}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Enabled,
    Disabled,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Enabled => "ENABLED",
            ServerStatus::Disabled => "DISABLED",
        }
    }

    /// Anything but an explicit DISABLED counts as enabled
    pub fn from_node_value(value: &str) -> Self {
        if value == "DISABLED" {
            ServerStatus::Disabled
        } else {
            ServerStatus::Enabled
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of `/{job}/instances/{instanceId}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceMark {
    Idle,
    /// Operator asked this instance to run a cycle now
    Trigger,
}

impl InstanceMark {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceMark::Idle => "",
            InstanceMark::Trigger => "TRIGGER",
        }
    }

    pub fn from_node_value(value: &str) -> Self {
        if value == "TRIGGER" {
            InstanceMark::Trigger
        } else {
            InstanceMark::Idle
        }
    }
}
