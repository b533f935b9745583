//! Outbound commands.
//!
//! A command is one JSON object per newline-terminated line. The worker routes
//! on the `command` field (the domain) and, for device domains, an `action`
//! field; any remaining fields are action-specific.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::AppResult;

/// Command routing domain, serialized as the wire `command` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandDomain {
    Ping,
    GetVersion,
    CheckHardware,
    Camera,
    Daq,
    Scanner,
}

/// An outbound request: domain, optional action, action-specific payload.
#[derive(Clone, Debug, Serialize)]
pub struct Command {
    #[serde(rename = "command")]
    pub domain: CommandDomain,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Command {
    /// A domain-level command with no action (`ping`, `check_hardware`, ...).
    pub fn bare(domain: CommandDomain) -> Self {
        Self {
            domain,
            action: None,
            payload: Map::new(),
        }
    }

    /// A device command (`camera`/`daq`/`scanner` + action).
    pub fn action(domain: CommandDomain, action: &'static str) -> Self {
        Self {
            domain,
            action: Some(action),
            payload: Map::new(),
        }
    }

    /// Attach an action-specific field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Attach a serializable field (e.g. a settings struct).
    pub fn with_serialized<T: Serialize>(mut self, key: &str, value: &T) -> AppResult<Self> {
        self.payload
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Serialize to the single-line wire form (no trailing newline).
    pub fn to_line(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_command_shape() {
        let line = Command::bare(CommandDomain::Ping).to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({"command": "ping"}));
    }

    #[test]
    fn test_action_command_shape() {
        let line = Command::action(CommandDomain::Daq, "rotate")
            .with("degrees", 10.0)
            .to_line()
            .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({"command": "daq", "action": "rotate", "degrees": 10.0})
        );
    }

    #[test]
    fn test_settings_are_flattened_under_their_key() {
        #[derive(Serialize)]
        struct Fake {
            gain: f64,
        }
        let line = Command::action(CommandDomain::Camera, "configure")
            .with_serialized("settings", &Fake { gain: 2.0 })
            .unwrap()
            .to_line()
            .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["settings"]["gain"], json!(2.0));
        assert!(!line.contains('\n'));
    }
}
