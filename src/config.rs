use anyhow::Result;
use serde::Deserialize;

/// Session settings. Every field is optional in JSON; missing ones take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// shown to the callee while the call is ringing
    pub display_name: String,
    /// STUN/TURN urls handed to every peer connection
    pub ice_servers: Vec<String>,
    pub data_channel_label: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            ice_servers: vec![
                "stun:stun.services.mozilla.com:3478".into(),
                "stun:stun.l.google.com:19302".into(),
            ],
            data_channel_label: "whiteboard".into(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
