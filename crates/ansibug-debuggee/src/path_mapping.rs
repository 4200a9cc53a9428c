use ansibug_dap::types::OutputEventBody;
use serde::{Deserialize, Serialize};

/// Output event category the client uses to push a [`DebugConfiguration`].
pub const DEBUG_CONFIGURATION_CATEGORY: &str = "ansibug_debug_configuration";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    /// Path prefix as the client sees it.
    pub local_root: String,
    /// Path prefix as `ansible-playbook` sees it.
    pub remote_root: String,
}

/// Client supplied settings. Each update replaces the previous one outright.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugConfiguration {
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
}

impl DebugConfiguration {
    /// Extract a configuration from an `output` event.
    ///
    /// Returns `None` when the event has a different category or its `data`
    /// does not decode.
    pub fn from_output_event(body: &OutputEventBody) -> Option<Self> {
        if body.category.as_deref() != Some(DEBUG_CONFIGURATION_CATEGORY) {
            return None;
        }
        let data = body.data.clone()?;
        match serde_json::from_value(data) {
            Ok(config) => Some(config),
            Err(err) => {
                tracing::warn!(
                    target: "ansibug.debuggee",
                    error = %ansibug_dap::codec::sanitize_json_error_message(&err.to_string()),
                    "ignoring malformed debug configuration"
                );
                None
            }
        }
    }

    /// Client path to runtime path. The first mapping whose `local_root`
    /// prefixes `path` wins.
    pub fn to_runtime_path(&self, path: &str) -> String {
        self.path_mappings
            .iter()
            .find_map(|mapping| {
                path.strip_prefix(mapping.local_root.as_str())
                    .map(|rest| format!("{}{rest}", mapping.remote_root))
            })
            .unwrap_or_else(|| path.to_owned())
    }

    /// Runtime path to client path. The first mapping whose `remote_root`
    /// prefixes `path` wins.
    pub fn to_client_path(&self, path: &str) -> String {
        self.path_mappings
            .iter()
            .find_map(|mapping| {
                path.strip_prefix(mapping.remote_root.as_str())
                    .map(|rest| format!("{}{rest}", mapping.local_root))
            })
            .unwrap_or_else(|| path.to_owned())
    }
}
