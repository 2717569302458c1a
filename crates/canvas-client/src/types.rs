//! Request and response bodies exchanged with the project store.

use canvas_core::{NodeId, DEFAULT_FOLDER_HEIGHT, DEFAULT_FOLDER_WIDTH};
use serde::{Deserialize, Serialize};

/// Body of `POST /files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    /// File name, relative to the project root.
    pub file_path: String,
    /// Language or kind, e.g. `python`.
    pub file_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub description: String,
}

/// Body of `POST /folders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFolder {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NewFolder {
    /// Folder of the default size at the given position.
    pub fn at(name: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            width: DEFAULT_FOLDER_WIDTH,
            height: DEFAULT_FOLDER_HEIGHT,
        }
    }
}

/// Partial update of a folder (`PUT /folders/{id}`). Absent fields are left
/// untouched by the store.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_expanded: Option<bool>,
}

impl FolderPatch {
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Default::default()
        }
    }

    pub fn size(width: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Body of `PUT /files/{id}/content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBody {
    pub content: String,
}

/// Body of `PUT /files/{id}/description`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionBody {
    pub description: String,
}

/// Response of `GET /files/{id}/status`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub running: bool,
}

/// Terminal message of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCompletion {
    pub success: bool,
    pub return_code: Option<i32>,
}

/// Message delivered on a run channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A chunk of process output.
    Output(String),
    /// The run finished.
    Completed(RunCompletion),
    /// The transport ended before a completion message arrived.
    Disconnected,
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunEvent::Output(_))
    }
}

/// One JSON message on the wire: `{output}` or `{done, success, return_code}`.
#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct WireRunMessage {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    return_code: Option<i32>,
}

impl WireRunMessage {
    pub(crate) fn into_event(self) -> Option<RunEvent> {
        if self.done {
            return Some(RunEvent::Completed(RunCompletion {
                success: self.success,
                return_code: self.return_code,
            }));
        }
        self.output.map(RunEvent::Output)
    }
}

/// Folder reference for `PUT /files/{id}/folder`; `None` removes the file
/// from its folder.
pub(crate) fn folder_query(folder: Option<&NodeId>) -> Vec<(&'static str, String)> {
    folder
        .map(|f| vec![("folder_id", f.to_string())])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_message_decoding() {
        let out: WireRunMessage = serde_json::from_str(r#"{"output":"hello\n"}"#).unwrap();
        assert_eq!(out.into_event(), Some(RunEvent::Output("hello\n".into())));

        let done: WireRunMessage =
            serde_json::from_str(r#"{"done":true,"success":false,"return_code":2}"#).unwrap();
        assert_eq!(
            done.into_event(),
            Some(RunEvent::Completed(RunCompletion {
                success: false,
                return_code: Some(2),
            }))
        );

        let empty: WireRunMessage = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.into_event(), None);
    }

    #[test]
    fn test_folder_patch_skips_absent_fields() {
        let json = serde_json::to_value(FolderPatch::position(1.0, 2.0)).unwrap();
        assert_eq!(json, serde_json::json!({"x": 1.0, "y": 2.0}));

        let expanded = FolderPatch {
            is_expanded: Some(false),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(expanded).unwrap(),
            serde_json::json!({"isExpanded": false})
        );
    }
}
