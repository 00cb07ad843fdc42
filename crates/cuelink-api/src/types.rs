//! Reply payload types and their normalisation.
//!
//! The device is loose about shapes: numbers may be strings or integers,
//! names live under `displayName`, `name`, or `listName` depending on the
//! cue type, and single-cue queries may answer with an object or a
//! one-element array. Everything here accepts the loose form and produces
//! one canonical struct.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Keys requested for single-cue queries.
pub const CUE_VALUE_KEYS: [&str; 4] = ["uniqueID", "number", "displayName", "type"];

// ── Workspace ────────────────────────────────────────────────────────

/// A named control surface within a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Empty id denotes the default / first workspace.
    pub id: String,
    pub display_name: String,
    pub has_passcode: bool,
}

impl Workspace {
    /// The synthetic target offered when the device lists nothing.
    pub fn default_workspace() -> Self {
        Self {
            id: String::new(),
            display_name: "Default Workspace".into(),
            has_passcode: false,
        }
    }

    pub fn is_default(&self) -> bool {
        self.id.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct WorkspaceRecord {
    #[serde(rename = "uniqueID", default)]
    unique_id: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
    #[serde(rename = "hasPasscode", default)]
    has_passcode: bool,
}

/// Parse a `/workspaces` reply. Malformed entries are skipped.
pub fn parse_workspaces(data: &Value) -> Vec<Workspace> {
    let Some(items) = data.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<WorkspaceRecord>(item.clone()).ok())
        .filter(|r| !r.unique_id.is_empty())
        .map(|r| Workspace {
            display_name: if r.display_name.is_empty() {
                r.unique_id.clone()
            } else {
                r.display_name
            },
            id: r.unique_id,
            has_passcode: r.has_passcode,
        })
        .collect()
}

// ── CueSummary ───────────────────────────────────────────────────────

/// Normalised answer to a single-cue query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueSummary {
    pub id: String,
    pub number: String,
    pub name: String,
    #[serde(rename = "type")]
    pub cue_type: String,
}

impl CueSummary {
    /// Neutral value shown when there is nothing to show.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            number: "--".into(),
            name: name.into(),
            cue_type: String::new(),
        }
    }

    pub fn no_selection() -> Self {
        Self::placeholder("No selection")
    }

    pub fn end_of_list() -> Self {
        Self::placeholder("End of list")
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_empty()
    }
}

/// Parse a `valuesForKeys` reply: an object, or a one-element array.
pub fn parse_cue_values(data: &Value) -> Option<CueSummary> {
    let node = match data {
        Value::Array(items) => items.first()?,
        Value::Object(_) => data,
        _ => return None,
    };

    let id = text(node, &["uniqueID", "id"]);
    let number = text(node, &["number"]);
    if id.is_empty() && number.is_empty() {
        return None;
    }

    Some(CueSummary {
        id,
        number: if number.is_empty() { "--".into() } else { number },
        name: display_name(node),
        cue_type: text(node, &["type"]),
    })
}

// ── Cue ──────────────────────────────────────────────────────────────

/// One entry of the flattened cue list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cue {
    pub id: String,
    pub number: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub cue_type: String,
    /// Nesting level; cue lists sit at depth 0.
    pub depth: usize,
    /// Position within the parent container.
    pub original_index: usize,
}

impl Cue {
    fn from_node(node: &Value, depth: usize, original_index: usize) -> Self {
        Self {
            id: text(node, &["uniqueID", "id"]),
            number: text(node, &["number"]),
            display_name: display_name(node),
            cue_type: text(node, &["type"]),
            depth,
            original_index,
        }
    }

    /// Single entry standing in for a cue list that could not be fetched.
    pub fn error_placeholder(reason: &str) -> Self {
        Self {
            id: String::new(),
            number: "--".into(),
            display_name: format!("Unable to load cues: {reason}"),
            cue_type: "error".into(),
            depth: 0,
            original_index: 0,
        }
    }

    pub fn summary(&self) -> CueSummary {
        CueSummary {
            id: self.id.clone(),
            number: if self.number.is_empty() {
                "--".into()
            } else {
                self.number.clone()
            },
            name: self.display_name.clone(),
            cue_type: self.cue_type.clone(),
        }
    }
}

/// Flatten a cue-list catalog depth-first.
///
/// Accepts an array of top-level nodes or a single node; children live
/// under each node's `cues` array.
pub fn flatten_cues(data: &Value) -> Vec<Cue> {
    let mut out = Vec::new();
    match data {
        Value::Array(nodes) => walk(nodes, 0, &mut out),
        Value::Object(_) => walk(std::slice::from_ref(data), 0, &mut out),
        _ => {}
    }
    out
}

fn walk(nodes: &[Value], depth: usize, out: &mut Vec<Cue>) {
    for (index, node) in nodes.iter().enumerate() {
        out.push(Cue::from_node(node, depth, index));
        if let Some(children) = node.get("cues").and_then(Value::as_array) {
            walk(children, depth + 1, out);
        }
    }
}

/// The next cue at the same depth in the same container as `id`.
///
/// Scanning stops as soon as the walk climbs out of the container.
pub fn next_sibling<'a>(cues: &'a [Cue], id: &str) -> Option<&'a Cue> {
    let position = cues.iter().position(|c| c.id == id)?;
    let depth = cues.get(position)?.depth;
    cues.iter()
        .skip(position + 1)
        .take_while(|c| c.depth >= depth)
        .find(|c| c.depth == depth)
}

// ── Helpers ──────────────────────────────────────────────────────────

fn text(node: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| match node.get(*k)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

fn display_name(node: &Value) -> String {
    let name = text(node, &["displayName", "name", "listName"]);
    if name.is_empty() {
        "Untitled".into()
    } else {
        name
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn catalog() -> Value {
        json!([{
            "uniqueID": "L1", "number": "", "listName": "Main", "type": "Cue List",
            "cues": [
                { "uniqueID": "C1", "number": "1", "name": "House out", "type": "Light" },
                { "uniqueID": "G1", "number": 2, "name": "Preshow", "type": "Group",
                  "cues": [
                    { "uniqueID": "C2", "number": "2.1", "name": "Music", "type": "Audio" },
                    { "uniqueID": "C3", "number": "2.2", "name": "Video", "type": "Video" }
                  ] },
                { "uniqueID": "C4", "number": "3", "displayName": "Curtain", "type": "Network" }
            ]
        }])
    }

    #[test]
    fn flattens_depth_first_with_depth_and_index() {
        let cues = flatten_cues(&catalog());
        let shape: Vec<(&str, usize, usize)> = cues
            .iter()
            .map(|c| (c.id.as_str(), c.depth, c.original_index))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("L1", 0, 0),
                ("C1", 1, 0),
                ("G1", 1, 1),
                ("C2", 2, 0),
                ("C3", 2, 1),
                ("C4", 1, 2),
            ]
        );
        assert_eq!(cues[0].display_name, "Main");
        assert_eq!(cues[2].number, "2");
        assert_eq!(cues[5].display_name, "Curtain");
    }

    #[test]
    fn next_sibling_skips_children() {
        let cues = flatten_cues(&catalog());
        assert_eq!(next_sibling(&cues, "G1").unwrap().id, "C4");
        assert_eq!(next_sibling(&cues, "C1").unwrap().id, "G1");
        assert_eq!(next_sibling(&cues, "C2").unwrap().id, "C3");
    }

    #[test]
    fn next_sibling_is_none_at_end_of_container() {
        let cues = flatten_cues(&catalog());
        assert!(next_sibling(&cues, "C3").is_none());
        assert!(next_sibling(&cues, "C4").is_none());
        assert!(next_sibling(&cues, "missing").is_none());
    }

    #[test]
    fn cue_values_accept_object_and_array() {
        let obj = json!({ "uniqueID": "C9", "number": "9", "displayName": "Blackout", "type": "Light" });
        let arr = json!([obj.clone()]);
        let a = parse_cue_values(&obj).unwrap();
        let b = parse_cue_values(&arr).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name, "Blackout");
        assert_eq!(a.cue_type, "Light");
    }

    #[test]
    fn cue_values_absent_data() {
        assert!(parse_cue_values(&Value::Null).is_none());
        assert!(parse_cue_values(&json!([])).is_none());
        assert!(parse_cue_values(&json!({ "type": "Audio" })).is_none());
    }

    #[test]
    fn workspaces_skip_malformed_entries() {
        let data = json!([
            { "uniqueID": "W1", "displayName": "Show.qlab5", "hasPasscode": true },
            { "displayName": "no id" },
            "garbage",
            { "uniqueID": "W2" }
        ]);
        let ws = parse_workspaces(&data);
        assert_eq!(ws.len(), 2);
        assert!(ws[0].has_passcode);
        assert_eq!(ws[1].display_name, "W2");
    }

    #[test]
    fn placeholders() {
        let p = CueSummary::end_of_list();
        assert_eq!(p.number, "--");
        assert_eq!(p.name, "End of list");
        assert!(p.is_placeholder());
        assert!(Workspace::default_workspace().is_default());
    }
}
