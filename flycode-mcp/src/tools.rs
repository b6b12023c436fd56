use serde_json::Value;
use serde_json::json;

pub const TOOL_NAMES: &[&str] = &[
    "fs.ls",
    "fs.mkdir",
    "fs.read",
    "fs.search",
    "fs.write",
    "fs.writeBatch",
    "fs.rm",
    "fs.mv",
    "fs.chmod",
    "fs.diff",
    "process.run",
    "shell.exec",
];

const CONFIRMATION_REQUIRED: &[&str] = &["fs.write", "fs.writeBatch", "fs.rm", "fs.mv", "fs.chmod", "process.run", "shell.exec"];

pub fn tool_needs_confirmation(tool: &str) -> bool {
    CONFIRMATION_REQUIRED.contains(&tool)
}

pub fn tool_descriptors() -> Vec<Value> {
    TOOL_NAMES
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "description": format!("FlyCode tool `{name}`"),
                "inputSchema": {
                    "type": "object",
                    "additionalProperties": true,
                },
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_set_matches_spec() {
        assert!(tool_needs_confirmation("fs.write"));
        assert!(tool_needs_confirmation("process.run"));
        assert!(!tool_needs_confirmation("fs.read"));
        assert!(!tool_needs_confirmation("fs.ls"));
    }

    #[test]
    fn descriptors_cover_every_tool_name() {
        let descriptors = tool_descriptors();
        assert_eq!(descriptors.len(), TOOL_NAMES.len());
    }
}
