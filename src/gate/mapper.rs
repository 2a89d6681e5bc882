use regex::Regex;
use serde_json::Value;

use super::ToolMapper;

/// Fans one physical tool out into virtual tools by matching a string
/// field of its input, e.g. the `command` of a shell tool.
///
/// Rules are tried in insertion order; the first match wins. Calls to
/// other tools, or with no matching rule, keep their own name.
#[derive(Debug, Clone)]
pub struct CommandPatternMapper {
    tool: String,
    field: String,
    rules: Vec<(Regex, String)>,
}

impl CommandPatternMapper {
    pub fn new(tool: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            field: field.into(),
            rules: Vec::new(),
        }
    }

    pub fn rule(mut self, pattern: &str, virtual_tool: impl Into<String>) -> Result<Self, regex::Error> {
        self.rules.push((Regex::new(pattern)?, virtual_tool.into()));
        Ok(self)
    }
}

impl ToolMapper for CommandPatternMapper {
    fn map(&self, tool_name: &str, input: &Value) -> String {
        if tool_name != self.tool {
            return tool_name.to_string();
        }
        let Some(text) = input.get(&self.field).and_then(Value::as_str) else {
            return tool_name.to_string();
        };
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| tool_name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell() -> CommandPatternMapper {
        CommandPatternMapper::new("bash", "command")
            .rule(r"^\s*rm\s", "delete")
            .unwrap()
            .rule(r"^\s*(tar|rsync)\s", "backup")
            .unwrap()
    }

    #[test]
    fn maps_by_first_matching_rule() {
        let m = shell();
        assert_eq!(m.map("bash", &json!({"command": "rm -rf build"})), "delete");
        assert_eq!(m.map("bash", &json!({"command": "tar czf b.tgz src"})), "backup");
        assert_eq!(m.map("bash", &json!({"command": "ls"})), "bash");
    }

    #[test]
    fn other_tools_and_missing_fields_pass_through() {
        let m = shell();
        assert_eq!(m.map("edit", &json!({"command": "rm x"})), "edit");
        assert_eq!(m.map("bash", &json!({"cmd": "rm x"})), "bash");
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(CommandPatternMapper::new("bash", "command").rule("(", "x").is_err());
    }
}
