use std::sync::Arc;

use crate::tools::Tool;

// ---------------------------------------------------------------------------
// Wildcard pattern matching (simple glob: `*` matches any char sequence)
// ---------------------------------------------------------------------------

/// Match a tool name against a pattern that may contain `*` wildcards.
/// Examples: `web_*` matches `web_search`,
///           `*_calculator` matches `deterministic_calculator`.
pub fn matches_wildcard(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut remaining = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !remaining.starts_with(part) {
                return false;
            }
            remaining = &remaining[part.len()..];
        } else if i == parts.len() - 1 {
            return remaining.ends_with(part);
        } else {
            match remaining.find(part) {
                Some(pos) => remaining = &remaining[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Check if any pattern in the list matches the given tool name.
pub fn any_pattern_matches(patterns: &[&str], name: &str) -> bool {
    patterns.iter().any(|p| matches_wildcard(p, name))
}

fn normalized(patterns: &[String]) -> Vec<&str> {
    patterns
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Filter tools by allow/deny with wildcard support
// ---------------------------------------------------------------------------

/// Retain only tools matching at least one allow pattern. If the allow list is
/// empty, all tools pass through. Deny is applied after allow and wins when a
/// tool matches both.
pub fn filter_tools_by_policy(
    tools: Vec<Arc<dyn Tool>>,
    allow_patterns: &[String],
    deny_patterns: &[String],
) -> Vec<Arc<dyn Tool>> {
    let allow = normalized(allow_patterns);
    let deny = normalized(deny_patterns);

    tools
        .into_iter()
        .filter(|tool| {
            let name = tool.name();
            let allowed = allow.is_empty() || any_pattern_matches(&allow, name);
            let denied = !deny.is_empty() && any_pattern_matches(&deny, name);
            if denied {
                tracing::debug!(tool = name, "Tool denied by deny_tools policy");
            }
            allowed && !denied
        })
        .collect()
}

/// Allow patterns that match none of `names`; usually a typo in a profile.
pub fn unmatched_patterns<'a>(patterns: &'a [String], names: &[&str]) -> Vec<&'a str> {
    normalized(patterns)
        .into_iter()
        .filter(|pattern| !names.iter().any(|name| matches_wildcard(pattern, name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolInvocationError;
    use crate::tools::SideEffect;
    use async_trait::async_trait;
    use serde_json::Value;

    struct StubTool {
        tool_name: String,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            &self.tool_name
        }
        fn description(&self) -> &str {
            "stub tool for testing"
        }
        fn input_schema(&self) -> Value {
            Value::Null
        }
        fn output_schema(&self) -> Value {
            Value::Null
        }
        fn side_effect(&self) -> SideEffect {
            SideEffect::None
        }
        async fn invoke(&self, _args: Value) -> Result<Value, ToolInvocationError> {
            Ok(Value::Null)
        }
    }

    fn stubs(names: &[&str]) -> Vec<Arc<dyn Tool>> {
        names
            .iter()
            .map(|name| {
                Arc::new(StubTool {
                    tool_name: name.to_string(),
                }) as Arc<dyn Tool>
            })
            .collect()
    }

    fn names(tools: &[Arc<dyn Tool>]) -> Vec<String> {
        tools.iter().map(|tool| tool.name().to_string()).collect()
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches_wildcard("web_search", "web_search"));
        assert!(!matches_wildcard("web_search", "web_search_v2"));
        assert!(matches_wildcard("web_*", "web_search"));
        assert!(matches_wildcard("*_calculator", "deterministic_calculator"));
        assert!(matches_wildcard("*base*", "knowledge_base_search"));
        assert!(matches_wildcard("*", "anything"));
        assert!(!matches_wildcard("kb_*", "web_search"));
    }

    #[test]
    fn empty_allow_passes_everything_and_deny_wins() {
        let tools = stubs(&["deterministic_calculator", "web_search", "knowledge_base_search"]);
        let filtered = filter_tools_by_policy(tools.clone(), &[], &[]);
        assert_eq!(filtered.len(), 3);

        let filtered = filter_tools_by_policy(
            tools,
            &["*".to_string()],
            &["web_*".to_string(), "  ".to_string()],
        );
        assert_eq!(
            names(&filtered),
            vec!["deterministic_calculator", "knowledge_base_search"]
        );
    }

    #[test]
    fn allow_list_restricts_to_matches() {
        let tools = stubs(&["deterministic_calculator", "web_search", "knowledge_base_search"]);
        let filtered = filter_tools_by_policy(tools, &["*calculator".to_string()], &[]);
        assert_eq!(names(&filtered), vec!["deterministic_calculator"]);
    }

    #[test]
    fn reports_patterns_that_match_nothing() {
        let patterns = vec!["web_*".to_string(), "calculater".to_string()];
        let unmatched = unmatched_patterns(&patterns, &["web_search", "deterministic_calculator"]);
        assert_eq!(unmatched, vec!["calculater"]);
    }
}
