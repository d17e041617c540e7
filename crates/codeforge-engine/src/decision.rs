//! Two-tier parsing of oracle decisions.
//!
//! Oracle output is inherently unreliable, so every decision goes through
//! a strict structured parse first and degrades to a documented keyword
//! heuristic when that fails. Ambiguity resolves to the safe branch:
//! Coding for planning, scenario D for reflection. The parser sits behind
//! a trait so the heuristic tier can be swapped or tested independently
//! of phase logic.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::state::Scenario;

/// Branch chosen by the planning phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningBranch {
    /// More information is needed first.
    Searching,
    /// Proceed straight to code generation.
    Coding,
}

/// Parsed planning decision.
#[derive(Debug, Clone)]
pub struct PlanningDecision {
    /// Which branch to take.
    pub branch: PlanningBranch,
    /// Plan text, possibly empty.
    pub plan: String,
    /// Free-text rationale.
    pub reason: String,
    /// What information is missing, when searching.
    pub missing_info: Vec<String>,
    /// Queries to run, when searching.
    pub search_queries: Vec<String>,
}

/// Parsed reflection verdict.
#[derive(Debug, Clone)]
pub struct ReflectionVerdict {
    /// Four-way outcome classification.
    pub scenario: Scenario,
    /// Whether the oracle judged the run successful.
    pub success: bool,
    /// Full analysis text.
    pub analysis: String,
    /// Diagnostic detail for the error-analysis slot.
    pub error_details: String,
    /// Suggested improvements, when offered.
    pub improvements: Vec<String>,
}

/// Parsed code-generation output.
#[derive(Debug, Clone, Default)]
pub struct CodePlan {
    /// Generated files, path → content.
    pub files: BTreeMap<String, String>,
    /// Entry-point file name.
    pub main_entry: Option<String>,
    /// Declared third-party dependencies.
    pub dependencies: Vec<String>,
    /// Argv override for running the code, when declared.
    pub execution_command: Option<Vec<String>>,
    /// Short description of what was generated.
    pub description: String,
}

/// Parser for oracle responses.
///
/// Implementations must be total: any input string yields a decision.
pub trait DecisionParser: Send + Sync {
    /// Parse a planning response.
    fn parse_planning(&self, raw: &str) -> PlanningDecision;
    /// Parse a reflection response.
    fn parse_reflection(&self, raw: &str) -> ReflectionVerdict;
    /// Parse a code-generation response.
    fn parse_code(&self, raw: &str) -> CodePlan;
    /// Parse a query-generation response into a list of queries.
    fn parse_queries(&self, raw: &str) -> Vec<String>;
}

/// The default strict-then-heuristic parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoTierParser;

/// Strip code fences and return the JSON object payload, if one parses.
fn extract_json(raw: &str) -> Option<Value> {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```") {
        // Drop the fence language tag and the closing fence.
        let stripped = stripped
            .strip_prefix("json")
            .unwrap_or(stripped)
            .trim_start();
        text = stripped.strip_suffix("```").unwrap_or(stripped).trim();
    }
    if !text.starts_with('{') {
        return None;
    }
    serde_json::from_str(text).ok()
}

fn bullet_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('-') || line.starts_with('*'))
        .map(|line| line.trim_start_matches(['-', '*', ' ']).to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[derive(Deserialize)]
struct RawPlanning {
    decision: Option<String>,
    plan: Option<String>,
    reason: Option<String>,
    #[serde(default)]
    missing_info: Vec<String>,
    #[serde(default)]
    search_queries: Vec<String>,
}

#[derive(Deserialize)]
struct RawReflection {
    scenario: Option<String>,
    success: Option<bool>,
    analysis: Option<String>,
    error_details: Option<String>,
    #[serde(default)]
    improvements: Vec<String>,
}

#[derive(Deserialize)]
struct RawCode {
    #[serde(default)]
    files: BTreeMap<String, String>,
    main_entry: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    execution_command: Option<Vec<String>>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct RawQueries {
    #[serde(default)]
    queries: Vec<String>,
}

impl DecisionParser for TwoTierParser {
    fn parse_planning(&self, raw: &str) -> PlanningDecision {
        if let Some(parsed) =
            extract_json(raw).and_then(|v| serde_json::from_value::<RawPlanning>(v).ok())
        {
            let branch = match parsed.decision.as_deref().map(str::to_ascii_uppercase) {
                Some(ref d) if d == "SEARCHING" => PlanningBranch::Searching,
                _ => PlanningBranch::Coding,
            };
            return PlanningDecision {
                branch,
                plan: parsed.plan.unwrap_or_default(),
                reason: parsed.reason.unwrap_or_default(),
                missing_info: parsed.missing_info,
                search_queries: parsed.search_queries,
            };
        }

        // Heuristic tier: keyword scan, defaulting to Coding.
        let lower = raw.to_lowercase();
        let branch = if contains_any(&lower, &["search", "need more", "missing"]) {
            PlanningBranch::Searching
        } else {
            PlanningBranch::Coding
        };
        PlanningDecision {
            branch,
            plan: String::new(),
            reason: raw.to_string(),
            missing_info: Vec::new(),
            search_queries: Vec::new(),
        }
    }

    fn parse_reflection(&self, raw: &str) -> ReflectionVerdict {
        if let Some(parsed) =
            extract_json(raw).and_then(|v| serde_json::from_value::<RawReflection>(v).ok())
        {
            let scenario = parsed
                .scenario
                .as_deref()
                .and_then(Scenario::from_letter)
                .unwrap_or(if parsed.success == Some(true) {
                    Scenario::Success
                } else {
                    Scenario::LogicFault
                });
            return ReflectionVerdict {
                scenario,
                success: scenario == Scenario::Success,
                analysis: parsed.analysis.unwrap_or_else(|| raw.to_string()),
                error_details: parsed.error_details.unwrap_or_default(),
                improvements: parsed.improvements,
            };
        }

        // Heuristic tier: keyword scan, defaulting to scenario D.
        let lower = raw.to_lowercase();
        let scenario = if contains_any(
            &lower,
            &["success", "completed", "works as expected", "scenario a"],
        ) {
            Scenario::Success
        } else if contains_any(
            &lower,
            &["syntax error", "import error", "typo", "scenario b"],
        ) {
            Scenario::CodeFault
        } else if contains_any(
            &lower,
            &["api misuse", "method not found", "knowledge gap", "scenario c"],
        ) {
            Scenario::KnowledgeGap
        } else {
            Scenario::LogicFault
        };

        ReflectionVerdict {
            scenario,
            success: scenario == Scenario::Success,
            analysis: raw.to_string(),
            error_details: String::new(),
            improvements: bullet_lines(raw),
        }
    }

    fn parse_code(&self, raw: &str) -> CodePlan {
        if let Some(parsed) =
            extract_json(raw).and_then(|v| serde_json::from_value::<RawCode>(v).ok())
        {
            if !parsed.files.is_empty() {
                let main_entry = parsed
                    .main_entry
                    .or_else(|| parsed.files.keys().next().cloned());
                return CodePlan {
                    files: parsed.files,
                    main_entry,
                    dependencies: parsed.dependencies,
                    execution_command: parsed.execution_command,
                    description: parsed.description.unwrap_or_default(),
                };
            }
        }

        // Heuristic tier: extract fenced blocks and `# File:` markers.
        let mut files = BTreeMap::new();
        let mut current_file = "main.py".to_string();
        let mut current_content: Vec<&str> = Vec::new();

        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("```") {
                continue;
            }
            if let Some(name) = trimmed.strip_prefix("# File:") {
                if !current_content.is_empty() {
                    files.insert(current_file.clone(), current_content.join("\n"));
                }
                current_file = name.trim().to_string();
                current_content = Vec::new();
            } else {
                current_content.push(line);
            }
        }
        if !current_content.is_empty() {
            files.insert(current_file.clone(), current_content.join("\n"));
        }

        if files.is_empty() {
            // Last resort: the whole response is the program.
            files.insert("main.py".to_string(), raw.to_string());
            current_file = "main.py".to_string();
        }

        CodePlan {
            main_entry: Some(current_file),
            files,
            dependencies: Vec::new(),
            execution_command: None,
            description: "generated code (fallback parse)".to_string(),
        }
    }

    fn parse_queries(&self, raw: &str) -> Vec<String> {
        if let Some(parsed) =
            extract_json(raw).and_then(|v| serde_json::from_value::<RawQueries>(v).ok())
        {
            if !parsed.queries.is_empty() {
                return parsed.queries;
            }
        }
        bullet_lines(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PARSER: TwoTierParser = TwoTierParser;

    #[test]
    fn structured_planning_decision() {
        let raw = r#"{"decision": "SEARCHING", "plan": "use requests", "reason": "api unknown",
                      "missing_info": ["auth flow"], "search_queries": ["requests oauth2"]}"#;
        let decision = PARSER.parse_planning(raw);
        assert_eq!(decision.branch, PlanningBranch::Searching);
        assert_eq!(decision.plan, "use requests");
        assert_eq!(decision.search_queries, vec!["requests oauth2"]);
    }

    #[test]
    fn fenced_json_is_accepted() {
        let raw = "```json\n{\"decision\": \"CODING\", \"plan\": \"p\"}\n```";
        let decision = PARSER.parse_planning(raw);
        assert_eq!(decision.branch, PlanningBranch::Coding);
        assert_eq!(decision.plan, "p");
    }

    #[test]
    fn planning_heuristic_keywords() {
        let decision = PARSER.parse_planning("I think we need more information, searching is wise");
        assert_eq!(decision.branch, PlanningBranch::Searching);

        // Ambiguous free text defaults to the safe branch.
        let decision = PARSER.parse_planning("let's just get on with it");
        assert_eq!(decision.branch, PlanningBranch::Coding);
        assert_eq!(decision.reason, "let's just get on with it");
    }

    #[test]
    fn structured_reflection_scenario() {
        let raw = r#"{"scenario": "C", "success": false, "analysis": "wrong api", "error_details": "attr missing"}"#;
        let verdict = PARSER.parse_reflection(raw);
        assert_eq!(verdict.scenario, Scenario::KnowledgeGap);
        assert_eq!(verdict.error_details, "attr missing");
    }

    #[test]
    fn reflection_scenario_falls_back_to_success_flag() {
        let raw = r#"{"scenario": "Z", "success": true}"#;
        let verdict = PARSER.parse_reflection(raw);
        assert_eq!(verdict.scenario, Scenario::Success);
    }

    #[test]
    fn reflection_heuristic_and_default() {
        assert_eq!(
            PARSER.parse_reflection("there is a syntax error on line 3").scenario,
            Scenario::CodeFault
        );
        assert_eq!(
            PARSER.parse_reflection("clear api misuse of the client").scenario,
            Scenario::KnowledgeGap
        );
        assert_eq!(
            PARSER.parse_reflection("task completed, works as expected").scenario,
            Scenario::Success
        );
        // Malformed/ambiguous text defaults to scenario D.
        assert_eq!(
            PARSER.parse_reflection("hmm, hard to say").scenario,
            Scenario::LogicFault
        );
    }

    #[test]
    fn structured_code_plan() {
        let raw = r#"{"files": {"main.py": "print(1)", "util.py": "x = 2"},
                      "main_entry": "main.py",
                      "dependencies": ["requests"],
                      "execution_command": ["python3", "main.py"],
                      "description": "demo"}"#;
        let plan = PARSER.parse_code(raw);
        assert_eq!(plan.files.len(), 2);
        assert_eq!(plan.main_entry.as_deref(), Some("main.py"));
        assert_eq!(
            plan.execution_command,
            Some(vec!["python3".to_string(), "main.py".to_string()])
        );
    }

    #[test]
    fn code_fallback_extracts_file_markers() {
        let raw = "```python\n# File: app.py\nprint('hi')\n```";
        let plan = PARSER.parse_code(raw);
        assert_eq!(plan.files.len(), 1);
        assert!(plan.files.contains_key("app.py"));
        assert_eq!(plan.main_entry.as_deref(), Some("app.py"));
    }

    #[test]
    fn code_fallback_of_last_resort_is_whole_response() {
        let plan = PARSER.parse_code("");
        assert!(plan.files.contains_key("main.py"));
    }

    #[test]
    fn query_parsing_both_tiers() {
        let strict = PARSER.parse_queries(r#"{"queries": ["a", "b"]}"#);
        assert_eq!(strict, vec!["a", "b"]);

        let loose = PARSER.parse_queries("ideas:\n- tokio select\n* channel patterns\nnoise");
        assert_eq!(loose, vec!["tokio select", "channel patterns"]);
    }

    proptest! {
        // The parsers are a degrade-gracefully safety net: any input must
        // yield a decision without panicking.
        #[test]
        fn planning_parse_is_total(raw in ".*") {
            let _ = PARSER.parse_planning(&raw);
        }

        #[test]
        fn reflection_parse_is_total(raw in ".*") {
            let verdict = PARSER.parse_reflection(&raw);
            prop_assert!(matches!(
                verdict.scenario,
                Scenario::Success | Scenario::CodeFault | Scenario::KnowledgeGap | Scenario::LogicFault
            ));
        }

        #[test]
        fn code_parse_always_yields_files(raw in ".*") {
            let plan = PARSER.parse_code(&raw);
            prop_assert!(!plan.files.is_empty());
        }
    }
}
