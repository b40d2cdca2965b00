use serde::Deserialize;
use serde_json::json;

use crate::assess::RiskLevel;
use crate::date_util::{strip_code_fences, AGGREGATE_WINDOW_DAYS};
use crate::llm::wire::{
    ChatMessage, ChatRequest, ChatResponse, FunctionDefinition, ToolChoice, ToolDefinition,
};
use crate::metrics::MetricAggregate;

pub const PROMPT_VERSION: &str = "risk-v1";
pub const TOOL_NAME: &str = "submit_risk_assessments";
pub const MAX_ASSESSMENTS: usize = 20;
pub const MIN_RISK_SCORE: u64 = 1;
pub const MAX_RISK_SCORE: u64 = 100;

const SYSTEM_PROMPT: &str = "You are a health analytics AI. Analyze health metrics and provide \
risk assessments. Be helpful but remind users to consult healthcare professionals for medical advice.";

/// A validated assessment as returned by the model, before it is tagged with
/// an owner and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentDraft {
    pub condition: String,
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub description: String,
}

/// Render the aggregate into the analysis request text. Absent fields read
/// "N/A".
pub fn build_prompt(agg: &MetricAggregate) -> String {
    let show = |v: Option<i64>| v.map_or_else(|| "N/A".to_string(), |v| v.to_string());

    format!(
        r#"Analyze these health metrics and provide risk assessments:

Average metrics over the last {days} days:
- Heart Rate: {hr} bpm
- Blood Pressure: {sys}/{dia} mmHg
- Sleep Hours: {sleep} hours
- Sleep Quality: {quality}/10
- Stress Level: {stress}/10
- Daily Steps: {steps}
- Hydration: {hydration}%
- Energy Level: {energy}/10

Based on these metrics, identify health risk areas. For each risk, provide:
1. Condition name (e.g., "Cardiovascular Health", "Sleep Quality", "Stress Management")
2. Risk level: "low", "moderate", or "high"
3. Risk score from 1-100
4. Brief description of the concern and recommendation"#,
        days = AGGREGATE_WINDOW_DAYS,
        hr = show(agg.heart_rate),
        sys = show(agg.blood_pressure_systolic),
        dia = show(agg.blood_pressure_diastolic),
        sleep = show(agg.sleep_hours),
        quality = show(agg.sleep_quality),
        stress = show(agg.stress_level),
        steps = show(agg.steps),
        hydration = show(agg.hydration),
        energy = show(agg.energy_level),
    )
}

/// JSON schema of the tool arguments. Responses are checked against the
/// same constraints in [`validate_arguments`].
pub fn tool_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "assessments": {
                "type": "array",
                "maxItems": MAX_ASSESSMENTS,
                "items": {
                    "type": "object",
                    "properties": {
                        "condition": {
                            "type": "string",
                            "description": "Name of the health condition or area"
                        },
                        "risk_level": {
                            "type": "string",
                            "enum": ["low", "moderate", "high"]
                        },
                        "risk_score": {
                            "type": "integer",
                            "minimum": MIN_RISK_SCORE,
                            "maximum": MAX_RISK_SCORE
                        },
                        "description": {
                            "type": "string",
                            "description": "Brief description and recommendation"
                        }
                    },
                    "required": ["condition", "risk_level", "risk_score", "description"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["assessments"],
        "additionalProperties": false
    })
}

/// The full chat request for one analysis, forcing the assessment tool.
pub fn build_request(model: &str, agg: &MetricAggregate) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_prompt(agg)),
        ],
        tools: vec![ToolDefinition {
            kind: "function".into(),
            function: FunctionDefinition {
                name: TOOL_NAME.into(),
                description: "Submit health risk assessments based on analyzed metrics".into(),
                parameters: tool_schema(),
            },
        }],
        tool_choice: ToolChoice::function(TOOL_NAME),
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolArguments {
    assessments: Vec<RawAssessment>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAssessment {
    condition: String,
    risk_level: RiskLevel,
    risk_score: serde_json::Number,
    description: String,
}

/// Extract assessments from a completion response.
///
/// Exactly one call to [`TOOL_NAME`] whose arguments satisfy the schema is
/// accepted. Anything else yields no assessments; the caller never sees a
/// parse error.
pub fn parse_assessments(response: &ChatResponse) -> Vec<AssessmentDraft> {
    let calls = response.tool_calls();
    let call = match calls {
        [call] => call,
        [] => {
            log::warn!("Completion returned no tool call; no assessments produced");
            return Vec::new();
        }
        many => {
            log::warn!(
                "Completion returned {} tool calls, expected one; no assessments produced",
                many.len()
            );
            return Vec::new();
        }
    };

    if call.function.name != TOOL_NAME {
        log::warn!("Unexpected tool call {}; no assessments produced", call.function.name);
        return Vec::new();
    }

    match validate_arguments(&call.function.arguments) {
        Ok(drafts) => drafts,
        Err(reason) => {
            log::warn!("Rejected tool call arguments ({PROMPT_VERSION}): {reason}");
            Vec::new()
        }
    }
}

/// Decode and validate the tool-call argument document as a whole batch.
pub fn validate_arguments(raw: &str) -> Result<Vec<AssessmentDraft>, String> {
    let args: ToolArguments = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| format!("arguments do not match schema: {e}"))?;

    if args.assessments.len() > MAX_ASSESSMENTS {
        return Err(format!(
            "{} assessments exceeds the maximum of {MAX_ASSESSMENTS}",
            args.assessments.len()
        ));
    }

    args.assessments
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let condition = raw.condition.trim().to_string();
            if condition.is_empty() {
                return Err(format!("assessment {i}: empty condition"));
            }
            let risk_score = integer_score(&raw.risk_score).ok_or_else(|| {
                format!(
                    "assessment {i}: risk_score {} is not an integer in 1-100",
                    raw.risk_score
                )
            })?;
            Ok(AssessmentDraft {
                condition,
                risk_level: raw.risk_level,
                risk_score,
                description: raw.description.trim().to_string(),
            })
        })
        .collect()
}

fn integer_score(n: &serde_json::Number) -> Option<u8> {
    let value = match n.as_u64() {
        Some(v) => v,
        None => {
            let f = n.as_f64()?;
            if f.fract() != 0.0 || f < 0.0 {
                return None;
            }
            f as u64
        }
    };
    (MIN_RISK_SCORE..=MAX_RISK_SCORE)
        .contains(&value)
        .then_some(value as u8)
}
