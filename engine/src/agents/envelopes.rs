//! Role envelope parsing
//!
//! Turns raw model text into the typed per-role structures, handling the
//! usual output drift (markdown fences, prose around the JSON, missing
//! optional fields). Parse failures are reported as strings so the roster
//! can classify them as retryable.

use super::{Execution, Plan, PlanStep, Proposal, Verification};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Intermediate deserialization type for plan steps, tolerant of omissions
#[derive(Debug, Deserialize)]
struct RawPlanStep {
    id: Option<String>,
    intent: String,
    #[serde(default)]
    inputs: serde_json::Value,
    expected_output: Option<String>,
}

/// Extract the first JSON object or array from model text.
///
/// Accepts raw JSON, fenced JSON, and JSON embedded in prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    for open in ['{', '['] {
        if trimmed.starts_with(open) {
            return Some(trimmed);
        }
    }

    // Fenced block
    if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        if let Some(newline) = after.find('\n') {
            let body = &after[newline + 1..];
            if let Some(close) = body.find("```") {
                return Some(body[..close].trim());
            }
        }
    }

    // Embedded object or array: take from the first bracket to the last
    // matching close; serde will reject imbalance
    let start = trimmed.find(['{', '['])?;
    let end = trimmed.rfind(['}', ']'])?;
    if start < end {
        Some(&trimmed[start..=end])
    } else {
        None
    }
}

/// Parse the Proposer envelope
pub fn parse_proposal(text: &str) -> Result<Proposal, String> {
    let json = extract_json(text).ok_or("no JSON object in proposer output")?;
    serde_json::from_str(json).map_err(|e| format!("malformed proposal: {}", e))
}

/// Check the Proposer echoed only entities from the selected set
pub fn validate_proposal(proposal: &Proposal, selected: &BTreeSet<String>) -> Result<(), String> {
    let offending: Vec<&String> = proposal
        .required_entities
        .iter()
        .filter(|name| !selected.contains(*name))
        .collect();
    if offending.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "proposal requires entities outside the selected set: {:?}",
            offending
        ))
    }
}

/// Parse the Planner envelope, assigning ids where the model omitted them
pub fn parse_plan(text: &str) -> Result<Plan, String> {
    let json = extract_json(text).ok_or("no JSON in planner output")?;

    // Either a bare array of steps or {"steps": [...]}
    let raw_steps: Vec<RawPlanStep> = match serde_json::from_str::<Vec<RawPlanStep>>(json) {
        Ok(steps) => steps,
        Err(_) => {
            #[derive(Deserialize)]
            struct Wrapper {
                steps: Vec<RawPlanStep>,
            }
            serde_json::from_str::<Wrapper>(json)
                .map(|w| w.steps)
                .map_err(|e| format!("malformed plan: {}", e))?
        }
    };

    if raw_steps.is_empty() {
        return Err("plan has no steps".to_string());
    }

    let steps = raw_steps
        .into_iter()
        .enumerate()
        .map(|(i, raw)| PlanStep {
            id: raw.id.unwrap_or_else(|| format!("step_{}", i + 1)),
            intent: raw.intent,
            inputs: raw.inputs,
            expected_output: raw
                .expected_output
                .unwrap_or_else(|| "Step completed".to_string()),
        })
        .collect();

    Ok(Plan { steps })
}

/// Parse the Executor envelope
pub fn parse_execution(text: &str) -> Result<Execution, String> {
    let json = extract_json(text).ok_or("no JSON in executor output")?;

    match serde_json::from_str::<Execution>(json) {
        Ok(execution) => Ok(execution),
        Err(_) => {
            // Bare array form
            serde_json::from_str(json)
                .map(|steps| Execution { steps })
                .map_err(|e| format!("malformed execution: {}", e))
        }
    }
}

/// Check the Executor preserved planner step ids and their order
pub fn validate_execution(execution: &Execution, expected_ids: &[String]) -> Result<(), String> {
    let got: Vec<&str> = execution.steps.iter().map(|s| s.id.as_str()).collect();
    let want: Vec<&str> = expected_ids.iter().map(|s| s.as_str()).collect();
    if got == want {
        Ok(())
    } else {
        Err(format!(
            "executor changed step ids or order: expected {:?}, got {:?}",
            want, got
        ))
    }
}

/// Parse the Verifier envelope
pub fn parse_verification(text: &str) -> Result<Verification, String> {
    let json = extract_json(text).ok_or("no JSON in verifier output")?;
    serde_json::from_str(json).map_err(|e| format!("malformed verification: {}", e))
}
