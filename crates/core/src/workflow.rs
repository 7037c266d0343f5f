// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow definitions: a trigger plus a directed acyclic graph of steps.
//!
//! Workflows are authored externally and arrive as JSON documents in the
//! config repo. Load-time validation rejects duplicate or dangling step
//! references and cycles; a rejected workflow never reaches the executor
//! while the rest of the table stays active.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

/// How a workflow execution is initiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    /// Fire on file events beneath a directory (legacy single-directory form).
    #[serde(rename_all = "camelCase")]
    File { path: PathBuf },
    /// Fire when invoked from a file-watcher rule hook.
    Filewatcher,
    /// Fire on a fixed interval.
    #[serde(rename_all = "camelCase")]
    Schedule { interval_seconds: u64 },
    /// Reserved; rejected at load.
    Webhook,
    /// Fire on explicit request with caller-supplied context.
    Manual,
}

impl Trigger {
    /// Short tag for status displays and trigger context seeding.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::File { .. } => "file",
            Trigger::Filewatcher => "filewatcher",
            Trigger::Schedule { .. } => "schedule",
            Trigger::Webhook => "webhook",
            Trigger::Manual => "manual",
        }
    }
}

/// One unit of work inside a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the workflow.
    pub id: String,
    /// Step implementation tag, e.g. `copy-file`.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Display name for operators.
    #[serde(default)]
    pub name: String,
    /// Free-form config; templates are substituted before invocation.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Successors on success.
    #[serde(default)]
    pub next: Vec<String>,
    /// Successors on error.
    #[serde(default, rename = "onError")]
    pub on_error: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub trigger: Trigger,
    /// Step ids the executor seeds its queue with; defaults to the first step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_steps: Option<Vec<String>>,
    pub steps: Vec<Step>,
}

fn default_enabled() -> bool {
    true
}

/// Named load-time rejection reasons.
#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("workflow {workflow}: no steps defined")]
    Empty { workflow: String },

    #[error("workflow {workflow}: duplicate step id {step}")]
    DuplicateStepId { workflow: String, step: String },

    #[error("workflow {workflow}: step {step} references unknown step {target}")]
    UnknownReference {
        workflow: String,
        step: String,
        target: String,
    },

    #[error("workflow {workflow}: start step {step} is not defined")]
    UnknownStartStep { workflow: String, step: String },

    #[error("workflow {workflow}: step graph contains a cycle through {step}")]
    Cycle { workflow: String, step: String },

    #[error("workflow {workflow}: webhook triggers are reserved")]
    WebhookReserved { workflow: String },
}

impl Workflow {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The executor's initial queue: `startSteps` if given, else the
    /// first declared step.
    pub fn start_step_ids(&self) -> Vec<&str> {
        match &self.start_steps {
            Some(ids) if !ids.is_empty() => ids.iter().map(String::as_str).collect(),
            _ => self.steps.first().map(|s| s.id.as_str()).into_iter().collect(),
        }
    }

    /// Validate structure: non-empty, unique step ids, resolvable
    /// references, acyclic graph, and a supported trigger.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if matches!(self.trigger, Trigger::Webhook) {
            return Err(WorkflowError::WebhookReserved { workflow: self.id.clone() });
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::Empty { workflow: self.id.clone() });
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(WorkflowError::DuplicateStepId {
                    workflow: self.id.clone(),
                    step: step.id.clone(),
                });
            }
        }

        for step in &self.steps {
            for target in step.next.iter().chain(&step.on_error) {
                if !ids.contains(target.as_str()) {
                    return Err(WorkflowError::UnknownReference {
                        workflow: self.id.clone(),
                        step: step.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        if let Some(start) = &self.start_steps {
            for id in start {
                if !ids.contains(id.as_str()) {
                    return Err(WorkflowError::UnknownStartStep {
                        workflow: self.id.clone(),
                        step: id.clone(),
                    });
                }
            }
        }

        self.check_acyclic()
    }

    /// Depth-first search with a three-color marking; grey-on-grey is a cycle.
    fn check_acyclic(&self) -> Result<(), WorkflowError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let adjacency: HashMap<&str, Vec<&str>> = self
            .steps
            .iter()
            .map(|s| {
                let out: Vec<&str> = s
                    .next
                    .iter()
                    .chain(&s.on_error)
                    .map(String::as_str)
                    .collect();
                (s.id.as_str(), out)
            })
            .collect();

        let mut marks: HashMap<&str, Mark> =
            self.steps.iter().map(|s| (s.id.as_str(), Mark::White)).collect();

        for root in self.steps.iter().map(|s| s.id.as_str()) {
            if marks.get(root) != Some(&Mark::White) {
                continue;
            }
            // Explicit stack: (node, next-edge cursor)
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
            marks.insert(root, Mark::Grey);
            while let Some((node, cursor)) = stack.pop() {
                let out = adjacency.get(node).map(Vec::as_slice).unwrap_or_default();
                if cursor < out.len() {
                    stack.push((node, cursor + 1));
                    let target = out[cursor];
                    match marks.get(target) {
                        Some(Mark::Grey) => {
                            return Err(WorkflowError::Cycle {
                                workflow: self.id.clone(),
                                step: target.to_string(),
                            });
                        }
                        Some(Mark::White) => {
                            marks.insert(target, Mark::Grey);
                            stack.push((target, 0));
                        }
                        _ => {}
                    }
                } else {
                    marks.insert(node, Mark::Black);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
