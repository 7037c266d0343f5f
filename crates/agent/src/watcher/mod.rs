// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-watching subsystem.
//!
//! One OS watcher feeds a dispatcher that applies the cheap filters
//! (directory selector, filename regex, bounded content probe, debounce)
//! and fans admitted events out to per-rule FIFO queues. Rule workers
//! drain their queues in arrival order while a semaphore caps cross-rule
//! parallelism, so each eligible event results in exactly one operation
//! sequence (or one on-error hook).

mod debounce;
pub mod hooks;
pub mod ops;
pub mod pipeline;

pub use debounce::DebounceMap;
pub use pipeline::PipelineDeps;

use convoy_core::{
    Clock, Context, FileWatcherSettings, SystemClock, Trigger, WatchMode, WatcherRule, Workflow,
};
use notify::{RecursiveMode, Watcher};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Bytes of file prefix read for content matching.
const CONTENT_PROBE_BYTES: usize = 64 * 1024;

/// Idle debounce entries are pruned past this.
const DEBOUNCE_PRUNE_AGE: Duration = Duration::from_secs(3600);

/// Debounce window for workflow-level file triggers.
const FILE_TRIGGER_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watcher backend failed: {0}")]
    Notify(#[from] notify::Error),
}

struct CompiledRule {
    rule: WatcherRule,
    dir_regex: Option<Regex>,
    file_regex: Regex,
    content_regex: Option<Regex>,
    queue: mpsc::UnboundedSender<(PathBuf, &'static str)>,
}

/// A workflow armed directly on a directory via its `file` trigger.
struct FileTrigger {
    workflow: Workflow,
    directory: PathBuf,
}

/// A running watcher; stop() tears down tasks and the OS subscription.
pub struct WatcherHandle {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    // Held to keep the OS subscription alive.
    _watcher: notify::RecommendedWatcher,
    pub rules_active: usize,
}

impl WatcherHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Build and start the watcher from settings, rules, and the loaded
/// workflows (those with a `file` trigger get their own subscription).
///
/// Invalid rules are rejected with a log line and do not block the rest.
/// `reload-filewatcher` stops the old handle and calls this again.
pub fn spawn(
    settings: &FileWatcherSettings,
    rules: &[WatcherRule],
    workflows: &[Workflow],
    deps: PipelineDeps,
    parent_cancel: &CancellationToken,
) -> Result<WatcherHandle, WatcherError> {
    let cancel = parent_cancel.child_token();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = event_tx.send(res);
    })?;

    let recursive = if settings.scan_sub_dir {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));

    let mut compiled: Vec<Arc<CompiledRule>> = Vec::new();
    let mut tasks = Vec::new();
    let mut watch_scan_root = false;

    for rule in rules {
        if !rule.enabled {
            continue;
        }
        if let Err(e) = rule.validate() {
            tracing::warn!(rule = %rule.id, reason = %e, "rule rejected at load");
            continue;
        }
        let Some(entry) = compile_rule(rule) else { continue };

        match rule.mode {
            WatchMode::Absolute => {
                if let Err(e) = watcher.watch(Path::new(&rule.directory), recursive) {
                    tracing::warn!(rule = %rule.id, directory = %rule.directory, error = %e,
                        "cannot watch directory");
                    continue;
                }
            }
            WatchMode::Pattern => watch_scan_root = true,
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let entry = Arc::new(CompiledRule { queue: queue_tx, ..entry });
        compiled.push(Arc::clone(&entry));
        tasks.push(tokio::spawn(rule_worker(
            entry,
            queue_rx,
            deps.clone(),
            Arc::clone(&semaphore),
            cancel.clone(),
        )));
    }

    if watch_scan_root {
        if settings.scan_dir.as_os_str().is_empty() {
            tracing::warn!("pattern rules configured but scanDir is empty");
        } else if let Err(e) = watcher.watch(&settings.scan_dir, RecursiveMode::Recursive) {
            tracing::warn!(scan_dir = %settings.scan_dir.display(), error = %e,
                "cannot watch scan root");
        }
    }

    // Workflow-level file triggers subscribe alongside the rules.
    let mut file_triggers = Vec::new();
    for workflow in workflows {
        let Trigger::File { path } = &workflow.trigger else { continue };
        if !workflow.enabled {
            continue;
        }
        if let Err(e) = watcher.watch(path, recursive) {
            tracing::warn!(workflow = %workflow.id, path = %path.display(), error = %e,
                "cannot watch trigger directory");
            continue;
        }
        file_triggers.push(Arc::new(FileTrigger {
            workflow: workflow.clone(),
            directory: path.clone(),
        }));
    }

    let rules_active = compiled.len();
    tracing::info!(
        rules = rules_active,
        file_triggers = file_triggers.len(),
        max_concurrent = settings.max_concurrent,
        "file watcher started"
    );

    tasks.push(tokio::spawn(dispatcher(
        event_rx,
        compiled,
        file_triggers,
        deps,
        settings.clone(),
        cancel.clone(),
    )));

    Ok(WatcherHandle { cancel, tasks, _watcher: watcher, rules_active })
}

/// Compile a validated rule's regexes. Returns a queue-less template;
/// the caller fills in the queue sender.
fn compile_rule(rule: &WatcherRule) -> Option<CompiledRule> {
    let file_regex = Regex::new(&rule.file_pattern).ok()?;
    let dir_regex = match rule.mode {
        WatchMode::Pattern => Some(Regex::new(&rule.directory).ok()?),
        WatchMode::Absolute => None,
    };
    let content_regex = match &rule.content_pattern {
        Some(pattern) => Some(Regex::new(pattern).ok()?),
        None => None,
    };
    let (placeholder, _) = mpsc::unbounded_channel();
    Some(CompiledRule {
        rule: rule.clone(),
        dir_regex,
        file_regex,
        content_regex,
        queue: placeholder,
    })
}

async fn dispatcher(
    mut events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    rules: Vec<Arc<CompiledRule>>,
    file_triggers: Vec<Arc<FileTrigger>>,
    deps: PipelineDeps,
    settings: FileWatcherSettings,
    cancel: CancellationToken,
) {
    let debounce = DebounceMap::new(SystemClock);
    let mut prune_tick = tokio::time::interval(DEBOUNCE_PRUNE_AGE);
    prune_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = prune_tick.tick() => debounce.prune(DEBOUNCE_PRUNE_AGE),
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    Ok(event) => {
                        let Some(kind) = event_kind_tag(&event.kind) else { continue };
                        for path in &event.paths {
                            dispatch_path(&rules, &settings, &debounce, path, kind).await;
                            dispatch_file_triggers(
                                &file_triggers,
                                &settings,
                                &debounce,
                                &deps,
                                path,
                                kind,
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "watch backend error");
                    }
                }
            }
        }
    }
}

/// Fire workflow-level file triggers; executions run concurrently.
fn dispatch_file_triggers(
    triggers: &[Arc<FileTrigger>],
    settings: &FileWatcherSettings,
    debounce: &DebounceMap<SystemClock>,
    deps: &PipelineDeps,
    path: &Path,
    kind: &'static str,
) {
    let Some(parent) = path.parent() else { return };
    for trigger in triggers {
        let in_scope = if settings.scan_sub_dir {
            parent.starts_with(&trigger.directory)
        } else {
            parent == trigger.directory
        };
        if !in_scope {
            continue;
        }
        let key = format!("wf:{}", trigger.workflow.id);
        if !debounce.admit(&key, path, FILE_TRIGGER_COOLDOWN) {
            continue;
        }
        let context = file_trigger_context(path, kind);
        let executor = deps.executor.clone();
        let workflow = trigger.workflow.clone();
        tracing::info!(workflow = %workflow.id, path = %path.display(), "file trigger fired");
        tokio::spawn(async move {
            executor.execute(&workflow, context).await;
        });
    }
}

fn file_trigger_context(path: &Path, event: &str) -> Context {
    let mut context = Context::new();
    context.insert("trigger", serde_json::json!("file"));
    context.insert("file", serde_json::json!(path.display().to_string()));
    context.insert("filePath", serde_json::json!(path.display().to_string()));
    context.insert(
        "fileName",
        serde_json::json!(
            path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
        ),
    );
    context.insert(
        "directory",
        serde_json::json!(path.parent().map(|p| p.display().to_string()).unwrap_or_default()),
    );
    context.insert("event", serde_json::json!(event));
    context.insert("timestamp", serde_json::Value::from(SystemClock.epoch_ms()));
    context
}

fn event_kind_tag(kind: &notify::EventKind) -> Option<&'static str> {
    match kind {
        notify::EventKind::Create(_) => Some("create"),
        notify::EventKind::Modify(_) => Some("modify"),
        _ => None,
    }
}

/// Stages 1-4: path filter, name filter, content filter, debounce.
async fn dispatch_path(
    rules: &[Arc<CompiledRule>],
    settings: &FileWatcherSettings,
    debounce: &DebounceMap<SystemClock>,
    path: &Path,
    kind: &'static str,
) {
    let Some(parent) = path.parent() else { return };
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else { return };

    for entry in rules {
        if !directory_matches(entry, settings, parent) {
            continue;
        }
        if !entry.file_regex.is_match(file_name) {
            continue;
        }
        if let Some(content_regex) = &entry.content_regex {
            if !content_matches(path, content_regex).await {
                continue;
            }
        }
        let cooldown = Duration::from_secs(entry.rule.processing.cooldown_secs);
        if !debounce.admit(&entry.rule.id, path, cooldown) {
            tracing::trace!(rule = %entry.rule.id, path = %path.display(), "debounced");
            continue;
        }
        if entry.queue.send((path.to_path_buf(), kind)).is_err() {
            tracing::warn!(rule = %entry.rule.id, "rule worker is gone");
        }
    }
}

fn directory_matches(
    entry: &CompiledRule,
    settings: &FileWatcherSettings,
    parent: &Path,
) -> bool {
    match entry.rule.mode {
        WatchMode::Absolute => {
            let base = Path::new(&entry.rule.directory);
            if settings.scan_sub_dir {
                parent.starts_with(base)
            } else {
                parent == base
            }
        }
        WatchMode::Pattern => {
            let Some(regex) = &entry.dir_regex else { return false };
            let relative = parent.strip_prefix(&settings.scan_dir).unwrap_or(parent);
            regex.is_match(&relative.to_string_lossy())
        }
    }
}

/// Match the content regex against a bounded prefix, read-only.
async fn content_matches(path: &Path, regex: &Regex) -> bool {
    let Ok(mut file) = tokio::fs::File::open(path).await else { return false };
    let mut buffer = vec![0u8; CONTENT_PROBE_BYTES];
    let mut filled = 0;
    loop {
        match file.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                if filled == buffer.len() {
                    break;
                }
            }
            Err(_) => return false,
        }
    }
    regex.is_match(&String::from_utf8_lossy(&buffer[..filled]))
}

/// Drain one rule's queue in arrival order, gated by the shared
/// semaphore, honoring the inter-file delay.
async fn rule_worker(
    entry: Arc<CompiledRule>,
    mut queue: mpsc::UnboundedReceiver<(PathBuf, &'static str)>,
    deps: PipelineDeps,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = queue.recv() => item,
        };
        let Some((path, event)) = item else { break };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = semaphore.acquire() => permit,
        };
        let Ok(_permit) = permit else { break };

        pipeline::process_file(&deps, &entry.rule, &path, event, &cancel).await;

        let delay = entry.rule.processing.delay_next_file_secs;
        if delay > 0 && !pipeline::sleep_cancellable(Duration::from_secs(delay), &cancel).await {
            break;
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
