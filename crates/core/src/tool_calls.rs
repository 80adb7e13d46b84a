//! Tool-Call Tracker
//!
//! Tracks every tool invocation the assistant performs while composing a
//! reply. A call moves `Active -> Completed`, stays visible for a settle
//! delay, then moves into a capped history list (oldest evicted first).
//!
//! Lifecycle signals may be duplicated or arrive for ids that were never
//! started; every transition is idempotent and unknown ids are ignored.
//! Settle timers are owned by the tracker as a FIFO of deadlines, so the
//! session loop can await them and teardown can cancel them all at once.

use crate::events::{EventSink, SessionEvent};
use crate::protocol::ToolEvent;
use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_TOOL_HISTORY_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Active,
    Completed,
}

/// What a finished tool call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(Value),
}

/// One tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Human-readable label shown while the call runs.
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub status: ToolCallStatus,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<TimeDelta>,
    pub outcome: Option<ToolOutcome>,
}

/// State machine over in-flight and recently finished tool calls.
#[derive(Debug)]
pub struct ToolCallTracker {
    active: IndexMap<String, ToolCall>,
    history: VecDeque<ToolCall>,
    /// Pending settle deadlines. All share one delay, so the queue stays sorted.
    settles: VecDeque<(Instant, String)>,
    settle_delay: Duration,
    history_cap: usize,
    events: EventSink,
}

impl ToolCallTracker {
    pub fn new(settle_delay: Duration, history_cap: usize, events: EventSink) -> Self {
        Self {
            active: IndexMap::new(),
            history: VecDeque::with_capacity(history_cap),
            settles: VecDeque::new(),
            settle_delay,
            history_cap,
            events,
        }
    }

    /// Begins tracking a call. A second start for an id already in the
    /// active set changes nothing and returns the existing entry.
    pub fn start(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> &ToolCall {
        let id = id.into();
        if self.active.contains_key(&id) {
            debug!(tool_id = %id, "Duplicate tool start ignored");
        } else {
            let call = ToolCall {
                id: id.clone(),
                name: name.into(),
                description: description.into(),
                started_at: Utc::now(),
                status: ToolCallStatus::Active,
                ended_at: None,
                duration: None,
                outcome: None,
            };
            info!(tool_id = %id, tool_name = %call.name, "Tool call started");
            self.active.insert(id.clone(), call);
            self.notify();
        }
        &self.active[&id]
    }

    /// Marks a call completed and schedules its settle.
    ///
    /// Returns `false` without side effects if the id is unknown or the call
    /// already completed.
    pub fn complete(&mut self, id: &str, outcome: Option<ToolOutcome>) -> bool {
        let Some(call) = self.active.get_mut(id) else {
            debug!(tool_id = %id, "Completion for unknown tool call ignored");
            return false;
        };
        if call.status == ToolCallStatus::Completed {
            debug!(tool_id = %id, "Duplicate tool completion ignored");
            return false;
        }

        let ended_at = Utc::now();
        let duration = (ended_at - call.started_at).max(TimeDelta::zero());
        call.status = ToolCallStatus::Completed;
        call.ended_at = Some(ended_at);
        call.duration = Some(duration);
        call.outcome = outcome;
        info!(
            tool_id = %id,
            duration_ms = duration.num_milliseconds(),
            failed = matches!(call.outcome, Some(ToolOutcome::Failure(_))),
            "Tool call completed"
        );

        self.settles
            .push_back((Instant::now() + self.settle_delay, id.to_string()));
        self.notify();
        true
    }

    /// Moves a completed call from the active set into history.
    ///
    /// A settle for a call that is gone or still running is a no-op, which is
    /// what a timer firing after teardown resolves to.
    pub fn settle(&mut self, id: &str) -> bool {
        match self.active.get(id) {
            Some(call) if call.status == ToolCallStatus::Completed => {}
            _ => return false,
        }
        let Some(call) = self.active.shift_remove(id) else {
            return false;
        };
        self.history.push_back(call);
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }
        self.notify();
        true
    }

    /// Applies one lifecycle event from the wire.
    pub fn apply(&mut self, event: ToolEvent) {
        match event {
            ToolEvent::ToolCallStart {
                tool_id,
                tool_name,
                description,
            } => {
                let description = description.unwrap_or_else(|| format!("Running {tool_name}"));
                self.start(tool_id, tool_name, description);
            }
            ToolEvent::ToolCallComplete {
                tool_id,
                result,
                error,
                ..
            } => {
                let outcome = match (error, result) {
                    (Some(error), _) => Some(ToolOutcome::Failure(error)),
                    (None, Some(result)) => Some(ToolOutcome::Success(result)),
                    (None, None) => None,
                };
                self.complete(&tool_id, outcome);
            }
        }
    }

    /// Waits for the earliest pending settle deadline and returns its id.
    ///
    /// Pends forever while nothing is scheduled. Dropping the future before
    /// it resolves leaves the queue untouched.
    pub async fn next_settle(&mut self) -> String {
        loop {
            let deadline = match self.settles.front() {
                Some((deadline, _)) => *deadline,
                None => std::future::pending::<Instant>().await,
            };
            sleep_until(deadline).await;
            if let Some((_, id)) = self.settles.pop_front() {
                return id;
            }
        }
    }

    /// Drops every scheduled settle.
    pub fn cancel_pending(&mut self) {
        if !self.settles.is_empty() {
            debug!(count = self.settles.len(), "Cancelling pending tool settles");
        }
        self.settles.clear();
    }

    pub fn pending_settles(&self) -> usize {
        self.settles.len()
    }

    pub fn get(&self, id: &str) -> Option<&ToolCall> {
        self.active.get(id)
    }

    pub fn active(&self) -> impl Iterator<Item = &ToolCall> {
        self.active.values()
    }

    pub fn history(&self) -> impl Iterator<Item = &ToolCall> {
        self.history.iter()
    }

    fn notify(&self) {
        self.events.emit(SessionEvent::ToolStateChanged {
            active: self.active.values().cloned().collect(),
        });
    }
}
