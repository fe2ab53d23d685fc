//! Text rendered for the agent, commits and pull requests.

use crate::task::domain::{CommitHash, FeedbackEntry, Task};
use minijinja::{Environment, context};
use serde::Serialize;

const PROMPT_TEMPLATE: &str = "\
{{ description }}
{%- if follow_ups %}

Follow-up requests, oldest first:
{%- for entry in follow_ups %}

[{{ loop.index }}] ({{ entry.timestamp }}, {{ entry.origin }})
{{ entry.content }}
{%- endfor %}

Apply the latest follow-up while keeping earlier requests satisfied.
{%- endif %}

You are working on branch {{ branch }}. Edit files in the working tree only; \
do not commit or push, the orchestrator does that after you finish.";

const COMMIT_TEMPLATE: &str = "\
{{ summary }}

{{ body }}

Task: {{ task_id }}
Run: {{ run }}";

const PULL_REQUEST_BODY_TEMPLATE: &str = "\
## Task

{{ description }}
{%- if follow_ups %}

## Follow-ups
{% for entry in follow_ups %}
{{ loop.index }}. {{ entry.content }}
{%- endfor %}
{%- endif %}
{%- if commit %}

## Latest commit

`{{ commit }}`
{%- endif %}

---
Branch `{{ branch }}` is managed by taskwright (task `{{ task_id }}`).";

/// Longest summary line used for commit subjects and pull request titles.
const MAX_SUMMARY_CHARS: usize = 72;

#[derive(Debug, Serialize)]
struct FeedbackView<'a> {
    timestamp: String,
    content: &'a str,
    origin: &'static str,
}

impl<'a> From<&'a FeedbackEntry> for FeedbackView<'a> {
    fn from(entry: &'a FeedbackEntry) -> Self {
        Self {
            timestamp: entry.timestamp().to_rfc3339(),
            content: entry.content(),
            origin: entry.origin().as_str(),
        }
    }
}

/// Renders the text the worker hands to the gateways.
#[derive(Debug)]
pub struct TaskTemplates {
    environment: Environment<'static>,
}

impl Default for TaskTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTemplates {
    /// Creates the renderer with the built-in templates.
    #[must_use]
    pub fn new() -> Self {
        let mut environment = Environment::new();
        environment.set_keep_trailing_newline(false);
        Self { environment }
    }

    /// Renders the instruction for the execution environment.
    ///
    /// The first feedback entry is the description itself; later entries are
    /// listed in append order.
    ///
    /// # Errors
    ///
    /// Returns the template error when rendering fails.
    pub fn prompt(&self, task: &Task) -> Result<String, minijinja::Error> {
        self.environment.render_str(
            PROMPT_TEMPLATE,
            context! {
                description => task.description(),
                branch => task.branch().as_str(),
                follow_ups => follow_ups(task),
            },
        )
    }

    /// Renders the commit message for run `run`.
    ///
    /// # Errors
    ///
    /// Returns the template error when rendering fails.
    pub fn commit_message(&self, task: &Task, run: u32) -> Result<String, minijinja::Error> {
        let latest = task
            .feedback_history()
            .last()
            .map_or_else(|| task.description(), FeedbackEntry::content);
        self.environment.render_str(
            COMMIT_TEMPLATE,
            context! {
                summary => summary_line(latest),
                body => latest,
                task_id => task.id().to_string(),
                run => run,
            },
        )
    }

    /// Returns the pull request title: the description's first line.
    #[must_use]
    pub fn pull_request_title(&self, task: &Task) -> String {
        summary_line(task.description())
    }

    /// Renders the pull request body.
    ///
    /// # Errors
    ///
    /// Returns the template error when rendering fails.
    pub fn pull_request_body(
        &self,
        task: &Task,
        commit: Option<&CommitHash>,
    ) -> Result<String, minijinja::Error> {
        self.environment.render_str(
            PULL_REQUEST_BODY_TEMPLATE,
            context! {
                description => task.description(),
                follow_ups => follow_ups(task),
                commit => commit.map(CommitHash::as_str),
                branch => task.branch().as_str(),
                task_id => task.id().to_string(),
            },
        )
    }
}

fn follow_ups(task: &Task) -> Vec<FeedbackView<'_>> {
    task.feedback_history()
        .iter()
        .skip(1)
        .map(FeedbackView::from)
        .collect()
}

/// First line of `text`, cut at a character boundary.
fn summary_line(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default().trim();
    if first.chars().count() <= MAX_SUMMARY_CHARS {
        return first.to_owned();
    }
    let mut summary: String = first.chars().take(MAX_SUMMARY_CHARS - 3).collect();
    summary.push_str("...");
    summary
}
