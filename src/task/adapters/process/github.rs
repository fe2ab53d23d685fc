//! Pull request gateway backed by the GitHub CLI (`gh`).

use super::command::{CommandOutput, run_command};
use crate::task::{
    domain::{BranchName, PullRequestRef},
    ports::{
        CreatePullRequest, PullRequestError, PullRequestErrorKind, PullRequestGateway,
        PullRequestResult,
    },
};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde::Deserialize;
use tracing::instrument;

/// Entry of `gh pr list --json url`.
#[derive(Debug, Deserialize)]
struct ListedPullRequest {
    url: String,
}

/// `gh` gateway operating on the repository at `repository`.
#[derive(Debug, Clone)]
pub struct GhCli {
    repository: Utf8PathBuf,
}

impl GhCli {
    /// Creates a gateway that runs `gh` inside `repository`.
    #[must_use]
    pub fn new(repository: impl Into<Utf8PathBuf>) -> Self {
        Self {
            repository: repository.into(),
        }
    }

    async fn gh(&self, args: &[&str]) -> PullRequestResult<CommandOutput> {
        let output = run_command("gh", args, &self.repository)
            .await
            .map_err(|err| {
                PullRequestError::new(PullRequestErrorKind::CommandFailed, err.to_string())
            })?;
        if output.success() {
            Ok(output)
        } else {
            let message = output.diagnostics();
            Err(PullRequestError::new(classify_gh_failure(&message), message))
        }
    }
}

#[async_trait]
impl PullRequestGateway for GhCli {
    #[instrument(skip(self), fields(branch = %branch))]
    async fn find_by_branch(
        &self,
        branch: &BranchName,
    ) -> PullRequestResult<Option<PullRequestRef>> {
        let output = self
            .gh(&[
                "pr", "list", "--head", branch.as_str(), "--state", "all", "--json", "url",
                "--limit", "1",
            ])
            .await?;
        parse_listed_pull_request(&output.stdout)
    }

    #[instrument(skip(self, request), fields(branch = %request.branch))]
    async fn create(&self, request: &CreatePullRequest) -> PullRequestResult<PullRequestRef> {
        let mut args = vec![
            "pr",
            "create",
            "--head",
            request.branch.as_str(),
            "--title",
            request.title.as_str(),
            "--body",
            request.body.as_str(),
        ];
        if request.draft {
            args.push("--draft");
        }
        let output = self.gh(&args).await?;
        parse_created_pull_request(&output.stdout)
    }

    #[instrument(skip(self), fields(pull_request = %pr_ref))]
    async fn mark_ready(&self, pr_ref: &PullRequestRef) -> PullRequestResult<()> {
        let selector = pr_ref
            .number()
            .map_or_else(|| pr_ref.as_str().to_owned(), |number| number.to_string());
        self.gh(&["pr", "ready", &selector]).await?;
        Ok(())
    }
}

fn parse_listed_pull_request(stdout: &str) -> PullRequestResult<Option<PullRequestRef>> {
    let listed: Vec<ListedPullRequest> = serde_json::from_str(stdout.trim()).map_err(|err| {
        PullRequestError::new(
            PullRequestErrorKind::UnparseableOutput,
            format!("{err}: {stdout}"),
        )
    })?;
    listed
        .into_iter()
        .next()
        .map(|found| to_pull_request_ref(&found.url))
        .transpose()
}

/// `gh pr create` prints progress lines followed by the new pull request URL.
fn parse_created_pull_request(stdout: &str) -> PullRequestResult<PullRequestRef> {
    let url = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| line.starts_with("https://") || line.starts_with("http://"))
        .ok_or_else(|| {
            PullRequestError::new(
                PullRequestErrorKind::UnparseableOutput,
                format!("no pull request URL in output: {stdout}"),
            )
        })?;
    to_pull_request_ref(url)
}

fn to_pull_request_ref(value: &str) -> PullRequestResult<PullRequestRef> {
    PullRequestRef::new(value).map_err(|err| {
        PullRequestError::new(PullRequestErrorKind::UnparseableOutput, err.to_string())
    })
}

/// Maps `gh` diagnostics to a failure category.
fn classify_gh_failure(message: &str) -> PullRequestErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("gh auth login")
        || lower.contains("not logged in")
        || lower.contains("authentication")
        || lower.contains("http 401")
    {
        PullRequestErrorKind::Unauthenticated
    } else if lower.contains("could not resolve to a")
        || lower.contains("no pull requests found")
        || lower.contains("not found")
    {
        PullRequestErrorKind::NotFound
    } else {
        PullRequestErrorKind::CommandFailed
    }
}
