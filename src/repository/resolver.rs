//! Project-aware lookup of a repository by URL
//!
//! The same normalized URL may be registered once per project. Callers that
//! only have a URL go through [`resolve`] to pick the record they mean.

use super::models::RepositoryView;
use crate::error::ServerError;
use url::Url;

/// `user@host:path` without a scheme
fn is_scp_style(repo: &str) -> bool {
    if repo.contains("://") {
        return false;
    }
    match repo.split_once(':') {
        Some((host_part, _)) => host_part.contains('@') && !host_part.contains('/'),
        None => false,
    }
}

/// Canonical form used for URL equality.
///
/// Lowercases, rewrites scp-style SSH addresses to `ssh://`, strips trailing
/// slashes and a `.git` suffix, and drops default ports.
pub fn normalize_url(raw: &str) -> String {
    let mut repo = raw.trim().to_lowercase();
    if is_scp_style(&repo) {
        repo = format!("ssh://{}", repo.replacen(':', "/", 1));
    }

    let trimmed = repo.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let trimmed = trimmed.trim_end_matches('/');

    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            if parsed.scheme() == "ssh" && parsed.port() == Some(22) {
                let _ = parsed.set_port(None);
            }
            parsed.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Pick the repository a caller means by `(requested_url, requested_project)`.
///
/// No URL match is reported as permission denied so callers cannot probe for
/// existence. A single match is returned when no project was requested; as
/// soon as a project is given or the URL is ambiguous, the project must match.
pub fn resolve<'a>(
    candidates: &'a [RepositoryView],
    requested_url: &str,
    requested_project: &str,
) -> Result<&'a RepositoryView, ServerError> {
    let wanted = normalize_url(requested_url);
    let matches: Vec<&RepositoryView> = candidates
        .iter()
        .filter(|c| normalize_url(&c.repo) == wanted)
        .collect();

    if matches.is_empty() {
        return Err(ServerError::permission_denied());
    }

    if matches.len() == 1 && requested_project.is_empty() {
        return Ok(matches[0]);
    }

    matches
        .into_iter()
        .find(|c| c.project == requested_project)
        .ok_or_else(|| {
            ServerError::not_found(format!(
                "repository not found for url {:?} and project {:?}",
                requested_url, requested_project
            ))
        })
}
