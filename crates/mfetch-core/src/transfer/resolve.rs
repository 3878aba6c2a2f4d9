//! Fetch URL and local path resolution for a [`Source`].

use std::path::{Component, Path};
use url::Url;

use crate::job::Source;
use crate::retry::TransferError;

/// `{endpoint}/{repo_id}/resolve/{revision}/{filename}`, each path segment percent-encoded.
pub fn resolve_url(endpoint: &Url, revision: &str, source: &Source) -> Result<Url, TransferError> {
    check_segments("repository id", &source.repo_id)?;
    check_segments("filename", &source.filename)?;
    check_segments("revision", revision)?;

    let mut url = endpoint.clone();
    {
        let mut segs = url.path_segments_mut().map_err(|_| {
            TransferError::InvalidSource(format!("endpoint {} cannot be a base", endpoint))
        })?;
        segs.pop_if_empty();
        segs.extend(source.repo_id.split('/'));
        segs.push("resolve");
        segs.push(revision);
        segs.extend(source.filename.split('/'));
    }
    Ok(url)
}

/// Reject empty, `.` and `..` segments so the filename cannot escape the model dir.
fn check_segments(what: &str, value: &str) -> Result<(), TransferError> {
    if value.is_empty() {
        return Err(TransferError::InvalidSource(format!("empty {}", what)));
    }
    let bad = value
        .split('/')
        .any(|s| s.is_empty() || s == "." || s == ".." || s.contains('\\'));
    if bad || Path::new(value).components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(TransferError::InvalidSource(format!("bad {}: {:?}", what, value)));
    }
    Ok(())
}
