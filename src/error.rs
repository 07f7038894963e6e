// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors raised by upstream lookups that are fatal for a whole run.

/// Exit status reported when an upstream API refused a request because of
/// missing authorization or rate limiting. Callers use it to tell "retry
/// later" apart from a hard failure.
pub const EXIT_THROTTLED: u8 = 123;

/// Exit status for every other failure.
pub const EXIT_FAILURE: u8 = 1;

/// A failed commit or commit-history lookup.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The API answered with a non-success status.
    #[error("error code {status} on {what} lookup at {url}: {body}")]
    Status { what: &'static str, url: String, status: u16, body: String },

    /// The request never produced a response.
    #[error("{what} lookup at {url} failed: {source}")]
    Transport {
        what: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body was not the expected JSON.
    #[error("{what} lookup at {url} returned an unreadable body: {reason}")]
    Decode { what: &'static str, url: String, reason: String },
}

impl LookupError {
    /// Returns true if the upstream refused the request for authorization or
    /// rate-limit reasons.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403 | 429, .. })
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_throttled() {
            EXIT_THROTTLED
        } else {
            EXIT_FAILURE
        }
    }
}

/// Picks the process exit status for a failed run: the status of the first
/// [`LookupError`] in the chain, or [`EXIT_FAILURE`].
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<LookupError>())
        .map(LookupError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Context as _;

    fn status(code: u16) -> LookupError {
        LookupError::Status {
            what: "commits",
            url: "https://api.github.com/repos/o/r/commits".to_string(),
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn forbidden_and_rate_limited_are_throttled() {
        assert_eq!(status(403).exit_code(), EXIT_THROTTLED);
        assert_eq!(status(429).exit_code(), EXIT_THROTTLED);
        assert_eq!(status(401).exit_code(), EXIT_THROTTLED);
        assert_eq!(status(404).exit_code(), EXIT_FAILURE);
        assert_eq!(status(500).exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn exit_code_found_through_context() {
        let err: anyhow::Result<()> = Err(status(403).into());
        let err = err.context("tagging images").unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_THROTTLED);

        let other = anyhow::anyhow!("no pool named gecko-t/win10-64");
        assert_eq!(exit_code_for(&other), EXIT_FAILURE);
    }
}
