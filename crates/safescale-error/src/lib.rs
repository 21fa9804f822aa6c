//! Error taxonomy and classifier for SafeScale (component C1).
//!
//! Every fallible core operation returns a [`SafeScaleError`]: a typed
//! `kind`, a message, an optional wrapped cause, and a list of
//! `consequences` accumulated by rollback when cleanup itself fails.
//! [`HttpClassifier`] is the single knob every provider call uses to turn a
//! raw HTTP status code into one of these kinds.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SafeScaleError>;

/// The error kind taxonomy (spec §4.1). `thiserror` derives `Display`, the
/// same split the teacher draws between library crates (`thiserror`) and
/// binary/glue code (`anyhow`) — `SafeScaleError` itself stays a plain
/// struct so it can carry a cause chain and a consequences list alongside
/// the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("NotFound")]
    NotFound,
    #[error("Duplicate")]
    Duplicate,
    #[error("InvalidRequest")]
    InvalidRequest,
    #[error("NotAuthenticated")]
    NotAuthenticated,
    #[error("Forbidden")]
    Forbidden,
    #[error("Timeout")]
    Timeout,
    #[error("Overload")]
    Overload,
    #[error("Execution")]
    Execution,
    #[error("NotAvailable")]
    NotAvailable,
    #[error("NotImplemented")]
    NotImplemented,
    #[error("Syntax")]
    Syntax,
    #[error("Inconsistent")]
    Inconsistent,
    #[error("Aborted")]
    Aborted,
    #[error("AlteredNothing")]
    AlteredNothing,
    /// Aggregate of several errors encountered in the same operation (e.g.
    /// a TaskGroup join where more than one child failed).
    #[error("List")]
    List,
    /// Not part of the original taxonomy: a user-code panic captured at a
    /// Task boundary (spec §7) is converted to this kind rather than
    /// escaping the Task.
    #[error("Runtime")]
    Runtime,
}

/// The workspace-wide error type. A struct, not a bare enum: the taxonomy
/// kind is orthogonal to the cause chain and the consequences list, and
/// every core crate needs all three.
///
/// The cause is held behind an `Arc` rather than a `Box` so the error itself
/// stays `Clone` — `safescale-task` caches a `Result<T>` once a Task settles
/// and hands it back to every later `wait`/`tryWait` caller.
#[derive(Debug, Clone)]
pub struct SafeScaleError {
    pub kind: ErrorKind,
    pub message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    consequences: Vec<SafeScaleError>,
}

impl SafeScaleError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            consequences: Vec::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, message)
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAvailable, message)
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Inconsistent, message)
    }

    /// Build a `List` error aggregating several independent failures (e.g.
    /// a TaskGroup join). Each member renders as `"<label>: <msg>"`.
    pub fn list(labeled: Vec<(String, SafeScaleError)>) -> Self {
        let message = labeled
            .iter()
            .map(|(label, err)| format!("{label}: {err}"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut e = Self::new(ErrorKind::List, message);
        e.consequences = labeled.into_iter().map(|(_, err)| err).collect();
        e
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Accumulate a secondary failure encountered during rollback. The
    /// primary error (`self`) is still what callers see and match on; the
    /// consequence is attached for diagnostics.
    pub fn add_consequence(&mut self, err: SafeScaleError) {
        self.consequences.push(err);
    }

    pub fn consequences(&self) -> &[SafeScaleError] {
        &self.consequences
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for SafeScaleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        let mut cause = self.source.as_ref().map(|s| s.as_ref() as &dyn fmt::Display);
        while let Some(c) = cause {
            write!(f, " (caused by: {c})")?;
            cause = None;
        }
        if !self.consequences.is_empty() {
            write!(f, "; consequences: [")?;
            for (i, c) in self.consequences.iter().enumerate() {
                if i > 0 {
                    write!(f, "; ")?;
                }
                write!(f, "{c}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

impl std::error::Error for SafeScaleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Wraps an error so a [`crate::retry`]-style loop surfaces it without
/// further attempts (spec §4.2 `StopRetry`). The retry engine itself lives
/// in `safescale-retry`; this crate just defines the `Aborted` kind it
/// looks for.
pub fn stop_retry(err: SafeScaleError) -> SafeScaleError {
    if err.kind == ErrorKind::Aborted {
        err
    } else {
        let message = err.message.clone();
        SafeScaleError::new(ErrorKind::Aborted, message).with_boxed_source(err)
    }
}

impl SafeScaleError {
    fn with_boxed_source(mut self, err: SafeScaleError) -> Self {
        self.source = Some(Arc::new(err));
        self
    }
}

// ─── HTTP classifier ──────────────────────────────────────────────────────────

/// Maps a provider HTTP status code to a taxonomy kind (spec §4.1 table).
pub fn classify_http_code(code: u16) -> ErrorKind {
    match code {
        400 | 409 => ErrorKind::InvalidRequest,
        401 => ErrorKind::NotAuthenticated,
        403 => ErrorKind::Forbidden,
        404 | 410 => ErrorKind::NotFound,
        408 => ErrorKind::Timeout,
        425 | 429 => ErrorKind::Overload,
        500 => ErrorKind::Execution,
        503 | 504 => ErrorKind::NotAvailable,
        _ => ErrorKind::Execution,
    }
}

/// The verdict a classifier reaches for a given HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Treated as success (nil error).
    Success,
    /// Wrapped via [`classify_http_code`] and surfaced to the caller.
    Transparent,
    /// Wrapped as `Aborted` — the retry loop using this classifier stops.
    Abort,
    /// Fell through to the default handler.
    Default,
}

/// A reusable per-call classifier: three code lists plus a default handler.
/// This is the single knob every provider call uses (spec §4.1).
pub struct HttpClassifier {
    success_codes: Vec<u16>,
    transparent_codes: Vec<u16>,
    abort_codes: Vec<u16>,
}

impl HttpClassifier {
    pub fn new(success_codes: Vec<u16>, transparent_codes: Vec<u16>, abort_codes: Vec<u16>) -> Self {
        Self {
            success_codes,
            transparent_codes,
            abort_codes,
        }
    }

    /// Default classifier used when a call has no special-cased codes.
    pub fn default_classifier() -> Self {
        Self::new(vec![200, 201, 202, 204], vec![], vec![400, 401, 403, 404, 409, 410])
    }

    pub fn verdict(&self, code: u16) -> Verdict {
        if self.success_codes.contains(&code) {
            Verdict::Success
        } else if self.abort_codes.contains(&code) {
            Verdict::Abort
        } else if self.transparent_codes.contains(&code) {
            Verdict::Transparent
        } else {
            Verdict::Default
        }
    }

    /// Apply the classifier to a `(code, message)` pair, producing `Ok(())`
    /// for success, or the appropriately-kinded error otherwise.
    pub fn classify(&self, code: u16, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        match self.verdict(code) {
            Verdict::Success => Ok(()),
            Verdict::Abort => Err(SafeScaleError::new(
                ErrorKind::Aborted,
                format!("provider returned {code}: {message}"),
            )),
            Verdict::Transparent | Verdict::Default => Err(SafeScaleError::new(
                classify_http_code(code),
                format!("provider returned {code}: {message}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_code_table() {
        assert_eq!(classify_http_code(400), ErrorKind::InvalidRequest);
        assert_eq!(classify_http_code(409), ErrorKind::InvalidRequest);
        assert_eq!(classify_http_code(401), ErrorKind::NotAuthenticated);
        assert_eq!(classify_http_code(403), ErrorKind::Forbidden);
        assert_eq!(classify_http_code(404), ErrorKind::NotFound);
        assert_eq!(classify_http_code(410), ErrorKind::NotFound);
        assert_eq!(classify_http_code(408), ErrorKind::Timeout);
        assert_eq!(classify_http_code(425), ErrorKind::Overload);
        assert_eq!(classify_http_code(429), ErrorKind::Overload);
        assert_eq!(classify_http_code(500), ErrorKind::Execution);
        assert_eq!(classify_http_code(503), ErrorKind::NotAvailable);
        assert_eq!(classify_http_code(504), ErrorKind::NotAvailable);
    }

    #[test]
    fn test_classifier_abort_codes_stop_retry() {
        let classifier = HttpClassifier::new(vec![200], vec![], vec![409]);
        let err = classifier.classify(409, "name collision").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Aborted);
    }

    #[test]
    fn test_classifier_success_codes_are_nil() {
        let classifier = HttpClassifier::default_classifier();
        assert!(classifier.classify(200, "ok").is_ok());
    }

    #[test]
    fn test_add_consequence_renders_in_display() {
        let mut primary = SafeScaleError::not_found("host h1");
        primary.add_consequence(SafeScaleError::invalid_request("sg unbind failed"));
        let rendered = primary.to_string();
        assert!(rendered.contains("NotFound"));
        assert!(rendered.contains("consequences"));
        assert!(rendered.contains("sg unbind failed"));
    }

    #[test]
    fn test_list_error_joins_labeled_members() {
        let err = SafeScaleError::list(vec![
            ("node-0".to_string(), SafeScaleError::timeout("no response")),
            ("node-1".to_string(), SafeScaleError::not_found("gone")),
        ]);
        assert_eq!(err.kind, ErrorKind::List);
        assert!(err.message.contains("node-0: Timeout"));
        assert!(err.message.contains("node-1: NotFound"));
    }

    #[test]
    fn test_stop_retry_wraps_as_aborted() {
        let err = SafeScaleError::not_available("still provisioning");
        let aborted = stop_retry(err);
        assert_eq!(aborted.kind, ErrorKind::Aborted);
    }

    #[test]
    fn test_stop_retry_idempotent_on_already_aborted() {
        let err = SafeScaleError::aborted("already stopped");
        let again = stop_retry(err);
        assert_eq!(again.kind, ErrorKind::Aborted);
    }
}
