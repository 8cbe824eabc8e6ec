//! Findings of a verify pass
//!
//! Verifiers never stop at the first problem: every issue is pushed into a
//! [`VerifyReport`] in the order it was found and the caller decides what to do with
//! the aggregate.

use derive_new::new;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// The trailing hash does not match the content
    Checksum,
    /// The file cannot be decoded, or refers to something that cannot be loaded
    Structure,
    /// Fanout or lookup ordering is broken
    Order,
    /// Recorded data disagrees with the object store or the pack indexes
    Content,
    Generation,
}

impl IssueKind {
    pub fn as_str(&self) -> &str {
        match self {
            IssueKind::Checksum => "checksum",
            IssueKind::Structure => "structure",
            IssueKind::Order => "order",
            IssueKind::Content => "content",
            IssueKind::Generation => "generation",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct VerifyIssue {
    pub kind: IssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    issues: Vec<VerifyIssue>,
}

impl VerifyReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: IssueKind, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%kind, message, "verify issue");
        self.issues.push(VerifyIssue::new(kind, message));
    }

    pub fn issues(&self) -> &[VerifyIssue] {
        &self.issues
    }

    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.kind == kind)
    }

    /// Number of issues of any kind but `kind`
    pub fn count_except(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|issue| issue.kind != kind).count()
    }

    pub fn merge(&mut self, other: VerifyReport) {
        self.issues.extend(other.issues);
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{}", issue.message)?;
        }
        Ok(())
    }
}
