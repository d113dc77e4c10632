//! Repository allow-list.

use std::collections::BTreeSet;

/// Repositories (`owner/name`) allowed to trigger deploys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    repositories: BTreeSet<String>,
}

impl AllowList {
    pub fn new<I, S>(repositories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repositories: repositories.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact, case-sensitive match on the full name.
    pub fn allows(&self, repository: &str) -> bool {
        self.repositories.contains(repository)
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }
}
