//! Component identities for logging.
//!
//! Every component (dispatcher, worker) owns an [`Identity`]: a readable name
//! plus a short unique suffix, optionally chained under its parent. Log lines
//! are `tracing` events emitted inside [`Identity::span`], so a subscriber sees
//! `dispatcher-8k2m1x0q>worker-3fz9c1aa` without the component formatting
//! anything itself.

use std::fmt;

use ulid::Ulid;

/// Length of the random suffix appended to a component name.
const SUFFIX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
    id: String,
    parent: Option<String>,
}

impl Identity {
    /// Identify a component by name with a fresh unique suffix.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: short_id(),
            parent: None,
        }
    }

    /// Chain `parent` as the prefix of this identity.
    pub fn with_parent(mut self, parent: &Identity) -> Self {
        self.parent = Some(parent.identifier());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// `name-id`, or `parent>name-id` when a parent is chained.
    pub fn identifier(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{parent}>{}-{}", self.name, self.id),
            None => format!("{}-{}", self.name, self.id),
        }
    }

    /// Span under which this component's log lines are emitted.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("anvil", component = %self.identifier())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

/// The trailing characters of a ULID come from its random component, so a
/// short slice of them is enough to tell sibling components apart.
fn short_id() -> String {
    let ulid = Ulid::new().to_string();
    ulid[ulid.len() - SUFFIX_LEN..].to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn identifier_without_parent() {
        let id = Identity::new("dispatcher");
        assert_eq!(id.identifier(), format!("dispatcher-{}", id.id()));
        assert_eq!(id.id().len(), SUFFIX_LEN);
        assert!(id.parent().is_none());
    }

    #[test]
    fn identifier_chains_parent() {
        let parent = Identity::new("dispatcher");
        let child = Identity::new("worker").with_parent(&parent);

        assert_eq!(child.parent(), Some(parent.identifier().as_str()));
        assert_eq!(
            child.to_string(),
            format!("{}>worker-{}", parent.identifier(), child.id())
        );
    }

    #[test]
    fn suffixes_are_unique() {
        let ids: HashSet<String> = (0..64).map(|_| Identity::new("w").id().to_string()).collect();
        assert_eq!(ids.len(), 64);
    }
}
