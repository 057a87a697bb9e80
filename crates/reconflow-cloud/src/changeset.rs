//! Change-sets produced by the Differ

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Renders a field value for reports
pub trait Render {
    fn render(&self) -> String;
}

impl Render for String {
    fn render(&self) -> String {
        self.clone()
    }
}

impl Render for bool {
    fn render(&self) -> String {
        self.to_string()
    }
}

impl Render for i32 {
    fn render(&self) -> String {
        self.to_string()
    }
}

impl<T: Render> Render for Option<T> {
    fn render(&self) -> String {
        match self {
            Some(value) => value.render(),
            None => "<none>".to_string(),
        }
    }
}

impl<T: fmt::Display> Render for BTreeSet<T> {
    fn render(&self) -> String {
        let items: Vec<String> = self.iter().map(|v| v.to_string()).collect();
        format!("{{{}}}", items.join(", "))
    }
}

impl Render for crate::provider::Listener {
    fn render(&self) -> String {
        self.to_string()
    }
}

/// Current and desired value of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<T> {
    pub current: T,
    pub desired: T,
}

impl<T: PartialEq> Delta<T> {
    /// `Some` only when the values differ
    pub fn between(current: T, desired: T) -> Option<Self> {
        (current != desired).then_some(Self { current, desired })
    }
}

impl<T: Ord + Clone> Delta<BTreeSet<T>> {
    /// Members to add and members to remove
    pub fn set_delta(&self) -> (Vec<T>, Vec<T>) {
        let add = self.desired.difference(&self.current).cloned().collect();
        let remove = self.current.difference(&self.desired).cloned().collect();
        (add, remove)
    }
}

/// A single field-level change of one resource kind
pub trait FieldChange: fmt::Debug + Send + Sync {
    fn field(&self) -> &'static str;
    fn current(&self) -> String;
    fn desired(&self) -> String;

    /// Why the change cannot be applied in place, if it cannot
    fn unsupported(&self) -> Option<&'static str> {
        None
    }

    fn entry(&self) -> ChangeEntry {
        ChangeEntry {
            field: self.field().to_string(),
            current: self.current(),
            desired: self.desired(),
        }
    }
}

/// Rendered `(field, current, desired)` triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEntry {
    pub field: String,
    pub current: String,
    pub desired: String,
}

impl fmt::Display for ChangeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.current, self.desired)
    }
}

/// Sentinel field name for whole-object creation and deletion
pub const PURGED: &str = "purged";

/// Ordered changes needed to converge one resource
///
/// Creation and deletion are whole-object changes and never carry field
/// updates alongside.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSet<C> {
    Unchanged,
    /// `purged: true -> false`
    Create,
    /// `purged: false -> true`
    Purge,
    Update(Vec<C>),
}

impl<C: FieldChange> ChangeSet<C> {
    pub fn from_updates(changes: Vec<C>) -> Self {
        if changes.is_empty() {
            ChangeSet::Unchanged
        } else {
            ChangeSet::Update(changes)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ChangeSet::Unchanged)
    }

    /// First change that needs a destroy and recreate
    pub fn first_unsupported(&self) -> Option<(&C, &'static str)> {
        match self {
            ChangeSet::Update(changes) => changes
                .iter()
                .find_map(|c| c.unsupported().map(|reason| (c, reason))),
            _ => None,
        }
    }

    pub fn entries(&self) -> Vec<ChangeEntry> {
        let purged = |current: bool, desired: bool| ChangeEntry {
            field: PURGED.to_string(),
            current: current.to_string(),
            desired: desired.to_string(),
        };
        match self {
            ChangeSet::Unchanged => Vec::new(),
            ChangeSet::Create => vec![purged(true, false)],
            ChangeSet::Purge => vec![purged(false, true)],
            ChangeSet::Update(changes) => changes.iter().map(FieldChange::entry).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Members(Delta<BTreeSet<String>>);

    impl FieldChange for Members {
        fn field(&self) -> &'static str {
            "instances"
        }
        fn current(&self) -> String {
            self.0.current.render()
        }
        fn desired(&self) -> String {
            self.0.desired.render()
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_delta() {
        let delta = Delta::between(set(&["a", "b", "c"]), set(&["b", "c", "d"])).unwrap();
        let (add, remove) = delta.set_delta();
        assert_eq!(add, vec!["d".to_string()]);
        assert_eq!(remove, vec!["a".to_string()]);
    }

    #[test]
    fn test_between_equal_is_none() {
        assert!(Delta::between(set(&["a"]), set(&["a"])).is_none());
        assert!(Delta::between(Some(1), None).is_some());
    }

    #[test]
    fn test_entries_render_purged_sentinel() {
        let create: ChangeSet<Members> = ChangeSet::Create;
        assert_eq!(create.entries()[0].to_string(), "purged: true -> false");

        let update = ChangeSet::from_updates(vec![Members(Delta {
            current: set(&["i2", "i3"]),
            desired: set(&["i1", "i2"]),
        })]);
        assert_eq!(
            update.entries()[0].to_string(),
            "instances: {i2, i3} -> {i1, i2}"
        );
        assert!(ChangeSet::<Members>::from_updates(Vec::new()).is_empty());
    }
}
