//! Abstract DOM surface the engine reads from.

use crate::path::DataSource;

/// An element handle in the host document.
///
/// Handles are cheap to clone and compare by identity on the platform side.
pub trait DomNode: Clone {
    /// Host data object attached to the element by the page's own framework.
    type Data: DataSource;

    fn matches(&self, selector: &str) -> bool;

    /// First descendant matching `selector`.
    fn query(&self, selector: &str) -> Option<Self>;

    fn query_all(&self, selector: &str) -> Vec<Self>;

    fn attribute(&self, name: &str) -> Option<String>;

    fn text(&self) -> String;

    fn host_data(&self) -> Option<Self::Data>;

    /// The node itself if it matches, else its first matching descendant.
    fn find(&self, selector: &str) -> Option<Self> {
        if self.matches(selector) {
            Some(self.clone())
        } else {
            self.query(selector)
        }
    }

    fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }
}

/// What changed in a mutation record.
#[derive(Debug, Clone)]
pub enum MutationKind<N> {
    ChildList { added: Vec<N>, removed: Vec<N> },
    Attribute { name: String, old_value: Option<String> },
}

/// One observed mutation.
#[derive(Debug, Clone)]
pub struct MutationRecord<N> {
    pub target: N,
    pub kind: MutationKind<N>,
}

impl<N> MutationRecord<N> {
    pub fn child_list(target: N, added: Vec<N>, removed: Vec<N>) -> Self {
        Self {
            target,
            kind: MutationKind::ChildList { added, removed },
        }
    }

    pub fn attribute(target: N, name: impl Into<String>, old_value: Option<String>) -> Self {
        Self {
            target,
            kind: MutationKind::Attribute {
                name: name.into(),
                old_value,
            },
        }
    }

    /// Attribute name for attribute mutations.
    pub fn attribute_name(&self) -> Option<&str> {
        match &self.kind {
            MutationKind::Attribute { name, .. } => Some(name),
            MutationKind::ChildList { .. } => None,
        }
    }
}
