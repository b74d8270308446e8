use std::sync::Arc;

/// Local bindings for one point in an expression.
///
/// Extending a scope returns a new scope that shares its parent, so sibling branches never
/// see each other's bindings and a parent is never changed by its children.
#[derive(Clone, Debug)]
pub struct Scope<T> {
    head: Option<Arc<Frame<T>>>,
}

#[derive(Debug)]
struct Frame<T> {
    name: String,
    item: T,
    parent: Option<Arc<Frame<T>>>,
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Self { head: None }
    }
}

impl<T> Scope<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The innermost binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<&T> {
        let mut frame = self.head.as_deref();
        while let Some(current) = frame {
            if current.name == name {
                return Some(&current.item);
            }
            frame = current.parent.as_deref();
        }
        None
    }

    #[must_use]
    pub fn with(&self, name: impl Into<String>, item: T) -> Self {
        Self {
            head: Some(Arc::new(Frame {
                name: name.into(),
                item,
                parent: self.head.clone(),
            })),
        }
    }

    /// Names bound since `base`, innermost first. `base` must be an ancestor of `self`.
    pub fn names_since(&self, base: &Scope<T>) -> Vec<&str> {
        let stop = base.head.as_ref().map(Arc::as_ptr);
        let mut names = Vec::new();
        let mut frame = self.head.as_ref();
        while let Some(current) = frame {
            if Some(Arc::as_ptr(current)) == stop {
                break;
            }
            if !names.contains(&current.name.as_str()) {
                names.push(current.name.as_str());
            }
            frame = current.parent.as_ref();
        }
        names
    }
}
