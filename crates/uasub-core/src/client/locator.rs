// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node resolution.
//!
//! Two strategies produce a [`NodeHandle`]:
//!
//! - **By id**: namespace index plus identifier, checked with one
//!   lightweight round trip (or none when existence checks are disabled).
//! - **By path**: a [`BrowsePath`] walked segment by segment from a root
//!   node over forward hierarchical references.
//!
//! Both return handles that compare equal when they name the same node.
//!
//! ```rust,ignore
//! let by_id = session.resolve_by_id(2, "Simulation.TYPES").await?;
//! let path: BrowsePath = "2:Simulation/2:TYPES".parse()?;
//! let by_path = session.resolve_by_path(&NodeId::OBJECTS_FOLDER, &path).await?;
//! assert_eq!(by_id, by_path);
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use tracing::debug;
use uuid::Uuid;

use crate::client::session::{Session, SessionToken};
use crate::client::transport::{BrowseResult, Transport};
use crate::error::{ClientResult, ResolutionError};
use crate::types::{BrowsePath, NodeClass, NodeId, NodeIdentifier};

// =============================================================================
// NodeHandle
// =============================================================================

/// A resolved node bound to the session that resolved it.
///
/// Equality and hashing use the node id and the session id only. A handle
/// becomes stale when its session closes; using it afterwards fails with
/// [`ResolutionError::StaleHandle`].
#[derive(Clone)]
pub struct NodeHandle {
    node_id: NodeId,
    node_class: Option<NodeClass>,
    session_id: Uuid,
    token: Weak<SessionToken>,
}

impl NodeHandle {
    pub(crate) fn new(node_id: NodeId, node_class: Option<NodeClass>, token: &Arc<SessionToken>) -> Self {
        Self {
            node_id,
            node_class,
            session_id: token.id(),
            token: Arc::downgrade(token),
        }
    }

    /// Returns the node id.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Returns the node class, if it was learned during resolution.
    pub fn node_class(&self) -> Option<NodeClass> {
        self.node_class
    }

    /// Returns the id of the session that issued this handle.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns `true` while the issuing session is open.
    pub fn is_valid(&self) -> bool {
        self.token
            .upgrade()
            .is_some_and(|token| !token.is_closed())
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id && self.session_id == other.session_id
    }
}

impl Eq for NodeHandle {}

impl Hash for NodeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
        self.session_id.hash(state);
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("node_id", &self.node_id.to_string())
            .field("node_class", &self.node_class)
            .field("session_id", &self.session_id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_id)
    }
}

// =============================================================================
// NodeLocator
// =============================================================================

/// Resolves nodes on a session.
pub struct NodeLocator<T: Transport> {
    session: Session<T>,
}

impl<T: Transport> NodeLocator<T> {
    pub(crate) fn new(session: Session<T>) -> Self {
        Self { session }
    }

    /// Resolves a node by namespace index and identifier.
    pub async fn resolve_by_id(
        &self,
        namespace_index: u16,
        identifier: impl Into<NodeIdentifier>,
    ) -> ClientResult<NodeHandle> {
        self.resolve_node_id(NodeId::new(namespace_index, identifier)).await
    }

    /// Resolves a full node id.
    pub async fn resolve_node_id(&self, node_id: NodeId) -> ClientResult<NodeHandle> {
        self.session.ensure_open("resolve_by_id")?;

        if !self.session.config().verify_node_existence {
            return Ok(NodeHandle::new(node_id, None, self.session.token()));
        }

        let node_class = self
            .session
            .call("resolve_by_id", self.session.transport().node_class(&node_id))
            .await?;

        match node_class {
            Some(class) => {
                debug!(node = %node_id, node_class = %class, "Resolved node");
                Ok(NodeHandle::new(node_id, Some(class), self.session.token()))
            }
            None => Err(ResolutionError::not_found(node_id.to_string()).into()),
        }
    }

    /// Resolves a node by walking `path` from `root`.
    ///
    /// Each segment must match exactly one child by namespace index and name.
    /// An empty path resolves `root` itself.
    pub async fn resolve_by_path(&self, root: &NodeId, path: &BrowsePath) -> ClientResult<NodeHandle> {
        if path.is_empty() {
            return self.resolve_node_id(root.clone()).await;
        }
        self.session.ensure_open("resolve_by_path")?;

        let mut current = root.clone();
        let mut node_class = None;

        for (index, segment) in path.segments().iter().enumerate() {
            let children = self
                .session
                .call("resolve_by_path", self.session.transport().browse(&current))
                .await?;

            let mut matches = children.into_iter().filter(|child| &child.browse_name == segment);
            let Some(found) = matches.next() else {
                return Err(ResolutionError::segment_not_found(
                    index,
                    segment.to_string(),
                    current.to_string(),
                )
                .into());
            };

            let extra = matches.count();
            if extra > 0 {
                return Err(ResolutionError::ambiguous(index, segment.to_string(), extra + 1).into());
            }

            current = found.node_id;
            node_class = Some(found.node_class);
        }

        debug!(path = %path, node = %current, "Resolved browse path");
        Ok(NodeHandle::new(current, node_class, self.session.token()))
    }

    /// Lists the forward hierarchical children of a node.
    pub async fn browse_children(&self, node: &NodeHandle) -> ClientResult<Vec<BrowseResult>> {
        self.session.check_handle(node)?;
        self.session
            .call("browse", self.session.transport().browse(node.node_id()))
            .await
    }

    // =========================================================================
    // Well-Known Nodes
    // =========================================================================

    /// The root folder. No round trip.
    pub fn root(&self) -> NodeHandle {
        self.well_known(NodeId::ROOT_FOLDER)
    }

    /// The objects folder. No round trip.
    pub fn objects(&self) -> NodeHandle {
        self.well_known(NodeId::OBJECTS_FOLDER)
    }

    /// The types folder. No round trip.
    pub fn types(&self) -> NodeHandle {
        self.well_known(NodeId::TYPES_FOLDER)
    }

    /// The views folder. No round trip.
    pub fn views(&self) -> NodeHandle {
        self.well_known(NodeId::VIEWS_FOLDER)
    }

    fn well_known(&self, node_id: NodeId) -> NodeHandle {
        NodeHandle::new(node_id, Some(NodeClass::Object), self.session.token())
    }
}

impl<T: Transport> fmt::Debug for NodeLocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeLocator")
            .field("session_id", &self.session.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_handle_equality_ignores_class() {
        let token = Arc::new(SessionToken::new());
        let a = NodeHandle::new(NodeId::numeric(2, 5), Some(NodeClass::Variable), &token);
        let b = NodeHandle::new(NodeId::numeric(2, 5), None, &token);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_handle_from_other_session_differs() {
        let first = Arc::new(SessionToken::new());
        let second = Arc::new(SessionToken::new());
        let a = NodeHandle::new(NodeId::numeric(2, 5), None, &first);
        let b = NodeHandle::new(NodeId::numeric(2, 5), None, &second);
        assert_ne!(a, b);
    }

    #[test]
    fn test_handle_invalid_after_token_dropped() {
        let token = Arc::new(SessionToken::new());
        let handle = NodeHandle::new(NodeId::numeric(2, 5), None, &token);
        assert!(handle.is_valid());
        drop(token);
        assert!(!handle.is_valid());
    }
}
