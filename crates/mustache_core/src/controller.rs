use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::OverlayError;
use crate::feature::OverlayFeatureMap;
use crate::node::{NodeId, OverlayHandle, OverlayNode};

/// Tracker-assigned identity of a face anchor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(String);

impl AnchorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnchorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AnchorEvent<'a> {
    Added {
        anchor: &'a AnchorId,
        geometry: &'a [Vec3],
    },
    Updated {
        anchor: &'a AnchorId,
        geometry: &'a [Vec3],
    },
    Removed {
        anchor: &'a AnchorId,
    },
}

/// The rendering side of the overlay lifecycle.
pub trait SceneGraph {
    fn attach(&mut self, anchor: &AnchorId, node: &OverlayHandle);
    fn detach(&mut self, anchor: &AnchorId, node: NodeId);
}

/// Result of hit testing the rendered scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneNode {
    Anchor(AnchorId),
    Overlay(NodeId),
    Other,
}

impl SceneNode {
    pub fn as_overlay(&self) -> Option<NodeId> {
        match self {
            SceneNode::Overlay(id) => Some(*id),
            _ => None,
        }
    }
}

struct TrackedAnchor {
    nodes: Vec<OverlayHandle>,
    /// Last snapshot this anchor appeared in.
    seen: u64,
}

/// Keeps one overlay per configured feature attached to every tracked face.
pub struct OverlayController {
    features: Arc<OverlayFeatureMap>,
    anchors: HashMap<AnchorId, TrackedAnchor>,
    nodes: HashMap<NodeId, OverlayHandle>,
    snapshot: u64,
    scratch: Vec<Vec3>,
    lost: Vec<AnchorId>,
}

fn place(
    features: &OverlayFeatureMap,
    scratch: &mut Vec<Vec3>,
    node: &OverlayHandle,
    geometry: &[Vec3],
) -> Result<(), OverlayError> {
    let mut node = node.lock();
    features.fill_vertices(node.feature(), geometry, scratch)?;
    node.update_position(scratch);
    Ok(())
}

impl OverlayController {
    pub fn new(features: Arc<OverlayFeatureMap>) -> Self {
        let capacity = features
            .entries()
            .iter()
            .map(|e| e.feature.anchor_vertex_indices.len())
            .max()
            .unwrap_or(0);
        Self {
            features,
            anchors: HashMap::new(),
            nodes: HashMap::new(),
            snapshot: 0,
            scratch: Vec::with_capacity(capacity),
            lost: Vec::new(),
        }
    }

    pub fn features(&self) -> &Arc<OverlayFeatureMap> {
        &self.features
    }

    pub fn is_tracked(&self, anchor: &AnchorId) -> bool {
        self.anchors.contains_key(anchor)
    }

    pub fn anchors(&self) -> impl Iterator<Item = (&AnchorId, &[OverlayHandle])> {
        self.anchors.iter().map(|(id, tracked)| (id, tracked.nodes.as_slice()))
    }

    pub fn node(&self, id: NodeId) -> Option<&OverlayHandle> {
        self.nodes.get(&id)
    }

    /// Applies one tracker event.
    ///
    /// A feature whose vertices can't be read from the geometry is skipped
    /// for this event; the remaining features are still processed and the
    /// first such error is returned.
    pub fn handle(
        &mut self,
        event: AnchorEvent<'_>,
        scene: &mut impl SceneGraph,
    ) -> Result<(), OverlayError> {
        match event {
            AnchorEvent::Added { anchor, geometry } => self.add(anchor, geometry, scene),
            AnchorEvent::Updated { anchor, geometry } => self.update(anchor, geometry),
            AnchorEvent::Removed { anchor } => {
                self.remove(anchor, scene);
                Ok(())
            }
        }
    }

    fn add(
        &mut self,
        anchor: &AnchorId,
        geometry: &[Vec3],
        scene: &mut impl SceneGraph,
    ) -> Result<(), OverlayError> {
        if self.anchors.contains_key(anchor) {
            warn!(%anchor, "anchor added twice, treating as update");
            return self.update(anchor, geometry);
        }

        let mut first_error = None;
        let mut nodes = Vec::with_capacity(self.features.len());
        for (feature, entry) in self.features.entries().iter().enumerate() {
            let handle = OverlayHandle::new(OverlayNode::create(feature, &entry.variants));
            if let Err(err) = place(&self.features, &mut self.scratch, &handle, geometry) {
                first_error.get_or_insert(err);
            }
            scene.attach(anchor, &handle);
            self.nodes.insert(handle.id(), handle.clone());
            nodes.push(handle);
        }

        info!(%anchor, overlays = nodes.len(), "face anchor tracked");
        self.anchors.insert(
            anchor.clone(),
            TrackedAnchor {
                nodes,
                seen: self.snapshot,
            },
        );
        first_error.map_or(Ok(()), Err)
    }

    fn update(&mut self, anchor: &AnchorId, geometry: &[Vec3]) -> Result<(), OverlayError> {
        let Some(tracked) = self.anchors.get(anchor) else {
            debug!(%anchor, "update for untracked anchor ignored");
            return Ok(());
        };

        let mut first_error = None;
        for node in &tracked.nodes {
            if let Err(err) = place(&self.features, &mut self.scratch, node, geometry) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn remove(&mut self, anchor: &AnchorId, scene: &mut impl SceneGraph) {
        let Some(tracked) = self.anchors.remove(anchor) else {
            debug!(%anchor, "removal of untracked anchor ignored");
            return;
        };

        for node in tracked.nodes {
            self.nodes.remove(&node.id());
            scene.detach(anchor, node.id());
        }
        info!(%anchor, "face anchor lost");
    }

    /// Reconciles the tracked set with a complete tracker snapshot: new
    /// anchors are added, known ones updated and anchors missing from `faces`
    /// removed.
    ///
    /// Runs every tracker frame; buffers are owned by the controller and
    /// reused.
    pub fn sync<'a, I>(&mut self, faces: I, scene: &mut impl SceneGraph) -> Result<(), OverlayError>
    where
        I: IntoIterator<Item = (&'a AnchorId, &'a [Vec3])>,
    {
        self.snapshot += 1;
        let snapshot = self.snapshot;

        let mut first_error = None;
        for (anchor, geometry) in faces {
            let event = if self.is_tracked(anchor) {
                AnchorEvent::Updated { anchor, geometry }
            } else {
                AnchorEvent::Added { anchor, geometry }
            };
            if let Err(err) = self.handle(event, scene) {
                first_error.get_or_insert(err);
            }
            if let Some(tracked) = self.anchors.get_mut(anchor) {
                tracked.seen = snapshot;
            }
        }

        let mut lost = std::mem::take(&mut self.lost);
        lost.extend(
            self.anchors
                .iter()
                .filter(|(_, tracked)| tracked.seen != snapshot)
                .map(|(id, _)| id.clone()),
        );
        for anchor in lost.drain(..) {
            self.remove(&anchor, scene);
        }
        self.lost = lost;

        first_error.map_or(Ok(()), Err)
    }

    /// Cycles the overlay struck by a tap, if any. Returns the node and its
    /// new variant index.
    pub fn cycle(&self, hit: &SceneNode) -> Option<(NodeId, usize)> {
        let id = hit.as_overlay()?;
        let node = self.nodes.get(&id)?;
        let variant = node.next();
        debug!(node = %id, variant, "overlay variant cycled");
        Some((id, variant))
    }

    /// Detaches every overlay, as when the tracking session stops.
    pub fn clear(&mut self, scene: &mut impl SceneGraph) {
        let anchors: Vec<AnchorId> = self.anchors.keys().cloned().collect();
        for anchor in &anchors {
            self.remove(anchor, scene);
        }
    }
}
