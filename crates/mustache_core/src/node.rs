use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::{Mat3, Quat, Vec3};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::feature::VariantSet;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "overlay#{}", self.0)
    }
}

/// Anchor-local placement of an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Placement {
    /// Derives a placement from an ordered vertex set.
    ///
    /// The translation is the centroid. The orientation depends on how many
    /// vertices there are:
    /// - one: identity, the overlay inherits the anchor's orientation
    /// - two: +X points from the first vertex to the last
    /// - three or more: +X runs along the first edge and +Z is the normal of
    ///   the plane through the first three vertices
    ///
    /// Degenerate input (coincident or collinear vertices) falls back to the
    /// next simpler rule. Returns `None` for an empty slice.
    pub fn from_vertices(vertices: &[Vec3]) -> Option<Self> {
        let (&first, _) = vertices.split_first()?;
        let sum = vertices.iter().fold(Vec3::ZERO, |acc, v| acc + *v);
        let translation = sum / vertices.len() as f32;

        let mut rotation = Quat::IDENTITY;
        if let Some(&last) = vertices.last() {
            let direction = (last - first).normalize_or_zero();
            if direction != Vec3::ZERO {
                rotation = Quat::from_rotation_arc(Vec3::X, direction);
            }
        }

        if let [a, b, c, ..] = vertices {
            let x = (*b - *a).normalize_or_zero();
            let z = (*b - *a).cross(*c - *a).normalize_or_zero();
            if x != Vec3::ZERO && z != Vec3::ZERO {
                let y = z.cross(x);
                rotation = Quat::from_mat3(&Mat3::from_cols(x, y, z)).normalize();
            }
        }

        Some(Self {
            translation,
            rotation,
        })
    }
}

/// An overlay attached to one feature of one tracked face.
#[derive(Debug)]
pub struct OverlayNode {
    id: NodeId,
    feature: usize,
    variant: usize,
    variant_count: usize,
    placement: Option<Placement>,
}

impl OverlayNode {
    pub fn create(feature: usize, variants: &VariantSet) -> Self {
        Self {
            id: NodeId::next(),
            feature,
            variant: 0,
            variant_count: variants.len().max(1),
            placement: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn feature(&self) -> usize {
        self.feature
    }

    pub fn variant(&self) -> usize {
        self.variant
    }

    pub fn variant_count(&self) -> usize {
        self.variant_count
    }

    pub fn placement(&self) -> Option<Placement> {
        self.placement
    }

    /// Advances to the next variant, wrapping around. Returns the new index.
    pub fn next(&mut self) -> usize {
        self.variant = (self.variant + 1) % self.variant_count;
        self.variant
    }

    pub fn update_position(&mut self, vertices: &[Vec3]) -> Option<Placement> {
        if let Some(placement) = Placement::from_vertices(vertices) {
            self.placement = Some(placement);
        }
        self.placement
    }
}

/// Shared handle to an [`OverlayNode`].
///
/// The frame loop repositions nodes while user input cycles them, possibly
/// from another context, so access goes through a lock.
#[derive(Debug, Clone)]
pub struct OverlayHandle {
    id: NodeId,
    node: Arc<Mutex<OverlayNode>>,
}

impl OverlayHandle {
    pub fn new(node: OverlayNode) -> Self {
        Self {
            id: node.id,
            node: Arc::new(Mutex::new(node)),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, OverlayNode> {
        self.node.lock()
    }

    pub fn variant(&self) -> usize {
        self.node.lock().variant
    }

    pub fn placement(&self) -> Option<Placement> {
        self.node.lock().placement
    }

    pub fn next(&self) -> usize {
        self.node.lock().next()
    }
}
