use std::collections::HashMap;
use std::sync::Arc;

use bevy::prelude::*;
use tracing::{error, warn};

use mustache_api::SetFacesRequest;
use mustache_core::{AnchorId, NodeId, OverlayController, OverlayFeatureMap, OverlayHandle, SceneGraph};

use crate::overlay::{OverlayEntity, VariantVisuals};

/// Root entity of a tracked face; overlays are spawned as its children.
#[derive(Component)]
pub struct FaceAnchorEntity {
    pub id: AnchorId,
}

#[derive(Resource)]
pub struct Tracking {
    controller: OverlayController,
    anchors: HashMap<AnchorId, Entity>,
    overlays: HashMap<NodeId, Entity>,
}

struct EntityScene<'a, 'w, 's> {
    commands: &'a mut Commands<'w, 's>,
    anchors: &'a HashMap<AnchorId, Entity>,
    overlays: &'a mut HashMap<NodeId, Entity>,
    visuals: &'a VariantVisuals,
}

impl SceneGraph for EntityScene<'_, '_, '_> {
    fn attach(&mut self, anchor: &AnchorId, node: &OverlayHandle) {
        let Some(&parent) = self.anchors.get(anchor) else {
            warn!(%anchor, "overlay attached to unknown anchor");
            return;
        };

        let (feature, variant) = {
            let node = node.lock();
            (node.feature(), node.variant())
        };
        let child = self
            .commands
            .spawn((
                PbrBundle {
                    mesh: self.visuals.mesh(feature),
                    material: self.visuals.material(feature, variant).unwrap_or_default(),
                    visibility: Visibility::Hidden,
                    ..default()
                },
                OverlayEntity::new(node.clone(), variant),
            ))
            .id();
        self.commands.entity(parent).add_child(child);
        self.overlays.insert(node.id(), child);
    }

    fn detach(&mut self, _anchor: &AnchorId, node: NodeId) {
        if let Some(entity) = self.overlays.remove(&node) {
            self.commands.entity(entity).despawn_recursive();
        }
    }
}

impl Tracking {
    pub fn new(features: Arc<OverlayFeatureMap>) -> Self {
        Self {
            controller: OverlayController::new(features),
            anchors: HashMap::new(),
            overlays: HashMap::new(),
        }
    }

    pub fn controller(&self) -> &OverlayController {
        &self.controller
    }

    pub fn features(&self) -> &OverlayFeatureMap {
        self.controller.features()
    }

    /// Brings the scene in line with the tracker's latest snapshot.
    pub fn apply_faces(
        &mut self,
        commands: &mut Commands,
        visuals: &VariantVisuals,
        request: &SetFacesRequest,
    ) {
        for face in &request.faces {
            let transform = Transform::from_matrix(face.transform);
            match self.anchors.get(&face.id) {
                Some(&entity) => {
                    commands.entity(entity).insert(transform);
                }
                None => {
                    let entity = commands
                        .spawn((
                            SpatialBundle::from_transform(transform),
                            FaceAnchorEntity { id: face.id.clone() },
                        ))
                        .id();
                    self.anchors.insert(face.id.clone(), entity);
                }
            }
        }

        let mut scene = EntityScene {
            commands: &mut *commands,
            anchors: &self.anchors,
            overlays: &mut self.overlays,
            visuals,
        };
        let faces = request
            .faces
            .iter()
            .map(|face| (&face.id, face.vertices.as_slice()));
        if let Err(err) = self.controller.sync(faces, &mut scene) {
            error!("overlay skipped for this frame: {}", err);
        }

        let controller = &self.controller;
        self.anchors.retain(|id, entity| {
            if controller.is_tracked(id) {
                return true;
            }
            commands.entity(*entity).despawn_recursive();
            false
        });
    }
}
