use std::path::{Path, PathBuf};

use bevy::prelude::*;
use bevy::window::PrimaryWindow;
use bevy_egui::EguiContexts;
use tracing::debug;

use mustache_core::{NodeId, OverlayHandle, SceneNode};

use crate::tracking::Tracking;
use crate::MainCamera;

/// How close, in logical pixels, a tap has to land to an overlay's centre.
pub const PICK_RADIUS: f32 = 48.0;

/// Hair colours handed out to variants in order.
const PALETTE: [[f32; 3]; 6] = [
    [0.08, 0.06, 0.05],
    [0.36, 0.22, 0.12],
    [0.78, 0.38, 0.14],
    [0.62, 0.62, 0.60],
    [0.93, 0.80, 0.45],
    [0.55, 0.10, 0.35],
];

fn palette(index: usize) -> Color {
    let [r, g, b] = PALETTE[index % PALETTE.len()];
    Color::srgb(r, g, b)
}

/// Mesh per feature and material per variant.
#[derive(Resource)]
pub struct VariantVisuals {
    meshes: Vec<Handle<Mesh>>,
    materials: Vec<Vec<Handle<StandardMaterial>>>,
}

impl VariantVisuals {
    pub fn mesh(&self, feature: usize) -> Handle<Mesh> {
        self.meshes.get(feature).cloned().unwrap_or_default()
    }

    pub fn material(&self, feature: usize, variant: usize) -> Option<Handle<StandardMaterial>> {
        self.materials.get(feature)?.get(variant).cloned()
    }
}

/// Directory the asset server reads variant images from.
#[derive(Resource, Clone)]
pub struct AssetDir(pub PathBuf);

/// Asset path of the image for `variant`, if one exists under `dir`.
pub fn variant_texture(dir: &Path, variant: &str) -> Option<String> {
    let file = format!("{variant}.png");
    dir.join(&file).is_file().then_some(file)
}

fn variant_material(dir: &Path, asset_server: &AssetServer, variant: &str, index: usize) -> StandardMaterial {
    match variant_texture(dir, variant) {
        Some(path) => StandardMaterial {
            base_color_texture: Some(asset_server.load(path)),
            alpha_mode: AlphaMode::Blend,
            unlit: true,
            double_sided: true,
            cull_mode: None,
            ..default()
        },
        None => {
            debug!(variant, "no image for variant, using a flat colour");
            StandardMaterial {
                base_color: palette(index),
                perceptual_roughness: 0.9,
                double_sided: true,
                cull_mode: None,
                ..default()
            }
        }
    }
}

pub fn init_visuals(
    mut commands: Commands,
    tracking: Res<Tracking>,
    asset_dir: Res<AssetDir>,
    asset_server: Res<AssetServer>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let entries = tracking.features().entries();
    let visuals = VariantVisuals {
        meshes: entries
            .iter()
            .map(|_| meshes.add(Rectangle::new(0.06, 0.02)))
            .collect(),
        materials: entries
            .iter()
            .map(|entry| {
                entry
                    .variants
                    .iter()
                    .enumerate()
                    .map(|(index, variant)| {
                        materials.add(variant_material(&asset_dir.0, &asset_server, variant, index))
                    })
                    .collect()
            })
            .collect(),
    };
    commands.insert_resource(visuals);
}

#[derive(Component)]
pub struct OverlayEntity {
    pub node: OverlayHandle,
    shown_variant: usize,
}

impl OverlayEntity {
    pub fn new(node: OverlayHandle, shown_variant: usize) -> Self {
        Self { node, shown_variant }
    }
}

/// Copies node placements and variants onto their entities.
pub fn sync_overlays(
    visuals: Res<VariantVisuals>,
    mut overlays: Query<(
        &mut OverlayEntity,
        &mut Transform,
        &mut Handle<StandardMaterial>,
        &mut Visibility,
    )>,
) {
    for (mut overlay, mut transform, mut material, mut visibility) in &mut overlays {
        let (feature, variant, placement) = {
            let node = overlay.node.lock();
            (node.feature(), node.variant(), node.placement())
        };

        match placement {
            Some(placement) => {
                transform.translation = placement.translation;
                transform.rotation = placement.rotation;
                *visibility = Visibility::Inherited;
            }
            None => *visibility = Visibility::Hidden,
        }

        if overlay.shown_variant != variant {
            if let Some(handle) = visuals.material(feature, variant) {
                *material = handle;
            }
            overlay.shown_variant = variant;
        }
    }
}

/// A tap at viewport coordinates.
#[derive(Event, Debug, Clone, Copy)]
pub struct Tap(pub Vec2);

/// Picks the overlay whose projected centre is closest to `position`, if it
/// lies within `radius`.
pub fn nearest_overlay(
    candidates: impl IntoIterator<Item = (NodeId, Vec2)>,
    position: Vec2,
    radius: f32,
) -> SceneNode {
    candidates
        .into_iter()
        .map(|(id, projected)| (id, projected.distance_squared(position)))
        .filter(|(_, distance)| *distance <= radius * radius)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(SceneNode::Other, |(id, _)| SceneNode::Overlay(id))
}

pub fn mouse_taps(
    buttons: Res<ButtonInput<MouseButton>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut contexts: EguiContexts,
    mut taps: EventWriter<Tap>,
) {
    if !buttons.just_pressed(MouseButton::Left) {
        return;
    }
    if contexts.ctx_mut().is_pointer_over_area() {
        return;
    }
    let Ok(window) = windows.get_single() else {
        return;
    };
    if let Some(position) = window.cursor_position() {
        taps.send(Tap(position));
    }
}

pub fn handle_taps(
    mut taps: EventReader<Tap>,
    tracking: Res<Tracking>,
    cameras: Query<(&Camera, &GlobalTransform), With<MainCamera>>,
    overlays: Query<(&OverlayEntity, &GlobalTransform, &ViewVisibility)>,
) {
    let Ok((camera, camera_transform)) = cameras.get_single() else {
        taps.clear();
        return;
    };

    for tap in taps.read() {
        let candidates = overlays
            .iter()
            .filter(|(_, _, visibility)| visibility.get())
            .filter_map(|(overlay, transform, _)| {
                camera
                    .world_to_viewport(camera_transform, transform.translation())
                    .map(|projected| (overlay.node.id(), projected))
            });
        let hit = nearest_overlay(candidates, tap.0, PICK_RADIUS);
        match tracking.controller().cycle(&hit) {
            Some((node, variant)) => {
                let feature = node_feature(&tracking, node);
                let asset = feature
                    .and_then(|f| tracking.features().variant_at(f, variant).ok())
                    .unwrap_or("?");
                debug!(%node, variant = asset, "tap cycled overlay");
            }
            None => debug!(position = ?tap.0, "tap missed"),
        }
    }
}

fn node_feature(tracking: &Tracking, node: NodeId) -> Option<usize> {
    Some(tracking.controller().node(node)?.lock().feature())
}
