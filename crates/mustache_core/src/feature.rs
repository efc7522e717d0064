use std::collections::HashSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::OverlayError;

/// A named attachment point on the tracked face mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(rename = "anchorVertexIndices")]
    pub anchor_vertex_indices: Vec<u32>,
}

impl Feature {
    pub fn new(name: impl Into<String>, anchor_vertex_indices: impl Into<Vec<u32>>) -> Self {
        Self {
            name: name.into(),
            anchor_vertex_indices: anchor_vertex_indices.into(),
        }
    }
}

/// Ordered, non-empty list of selectable assets for a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VariantSet {
    variants: Vec<String>,
}

impl VariantSet {
    /// Returns `None` when `variants` is empty.
    pub fn new<I, S>(variants: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants: Vec<String> = variants.into_iter().map(Into::into).collect();
        if variants.is_empty() {
            return None;
        }
        Some(Self { variants })
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.variants.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct FeatureEntry {
    pub feature: Feature,
    pub variants: VariantSet,
}

#[derive(Debug, Clone, Deserialize)]
struct FeatureEntryDto {
    #[serde(flatten)]
    feature: Feature,
    variants: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FeatureMapDto {
    features: Vec<FeatureEntryDto>,
}

/// Static mapping from overlay features to the face-mesh vertices anchoring
/// them and the variants they can display.
#[derive(Debug, Clone)]
pub struct OverlayFeatureMap {
    entries: Vec<FeatureEntry>,
}

pub const DEFAULT_FEATURE: &str = "mustache";
pub const DEFAULT_VARIANTS: [&str; 4] = ["mustache1", "mustache2", "mustache3", "mustache4"];

impl Default for OverlayFeatureMap {
    fn default() -> Self {
        Self {
            entries: vec![FeatureEntry {
                feature: Feature::new(DEFAULT_FEATURE, [2]),
                variants: VariantSet {
                    variants: DEFAULT_VARIANTS.iter().map(|v| v.to_string()).collect(),
                },
            }],
        }
    }
}

impl OverlayFeatureMap {
    pub fn new(entries: Vec<(Feature, Vec<String>)>) -> Result<Self, OverlayError> {
        let mut names = HashSet::new();
        let mut validated = Vec::with_capacity(entries.len());
        for (feature, variants) in entries {
            if feature.anchor_vertex_indices.is_empty() {
                return Err(OverlayError::InvalidFeature {
                    feature: feature.name,
                    reason: "no anchor vertices",
                });
            }
            if !names.insert(feature.name.clone()) {
                return Err(OverlayError::InvalidFeature {
                    feature: feature.name,
                    reason: "duplicate name",
                });
            }
            let Some(variants) = VariantSet::new(variants) else {
                return Err(OverlayError::InvalidFeature {
                    feature: feature.name,
                    reason: "no variants",
                });
            };
            validated.push(FeatureEntry { feature, variants });
        }

        Ok(Self { entries: validated })
    }

    /// Parses a JSON document of the form
    /// `{"features": [{"name", "anchorVertexIndices", "variants"}]}`.
    pub fn from_slice(src: &[u8]) -> Result<Self, OverlayError> {
        let dto = serde_json::from_slice::<FeatureMapDto>(src)
            .map_err(|err| OverlayError::Parse(err.to_string()))?;
        Self::new(
            dto.features
                .into_iter()
                .map(|e| (e.feature, e.variants))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FeatureEntry] {
        &self.entries
    }

    pub fn entry(&self, feature: usize) -> Result<&FeatureEntry, OverlayError> {
        self.entries
            .get(feature)
            .ok_or(OverlayError::UnknownFeature(feature))
    }

    /// Looks a feature up by name, returning its position in the map.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.feature.name == name)
    }

    /// Reads the anchor vertices of `feature` out of `geometry`, in the
    /// configured order.
    pub fn vertices_for(&self, feature: usize, geometry: &[Vec3]) -> Result<Vec<Vec3>, OverlayError> {
        let mut out = Vec::new();
        self.fill_vertices(feature, geometry, &mut out)?;
        Ok(out)
    }

    /// Same as [`vertices_for`](Self::vertices_for) but reuses `out`.
    /// On error `out` is left cleared.
    pub fn fill_vertices(
        &self,
        feature: usize,
        geometry: &[Vec3],
        out: &mut Vec<Vec3>,
    ) -> Result<(), OverlayError> {
        out.clear();
        let entry = self.entry(feature)?;
        for &index in &entry.feature.anchor_vertex_indices {
            let Some(vertex) = geometry.get(index as usize) else {
                out.clear();
                return Err(OverlayError::VertexOutOfRange {
                    feature: entry.feature.name.clone(),
                    index,
                    vertex_count: geometry.len(),
                });
            };
            out.push(*vertex);
        }
        Ok(())
    }

    pub fn variant_at(&self, feature: usize, index: usize) -> Result<&str, OverlayError> {
        let entry = self.entry(feature)?;
        entry
            .variants
            .get(index)
            .ok_or_else(|| OverlayError::VariantOutOfRange {
                feature: entry.feature.name.clone(),
                index,
                variant_count: entry.variants.len(),
            })
    }
}
