//! Structured success payload returned by the inference engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::result::InferenceError;

/// Result of analysing one capture file.
///
/// Maps are `BTreeMap` so every consumer (exports in particular) sees the
/// categories and classes in a stable order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Overall verdict for the job (e.g. `normal`, `abnormal`).
    pub final_label: String,

    /// Per-category sub-results, keyed by category name.
    pub results: BTreeMap<String, CategoryResult>,

    /// Per-model breakdown when several models contributed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<BTreeMap<String, BTreeMap<String, CategoryResult>>>,

    /// Visualisation artifacts per category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<BTreeMap<String, Visualization>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub prediction: String,
    /// Class name -> probability in [0, 1].
    pub probabilities: BTreeMap<String, f64>,
}

/// File references produced by the engine for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visualization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradcam: Option<GradCam>,
    /// One frame per second of the capture, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub temporal: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradCam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heatmap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "frame")]
pub enum ArtifactKind {
    Orbit,
    Heatmap,
    Overlay,
    Temporal(u32),
}

impl core::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ArtifactKind::Orbit => f.write_str("orbit"),
            ArtifactKind::Heatmap => f.write_str("heatmap"),
            ArtifactKind::Overlay => f.write_str("overlay"),
            ArtifactKind::Temporal(frame) => write!(f, "temporal_{frame}"),
        }
    }
}

/// One visualisation file referenced by a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub category: String,
    pub kind: ArtifactKind,
    pub path: String,
}

impl Prediction {
    pub fn new(final_label: impl Into<String>) -> Self {
        Self {
            final_label: final_label.into(),
            results: BTreeMap::new(),
            models: None,
            visualization: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>, result: CategoryResult) -> Self {
        self.results.insert(category.into(), result);
        self
    }

    pub fn with_visualization(mut self, category: impl Into<String>, vis: Visualization) -> Self {
        self.visualization
            .get_or_insert_with(BTreeMap::new)
            .insert(category.into(), vis);
        self
    }

    /// Check the payload against the engine contract.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.final_label.trim().is_empty() {
            return Err(InferenceError::invalid_output("final_label is empty"));
        }

        let per_model = self.models.iter().flat_map(|m| m.values());
        for results in std::iter::once(&self.results).chain(per_model) {
            for (category, result) in results {
                result.validate(category)?;
            }
        }
        Ok(())
    }

    /// All visualisation files, ordered by category then kind.
    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        let Some(vis) = &self.visualization else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (category, v) in vis {
            let mut push = |kind, path: &String| {
                out.push(ArtifactRef {
                    category: category.clone(),
                    kind,
                    path: path.clone(),
                })
            };
            if let Some(p) = &v.orbit {
                push(ArtifactKind::Orbit, p);
            }
            if let Some(g) = &v.gradcam {
                if let Some(p) = &g.heatmap {
                    push(ArtifactKind::Heatmap, p);
                }
                if let Some(p) = &g.overlay {
                    push(ArtifactKind::Overlay, p);
                }
            }
            for (frame, p) in v.temporal.iter().enumerate() {
                push(ArtifactKind::Temporal(frame as u32), p);
            }
        }
        out
    }
}

impl CategoryResult {
    pub fn new(prediction: impl Into<String>) -> Self {
        Self {
            prediction: prediction.into(),
            probabilities: BTreeMap::new(),
        }
    }

    pub fn with_probability(mut self, class: impl Into<String>, p: f64) -> Self {
        self.probabilities.insert(class.into(), p);
        self
    }

    fn validate(&self, category: &str) -> Result<(), InferenceError> {
        for (class, p) in &self.probabilities {
            if !(p.is_finite() && (0.0..=1.0).contains(p)) {
                return Err(InferenceError::invalid_output(format!(
                    "probability for {category}/{class} out of range: {p}"
                )));
            }
        }
        Ok(())
    }
}
