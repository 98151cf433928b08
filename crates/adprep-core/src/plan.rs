//! Plan documents
//!
//! A plan is produced by an external planner and lists, per scanned source
//! file, the artifacts to derive and upload. Plans are validated in full
//! before any transform or upload runs.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::catalog::{self, Dimensions};
use crate::error::{PipelineError, PipelineResult};
use crate::models::ScannedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputKind {
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndcardMode {
    SidecarOnly,
    ExtractOnly,
    SidecarOrExtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanTransform {
    Letterbox,
    #[serde(rename = "COMPRESS_500KB")]
    Compress500Kb,
    NativeVideo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSize {
    pub w: u32,
    pub h: u32,
}

impl TargetSize {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.w, self.h)
    }

    pub fn is_in_catalog(&self) -> bool {
        catalog::lookup(self.w, self.h).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndcardPlan {
    pub mode: EndcardMode,
    pub target_size: TargetSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGroup {
    pub name: String,
    #[serde(default)]
    pub tracking_link_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOutput {
    pub source_rel_path: String,
    pub kind: OutputKind,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub target_sizes: Vec<TargetSize>,
    #[serde(default)]
    pub transforms: Vec<PlanTransform>,
    #[serde(default)]
    pub endcard: Option<EndcardPlan>,
}

impl PlanOutput {
    pub fn wants(&self, transform: PlanTransform) -> bool {
        self.transforms.contains(&transform)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub groups: Vec<PlanGroup>,
    #[serde(default)]
    pub outputs: Vec<PlanOutput>,
}

impl Plan {
    pub fn from_json(raw: &str) -> PipelineResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| PipelineError::Validation(vec![format!("plan is not valid JSON: {}", e)]))
    }
}

/// A plan whose every output references a scanned file and catalog sizes.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    plan: Plan,
    sources: HashMap<String, ScannedFile>,
}

impl ValidatedPlan {
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn outputs(&self) -> &[PlanOutput] {
        &self.plan.outputs
    }

    /// Scanned file for an output's `source_rel_path`. Present for every
    /// output of a validated plan.
    pub fn source(&self, output: &PlanOutput) -> Option<&ScannedFile> {
        self.sources.get(&output.source_rel_path)
    }
}

/// Validate a plan against the scanned file set and the size catalogs.
///
/// Every problem is collected; the plan is rejected as a whole if any is found.
pub fn validate_plan(plan: Plan, scanned: &[ScannedFile]) -> PipelineResult<ValidatedPlan> {
    let by_path: HashMap<&str, &ScannedFile> = scanned
        .iter()
        .map(|f| (f.relative_path.as_str(), f))
        .collect();
    let group_names: HashSet<&str> = plan.groups.iter().map(|g| g.name.as_str()).collect();

    let mut errors = Vec::new();

    if plan.outputs.is_empty() {
        errors.push("plan has no outputs".to_string());
    }

    for (idx, output) in plan.outputs.iter().enumerate() {
        let at = format!("outputs[{}] ({})", idx, output.source_rel_path);

        match by_path.get(output.source_rel_path.as_str()) {
            None => errors.push(format!("{}: source_rel_path is not in the scanned files", at)),
            Some(file) => match output.kind {
                OutputKind::Image if !file.is_image() => errors.push(format!(
                    "{}: kind IMAGE but source is {}",
                    at, file.detected_mime
                )),
                OutputKind::Video if !file.is_video() => errors.push(format!(
                    "{}: kind VIDEO but source is {}",
                    at, file.detected_mime
                )),
                _ => {}
            },
        }

        for size in &output.target_sizes {
            if !size.is_in_catalog() {
                errors.push(format!(
                    "{}: target size {}x{} is not an accepted size",
                    at, size.w, size.h
                ));
            }
        }

        match output.kind {
            OutputKind::Image => {
                if output.target_sizes.is_empty() {
                    errors.push(format!("{}: IMAGE output needs at least one target size", at));
                }
            }
            OutputKind::Video => match &output.endcard {
                None => errors.push(format!("{}: VIDEO output needs an endcard plan", at)),
                Some(endcard) if !endcard.target_size.is_in_catalog() => errors.push(format!(
                    "{}: endcard target size {}x{} is not an accepted size",
                    at, endcard.target_size.w, endcard.target_size.h
                )),
                Some(_) => {}
            },
        }

        if let Some(group) = &output.group {
            if !group_names.is_empty() && !group_names.contains(group.as_str()) {
                errors.push(format!("{}: group '{}' is not declared", at, group));
            }
        }
    }

    if !errors.is_empty() {
        return Err(PipelineError::Validation(errors));
    }

    let sources = plan
        .outputs
        .iter()
        .filter_map(|o| {
            by_path
                .get(o.source_rel_path.as_str())
                .map(|f| (o.source_rel_path.clone(), (*f).clone()))
        })
        .collect();

    Ok(ValidatedPlan { plan, sources })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scanned() -> Vec<ScannedFile> {
        vec![
            ScannedFile {
                relative_path: "hero.jpg".into(),
                absolute_path: "/ws/hero.jpg".into(),
                byte_size: 655_360,
                detected_mime: "image/jpeg".into(),
            },
            ScannedFile {
                relative_path: "promo.mp4".into(),
                absolute_path: "/ws/promo.mp4".into(),
                byte_size: 4_000_000,
                detected_mime: "video/mp4".into(),
            },
        ]
    }

    fn plan_json() -> serde_json::Value {
        json!({
            "groups": [{"name": "images", "tracking_link_id": "tl-1"}, {"name": "videos"}],
            "outputs": [
                {
                    "source_rel_path": "hero.jpg",
                    "kind": "IMAGE",
                    "group": "images",
                    "target_sizes": [{"w": 768, "h": 1024}, {"w": 320, "h": 50}],
                    "transforms": ["LETTERBOX", "COMPRESS_500KB"]
                },
                {
                    "source_rel_path": "promo.mp4",
                    "kind": "VIDEO",
                    "group": "videos",
                    "transforms": ["NATIVE_VIDEO"],
                    "endcard": {"mode": "SIDECAR_OR_EXTRACT", "target_size": {"w": 320, "h": 480}}
                }
            ]
        })
    }

    #[test]
    fn test_valid_plan_passes() {
        let plan: Plan = serde_json::from_value(plan_json()).unwrap();
        let validated = validate_plan(plan, &scanned()).unwrap();
        assert_eq!(validated.outputs().len(), 2);
        let video = &validated.outputs()[1];
        assert!(video.wants(PlanTransform::NativeVideo));
        assert_eq!(
            validated.source(video).map(|f| f.detected_mime.as_str()),
            Some("video/mp4")
        );
        assert_eq!(
            video.endcard.as_ref().map(|e| e.mode),
            Some(EndcardMode::SidecarOrExtract)
        );
    }

    #[test]
    fn test_rejects_size_outside_catalog() {
        let mut value = plan_json();
        value["outputs"][0]["target_sizes"] = json!([{"w": 800, "h": 600}]);
        let plan: Plan = serde_json::from_value(value).unwrap();
        let err = validate_plan(plan, &scanned()).unwrap_err();
        match err {
            PipelineError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("800x600"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_source() {
        let mut value = plan_json();
        value["outputs"][0]["source_rel_path"] = json!("missing.png");
        let plan: Plan = serde_json::from_value(value).unwrap();
        let err = validate_plan(plan, &scanned()).unwrap_err();
        assert!(err.to_string().contains("not in the scanned files"));
        assert!(err.is_batch_fatal());
    }

    #[test]
    fn test_rejects_video_without_endcard_and_bad_endcard_size() {
        let mut value = plan_json();
        value["outputs"][1]
            .as_object_mut()
            .unwrap()
            .remove("endcard");
        let plan: Plan = serde_json::from_value(value).unwrap();
        let err = validate_plan(plan, &scanned()).unwrap_err();
        assert!(err.to_string().contains("needs an endcard plan"));

        let mut value = plan_json();
        value["outputs"][1]["endcard"]["target_size"] = json!({"w": 1920, "h": 1080});
        let plan: Plan = serde_json::from_value(value).unwrap();
        let err = validate_plan(plan, &scanned()).unwrap_err();
        assert!(err.to_string().contains("endcard target size 1920x1080"));
    }

    #[test]
    fn test_collects_every_problem() {
        let mut value = plan_json();
        value["outputs"][0]["kind"] = json!("VIDEO");
        value["outputs"][0]["group"] = json!("nope");
        let plan: Plan = serde_json::from_value(value).unwrap();
        match validate_plan(plan, &scanned()).unwrap_err() {
            PipelineError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.contains("kind VIDEO but source is image/jpeg")));
                assert!(errors.iter().any(|e| e.contains("needs an endcard plan")));
                assert!(errors.iter().any(|e| e.contains("group 'nope'")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_native_sizes_are_accepted_targets() {
        let mut value = plan_json();
        value["outputs"][0]["target_sizes"] = json!([{"w": 1200, "h": 628}]);
        let plan: Plan = serde_json::from_value(value).unwrap();
        assert!(validate_plan(plan, &scanned()).is_ok());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = Plan::from_json("{not json").unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILURE");
    }
}
