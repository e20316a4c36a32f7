use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::{BBox, Label};

/// Which suppression pass to run over decoded candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuppressionPolicy {
    /// Any spatial overlap with a stronger box removes the weaker one
    Hard,
    /// Per-label Gaussian score decay (two-class frame/text detector)
    #[default]
    Soft,
}

/// Soft-NMS parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftNmsParams {
    /// IoU above which scores decay; decayed scores below it are dropped
    pub overlap_threshold: f32,
    pub sigma: f32,
}

impl Default for SoftNmsParams {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.4,
            sigma: 0.5,
        }
    }
}

/// Removes or dampens overlapping duplicate candidates
#[derive(Debug, Clone)]
pub struct Suppressor {
    policy: SuppressionPolicy,
    params: SoftNmsParams,
}

impl Suppressor {
    pub fn new(policy: SuppressionPolicy, params: SoftNmsParams) -> DetectionResult<Self> {
        if !(0.0..=1.0).contains(&params.overlap_threshold) {
            return Err(DetectionError::InvalidParameter(format!(
                "overlap_threshold must be in [0, 1], got {}",
                params.overlap_threshold
            )));
        }
        if !(params.sigma > 0.0) {
            return Err(DetectionError::InvalidParameter(format!(
                "sigma must be > 0, got {}",
                params.sigma
            )));
        }
        Ok(Self { policy, params })
    }

    pub fn hard() -> Self {
        Self {
            policy: SuppressionPolicy::Hard,
            params: SoftNmsParams::default(),
        }
    }

    pub fn policy(&self) -> SuppressionPolicy {
        self.policy
    }

    pub fn suppress(&self, boxes: Vec<BBox>) -> Vec<BBox> {
        match self.policy {
            SuppressionPolicy::Hard => hard_nms(boxes),
            SuppressionPolicy::Soft => soft_nms(boxes, self.params),
        }
    }
}

/// Greedy accept/reject suppression on any overlap, ignoring labels.
///
/// Result is in descending score order.
pub fn hard_nms(boxes: Vec<BBox>) -> Vec<BBox> {
    if boxes.is_empty() {
        debug!("NMS: No detections to filter");
        return vec![];
    }

    let mut sorted = boxes;
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];
    let mut suppressed_count = 0;

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }

        for j in (i + 1)..sorted.len() {
            if !suppressed[j] && sorted[i].overlaps(&sorted[j]) {
                suppressed[j] = true;
                suppressed_count += 1;
                trace!("NMS: Suppressed detection {} (overlaps detection {})", j, i);
            }
        }

        keep.push(sorted[i].clone());
    }

    debug!(
        "NMS: Kept {}/{} detections (suppressed {})",
        keep.len(),
        sorted.len(),
        suppressed_count
    );
    keep
}

/// IoU with the edge-inclusive (+1) pixel convention
pub fn iou_inclusive(a: &BBox, b: &BBox) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1) + 1.0).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1) + 1.0).max(0.0);
    let intersection = inter_w * inter_h;

    let area_a = (a.x2 - a.x1 + 1.0) * (a.y2 - a.y1 + 1.0);
    let area_b = (b.x2 - b.x1 + 1.0) * (b.y2 - b.y1 + 1.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Soft-NMS with Gaussian decay, run independently per label.
///
/// Label groups come out in `Label` order, each group in acceptance order.
pub fn soft_nms(boxes: Vec<BBox>, params: SoftNmsParams) -> Vec<BBox> {
    if boxes.is_empty() {
        debug!("Soft-NMS: No detections to filter");
        return vec![];
    }

    let total = boxes.len();
    let mut groups: BTreeMap<Label, Vec<BBox>> = BTreeMap::new();
    for b in boxes {
        groups.entry(b.label.clone()).or_default().push(b);
    }

    let mut keep = Vec::with_capacity(total);

    for (label, mut pool) in groups {
        let group_size = pool.len();
        pool.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut accepted = 0usize;
        while !pool.is_empty() {
            // first maximum, so ties keep the initial sort order
            let mut best_index = 0;
            for (i, candidate) in pool.iter().enumerate().skip(1) {
                if candidate.score > pool[best_index].score {
                    best_index = i;
                }
            }
            let best = pool.remove(best_index);

            pool.retain_mut(|other| {
                let iou = iou_inclusive(&best, other);
                if iou <= params.overlap_threshold {
                    return true;
                }
                let decayed = other.score * (-(iou * iou) / params.sigma).exp();
                trace!(
                    "Soft-NMS [{}]: IoU={:.3} decays {:.3} -> {:.3}",
                    label, iou, other.score, decayed
                );
                other.score = decayed;
                decayed >= params.overlap_threshold
            });

            keep.push(best);
            accepted += 1;
        }

        debug!("Soft-NMS [{}]: Kept {}/{} detections", label, accepted, group_size);
    }

    keep
}
