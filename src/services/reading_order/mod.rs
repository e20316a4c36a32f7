// Reading order: group text regions under their panel ("frame") and
// flatten into a human reading sequence.
//
// Panels are read top to bottom; inside a panel, text columns are read
// right to left (vertical Japanese manga) unless configured otherwise.

use std::cmp::Ordering;
use tracing::{debug, trace};

use crate::core::types::{BBox, PipelineContext};

/// Horizontal reading direction inside a panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadingDirection {
    #[default]
    RightToLeft,
    LeftToRight,
}

impl ReadingDirection {
    fn compare_x(self, a: &BBox, b: &BBox) -> Ordering {
        match self {
            ReadingDirection::RightToLeft => b.x1.total_cmp(&a.x1),
            ReadingDirection::LeftToRight => a.x1.total_cmp(&b.x1),
        }
    }
}

/// One panel and the text regions assigned to it
#[derive(Debug, Clone)]
pub struct Cluster {
    pub frame: BBox,
    pub centroid: (f32, f32),
    pub members: Vec<BBox>,
}

impl Cluster {
    fn new(frame: BBox) -> Self {
        Self {
            centroid: frame.centroid(),
            frame,
            members: Vec::new(),
        }
    }
}

/// Assigns text regions to panels and orders them
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadingOrderClusterer {
    direction: ReadingDirection,
}

impl ReadingOrderClusterer {
    pub fn new(direction: ReadingDirection) -> Self {
        Self { direction }
    }

    pub fn direction(&self) -> ReadingDirection {
        self.direction
    }

    /// Build clusters in reading order (panels sorted, members sorted).
    ///
    /// Every text box lands in exactly one cluster. With no frames at all,
    /// the result is empty and [`order`](Self::order) falls back to a
    /// whole-page sort.
    pub fn cluster(&self, frames: &[BBox], texts: &[BBox]) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = frames.iter().cloned().map(Cluster::new).collect();
        if clusters.is_empty() {
            return clusters;
        }

        let mut fallback_count = 0usize;

        for text in texts {
            let text_centroid = text.centroid();

            // Cluster indices by distance from the text; stable, so equal
            // distances keep frame input order
            let mut by_distance: Vec<(usize, f32)> = clusters
                .iter()
                .enumerate()
                .map(|(i, c)| (i, c.frame.distance_to(text)))
                .collect();
            by_distance.sort_by(|a, b| a.1.total_cmp(&b.1));

            let containing = by_distance.iter().find(|(i, _)| {
                let frame = &clusters[*i].frame;
                !frame.is_degenerate() && frame.contains_point(text_centroid)
            });

            let target = match containing {
                Some((i, _)) => *i,
                None => {
                    fallback_count += 1;
                    // non-empty: clusters.is_empty() returned early
                    by_distance[0].0
                }
            };

            trace!(
                "Text at ({:.3},{:.3}) -> frame {}{}",
                text_centroid.0,
                text_centroid.1,
                target,
                if containing.is_none() { " (nearest)" } else { "" }
            );
            clusters[target].members.push(text.clone());
        }

        for cluster in &mut clusters {
            cluster.members.sort_by(|a, b| self.direction.compare_x(a, b));
        }
        clusters.sort_by(|a, b| a.centroid.1.total_cmp(&b.centroid.1));

        debug!(
            "Clustered {} texts into {} frames ({} by nearest-frame fallback)",
            texts.len(),
            clusters.len(),
            fallback_count
        );

        clusters
    }

    /// Text boxes in reading order; position + 1 is the reading rank
    pub fn order(&self, ctx: &PipelineContext) -> Vec<BBox> {
        if ctx.frames.is_empty() {
            return self.order_without_frames(&ctx.texts);
        }

        self.cluster(&ctx.frames, &ctx.texts)
            .into_iter()
            .flat_map(|c| c.members)
            .collect()
    }

    /// Whole page as one implicit panel: top to bottom, then by direction
    fn order_without_frames(&self, texts: &[BBox]) -> Vec<BBox> {
        let mut ordered = texts.to_vec();
        ordered.sort_by(|a, b| {
            a.centroid()
                .1
                .total_cmp(&b.centroid().1)
                .then_with(|| self.direction.compare_x(a, b))
        });
        debug!("No frames detected: ordered {} texts as a single page group", ordered.len());
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Label;

    fn frame(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox::new(x1, y1, x2, y2, Label::Frame, 0.9)
    }

    fn text(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox::new(x1, y1, x2, y2, Label::Text, 0.9)
    }

    fn ctx(frames: Vec<BBox>, texts: Vec<BBox>) -> PipelineContext {
        PipelineContext {
            image_key: "page.png".to_string(),
            frames,
            texts,
        }
    }

    #[test]
    fn test_single_frame_right_to_left() {
        let upper_right = text(5.0, 1.0, 6.0, 2.0);
        let lower_left = text(1.0, 8.0, 2.0, 9.0);
        let ordered = ReadingOrderClusterer::default().order(&ctx(
            vec![frame(0.0, 0.0, 10.0, 10.0)],
            vec![lower_left.clone(), upper_right.clone()],
        ));
        assert_eq!(ordered, vec![upper_right, lower_left]);
    }

    #[test]
    fn test_panels_top_to_bottom() {
        let bottom_panel_text = text(1.0, 12.0, 2.0, 14.0);
        let top_panel_left = text(1.0, 1.0, 2.0, 3.0);
        let top_panel_right = text(7.0, 1.0, 8.0, 3.0);

        let ordered = ReadingOrderClusterer::default().order(&ctx(
            vec![frame(0.0, 10.0, 10.0, 20.0), frame(0.0, 0.0, 10.0, 10.0)],
            vec![
                bottom_panel_text.clone(),
                top_panel_left.clone(),
                top_panel_right.clone(),
            ],
        ));
        assert_eq!(ordered, vec![top_panel_right, top_panel_left, bottom_panel_text]);
    }

    #[test]
    fn test_left_to_right_direction() {
        let a = text(1.0, 1.0, 2.0, 2.0);
        let b = text(5.0, 1.0, 6.0, 2.0);
        let ordered = ReadingOrderClusterer::new(ReadingDirection::LeftToRight).order(&ctx(
            vec![frame(0.0, 0.0, 10.0, 10.0)],
            vec![b.clone(), a.clone()],
        ));
        assert_eq!(ordered, vec![a, b]);
    }

    #[test]
    fn test_outside_text_falls_back_to_nearest_frame() {
        let far_frame = frame(0.0, 0.0, 10.0, 10.0);
        let near_frame = frame(30.0, 0.0, 40.0, 10.0);
        let outside = text(42.0, 4.0, 44.0, 6.0);

        let clusters =
            ReadingOrderClusterer::default().cluster(&[far_frame, near_frame.clone()], &[outside.clone()]);
        let owner = clusters.iter().find(|c| !c.members.is_empty()).unwrap();
        assert_eq!(owner.frame, near_frame);
        assert_eq!(owner.members, vec![outside.clone()]);

        let ordered = ReadingOrderClusterer::default().order(&ctx(
            vec![frame(0.0, 0.0, 10.0, 10.0), frame(30.0, 0.0, 40.0, 10.0)],
            vec![outside.clone()],
        ));
        assert_eq!(ordered, vec![outside]);
    }

    #[test]
    fn test_containment_beats_distance() {
        // big panel whose centre is far away still owns the text
        let big = frame(0.0, 0.0, 100.0, 100.0);
        let small = frame(80.0, 0.0, 90.0, 4.0);
        let t = text(92.0, 10.0, 94.0, 12.0);

        let clusters = ReadingOrderClusterer::default().cluster(&[big.clone(), small], &[t]);
        let owner = clusters.iter().find(|c| !c.members.is_empty()).unwrap();
        assert_eq!(owner.frame, big);
    }

    #[test]
    fn test_degenerate_frame_only_used_as_fallback() {
        let degenerate = frame(5.0, 5.0, 5.0, 5.0);
        let real = frame(20.0, 0.0, 30.0, 10.0);
        let t = text(4.0, 4.0, 6.0, 6.0);

        let clusters = ReadingOrderClusterer::default().cluster(&[degenerate.clone(), real], &[t]);
        let owner = clusters.iter().find(|c| !c.members.is_empty()).unwrap();
        // no containing frame, so nearest wins even though it has zero area
        assert_eq!(owner.frame, degenerate);
    }

    #[test]
    fn test_no_frames_sorts_whole_page() {
        let top = text(1.0, 0.0, 2.0, 2.0);
        let mid_right = text(8.0, 5.0, 9.0, 7.0);
        let mid_left = text(1.0, 5.0, 2.0, 7.0);

        let ordered = ReadingOrderClusterer::default().order(&ctx(
            vec![],
            vec![mid_left.clone(), top.clone(), mid_right.clone()],
        ));
        assert_eq!(ordered, vec![top, mid_right, mid_left]);
    }

    #[test]
    fn test_every_text_appears_once_and_is_idempotent() {
        let frames = vec![
            frame(0.0, 0.0, 50.0, 40.0),
            frame(50.0, 0.0, 100.0, 40.0),
            frame(0.0, 40.0, 100.0, 100.0),
        ];
        let texts: Vec<BBox> = (0..12)
            .map(|i| {
                let x = (i * 37 % 100) as f32;
                let y = (i * 53 % 100) as f32;
                text(x, y, x + 3.0, y + 5.0)
            })
            .collect();

        let clusterer = ReadingOrderClusterer::default();
        let first = clusterer.order(&ctx(frames.clone(), texts.clone()));
        let second = clusterer.order(&ctx(frames, texts.clone()));

        assert_eq!(first.len(), texts.len());
        for t in &texts {
            assert_eq!(first.iter().filter(|o| *o == t).count(), 1);
        }
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_inputs() {
        let clusterer = ReadingOrderClusterer::default();
        assert!(clusterer.order(&ctx(vec![], vec![])).is_empty());
        assert!(clusterer.order(&ctx(vec![frame(0.0, 0.0, 1.0, 1.0)], vec![])).is_empty());
    }
}
