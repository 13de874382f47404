use crate::{
    config::HandSelection,
    types::{FEATURE_LEN, LandmarkSet, NUM_KEYPOINTS},
};

/// The classifier input: one hand's 21 keypoints as (x, y, z) triples.
///
/// Always exactly `FEATURE_LEN` long. When no usable hand is present the
/// vector is the all-zero sentinel, tagged so it can't be mistaken for a hand
/// that happens to sit at the origin.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    values: [f32; FEATURE_LEN],
    hand: Option<usize>,
}

impl FeatureVector {
    pub fn sentinel() -> Self {
        Self {
            values: [0.0; FEATURE_LEN],
            hand: None,
        }
    }

    pub fn values(&self) -> &[f32; FEATURE_LEN] {
        &self.values
    }

    pub fn is_sentinel(&self) -> bool {
        self.hand.is_none()
    }

    /// Index of the hand the values came from.
    pub fn hand_index(&self) -> Option<usize> {
        self.hand
    }

    pub fn as_hand(&self) -> Option<HandFeatures<'_>> {
        self.hand.map(|_| HandFeatures { vector: self })
    }
}

/// A feature vector known to come from a real hand. Only the classifier
/// accepts features, and only in this form.
#[derive(Clone, Copy, Debug)]
pub struct HandFeatures<'a> {
    vector: &'a FeatureVector,
}

impl<'a> HandFeatures<'a> {
    pub fn values(&self) -> &'a [f32] {
        &self.vector.values
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FeatureBuilder {
    selection: HandSelection,
}

impl FeatureBuilder {
    pub fn new(selection: HandSelection) -> Self {
        Self { selection }
    }

    pub fn build(&self, landmarks: &LandmarkSet) -> FeatureVector {
        let Some((index, hand)) = self.selection.select(landmarks) else {
            return FeatureVector::sentinel();
        };
        if !hand.is_complete() {
            log::warn!(
                "hand {index} has {} keypoints, need {NUM_KEYPOINTS}; treating as no hand",
                hand.keypoints.len()
            );
            return FeatureVector::sentinel();
        }

        let mut values = [0.0; FEATURE_LEN];
        for (dst, point) in values.chunks_exact_mut(3).zip(&hand.keypoints) {
            dst[0] = point.x;
            dst[1] = point.y;
            dst[2] = point.z;
        }

        FeatureVector {
            values,
            hand: Some(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hand, Keypoint};

    fn indexed_hand(offset: f32) -> Hand {
        Hand::new(
            (0..NUM_KEYPOINTS)
                .map(|i| {
                    let base = offset + i as f32 * 3.0;
                    Keypoint::new(base, base + 1.0, base + 2.0)
                })
                .collect(),
        )
    }

    #[test]
    fn empty_set_yields_zero_sentinel() {
        let features = FeatureBuilder::default().build(&LandmarkSet::empty());
        assert!(features.is_sentinel());
        assert!(features.as_hand().is_none());
        assert_eq!(features.values().len(), 63);
        assert!(features.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn first_hand_is_flattened_in_order() {
        let set = LandmarkSet::with_hands(vec![indexed_hand(0.0), indexed_hand(1000.0)]);
        let features = FeatureBuilder::default().build(&set);

        assert_eq!(features.hand_index(), Some(0));
        let expected: Vec<f32> = (0..FEATURE_LEN).map(|i| i as f32).collect();
        assert_eq!(features.values().as_slice(), expected.as_slice());
    }

    #[test]
    fn zero_valued_hand_is_not_the_sentinel() {
        let set = LandmarkSet::with_hands(vec![Hand::new(vec![Keypoint::default(); 21])]);
        let features = FeatureBuilder::default().build(&set);
        assert!(features.values().iter().all(|&v| v == 0.0));
        assert!(!features.is_sentinel());
        assert!(features.as_hand().is_some());
    }

    #[test]
    fn incomplete_hand_is_never_partially_copied() {
        let mut hand = indexed_hand(0.0);
        hand.keypoints.truncate(12);
        let features = FeatureBuilder::default().build(&LandmarkSet::with_hands(vec![hand]));
        assert!(features.is_sentinel());
        assert!(features.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn selection_policy_picks_other_hand() {
        let mut weak = indexed_hand(0.0);
        weak.score = 0.1;
        let strong = indexed_hand(1000.0);
        let set = LandmarkSet::with_hands(vec![weak, strong]);

        let features = FeatureBuilder::new(HandSelection::MostConfident).build(&set);
        assert_eq!(features.hand_index(), Some(1));
        assert_eq!(features.values()[0], 1000.0);
    }
}
