use std::{fs, path::Path, path::PathBuf, sync::Arc};

use crate::{
    error::ConfigError,
    types::{Hand, LandmarkSet},
};

const ALPHABET: [&str; 26] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
    "T", "U", "V", "W", "X", "Y", "Z",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunningMode {
    Image,
    Video,
    LiveStream,
}

#[derive(Clone, Debug)]
pub struct DetectorOptions {
    pub max_hands: usize,
    pub mode: RunningMode,
    /// Presence score below which a backend reports no hand.
    pub min_presence: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            max_hands: 2,
            mode: RunningMode::LiveStream,
            min_presence: 0.2,
        }
    }
}

/// Which detected hand feeds the classifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandSelection {
    /// The first hand in detector order.
    #[default]
    First,
    /// The hand with the highest presence score, earliest on ties.
    MostConfident,
}

impl HandSelection {
    pub fn select<'a>(&self, set: &'a LandmarkSet) -> Option<(usize, &'a Hand)> {
        match self {
            HandSelection::First => set.hands.first().map(|hand| (0, hand)),
            HandSelection::MostConfident => {
                let mut best: Option<(usize, &Hand)> = None;
                for (idx, hand) in set.hands.iter().enumerate() {
                    match best {
                        Some((_, current)) if hand.score <= current.score => {}
                        _ => best = Some((idx, hand)),
                    }
                }
                best
            }
        }
    }
}

/// Class labels, indexed the same way as the classifier's output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    labels: Arc<[String]>,
}

impl LabelTable {
    pub fn alphabet() -> Self {
        Self {
            labels: ALPHABET.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn new<I, S>(labels: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Arc<[String]> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(ConfigError::EmptyLabels);
        }
        Ok(Self { labels })
    }

    /// One label per non-blank line; surrounding whitespace is trimmed.
    pub fn from_lines(text: &str) -> Result<Self, ConfigError> {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        )
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_lines(&text)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::alphabet()
    }
}

#[derive(Clone, Debug)]
pub struct OverlayStyle {
    pub line_color: [u8; 4],
    pub point_color: [u8; 4],
    pub line_thickness: i32,
    pub point_radius: i32,
    /// Flip horizontally for a selfie view.
    pub mirror: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            line_color: [56, 189, 248, 255],
            point_color: [74, 222, 128, 255],
            line_thickness: 4,
            point_radius: 6,
            mirror: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    pub detector: DetectorOptions,
    pub hand_selection: HandSelection,
    /// Append every detected hand to this CSV file.
    pub landmark_log: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Keypoint;

    fn hand_with_score(score: f32) -> Hand {
        Hand {
            score,
            ..Hand::new(vec![Keypoint::default(); 21])
        }
    }

    #[test]
    fn alphabet_maps_index_to_letter() {
        let labels = LabelTable::alphabet();
        assert_eq!(labels.len(), 26);
        assert_eq!(labels.get(0), Some("A"));
        assert_eq!(labels.get(1), Some("B"));
        assert_eq!(labels.get(25), Some("Z"));
        assert_eq!(labels.get(26), None);
    }

    #[test]
    fn labels_from_lines_skip_blanks() {
        let labels = LabelTable::from_lines("hello\n\n  thanks \nyes\n").unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(1), Some("thanks"));
    }

    #[test]
    fn empty_label_file_is_rejected() {
        assert!(matches!(
            LabelTable::from_lines("\n \n"),
            Err(ConfigError::EmptyLabels)
        ));
    }

    #[test]
    fn first_selection_ignores_scores() {
        let set = LandmarkSet::with_hands(vec![hand_with_score(0.3), hand_with_score(0.9)]);
        let (idx, _) = HandSelection::First.select(&set).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn most_confident_keeps_earliest_on_tie() {
        let set = LandmarkSet::with_hands(vec![
            hand_with_score(0.4),
            hand_with_score(0.8),
            hand_with_score(0.8),
        ]);
        let (idx, _) = HandSelection::MostConfident.select(&set).unwrap();
        assert_eq!(idx, 1);
        assert!(HandSelection::MostConfident.select(&LandmarkSet::empty()).is_none());
    }
}
