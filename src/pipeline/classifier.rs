use crate::{
    config::LabelTable,
    error::ClassifierError,
    pipeline::features::HandFeatures,
    types::ClassificationResult,
};

/// A loaded, synchronous gesture model.
pub trait GestureModel: Send {
    /// Scores for one input; each returned row has `num_classes` entries.
    fn infer(&mut self, features: &[f32], num_classes: usize)
    -> Result<Vec<Vec<f32>>, ClassifierError>;
}

/// Builds a model from its serialized bytes.
pub trait GestureModelLoader {
    type Model: GestureModel + 'static;

    fn load(&self, model_bytes: &[u8]) -> Result<Self::Model, ClassifierError>;
}

/// Index of the largest value; the first one wins ties.
pub fn arg_max(values: &[f32]) -> Option<usize> {
    let (&first, rest) = values.split_first()?;
    let mut max_idx = 0;
    let mut max_val = first;
    for (offset, &value) in rest.iter().enumerate() {
        if value > max_val {
            max_val = value;
            max_idx = offset + 1;
        }
    }
    Some(max_idx)
}

pub struct ClassifierFacade {
    model: Option<Box<dyn GestureModel>>,
    labels: LabelTable,
}

impl ClassifierFacade {
    pub fn new(model: Box<dyn GestureModel>, labels: LabelTable) -> Self {
        Self {
            model: Some(model),
            labels,
        }
    }

    pub fn load<L: GestureModelLoader>(
        loader: &L,
        model_bytes: &[u8],
        labels: LabelTable,
    ) -> Result<Self, ClassifierError> {
        let model = loader.load(model_bytes)?;
        log::info!(
            "gesture classifier loaded ({} bytes, {} classes)",
            model_bytes.len(),
            labels.len()
        );
        Ok(Self::new(Box::new(model), labels))
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    pub fn try_classify(
        &mut self,
        features: HandFeatures<'_>,
    ) -> Result<ClassificationResult, ClassifierError> {
        let model = self.model.as_mut().ok_or(ClassifierError::Unavailable)?;
        let num_classes = self.labels.len();

        let rows = model.infer(features.values(), num_classes)?;
        let probabilities = rows
            .into_iter()
            .next()
            .ok_or(ClassifierError::EmptyOutput)?;
        if probabilities.len() != num_classes {
            return Err(ClassifierError::ClassCount {
                expected: num_classes,
                got: probabilities.len(),
            });
        }

        let index = arg_max(&probabilities).ok_or(ClassifierError::EmptyOutput)?;
        let label = self
            .labels
            .get(index)
            .ok_or(ClassifierError::ClassCount {
                expected: num_classes,
                got: probabilities.len(),
            })?
            .to_string();

        Ok(ClassificationResult {
            probabilities,
            index,
            label,
        })
    }

    /// Like `try_classify`, but logs failures and reports them as no result.
    pub fn classify(&mut self, features: HandFeatures<'_>) -> Option<ClassificationResult> {
        match self.try_classify(features) {
            Ok(result) => {
                log::debug!(
                    "predicted {} ({:.0}%)",
                    result.label,
                    result.confidence() * 100.0
                );
                Some(result)
            }
            Err(ClassifierError::Unavailable) => {
                log::debug!("classifier released, skipping classification");
                None
            }
            Err(err) => {
                log::warn!("gesture classification failed: {err}");
                None
            }
        }
    }

    pub fn teardown(&mut self) {
        if self.model.take().is_some() {
            log::info!("gesture classifier released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::features::FeatureBuilder,
        testing::{ScriptedLoader, ScriptedModel, open_palm_landmarks},
    };

    fn one_hot(index: usize, len: usize) -> Vec<f32> {
        let mut scores = vec![0.0; len];
        scores[index] = 1.0;
        scores
    }

    #[test]
    fn arg_max_prefers_lowest_index_on_tie() {
        let mut scores = vec![0.0; 26];
        scores[0] = 0.5;
        scores[1] = 0.5;
        assert_eq!(arg_max(&scores), Some(0));
        assert_eq!(arg_max(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(arg_max(&[]), None);
    }

    #[test]
    fn arg_max_scans_whole_sequence() {
        assert_eq!(arg_max(&[0.1, 0.2, 0.3, 0.9]), Some(3));
        assert_eq!(arg_max(&[-3.0, -1.0, -2.0]), Some(1));
    }

    #[test]
    fn classify_maps_index_to_label() {
        let (model, probe) = ScriptedModel::new(one_hot(1, 26));
        let mut facade = ClassifierFacade::new(Box::new(model), LabelTable::alphabet());
        let features = FeatureBuilder::default().build(&open_palm_landmarks());

        let result = facade.classify(features.as_hand().unwrap()).unwrap();
        assert_eq!(result.index, 1);
        assert_eq!(result.label, "B");
        assert_eq!(result.probabilities.len(), 26);
        assert_eq!(probe.calls(), 1);
        assert_eq!(probe.last_input().unwrap().len(), 63);
    }

    #[test]
    fn wrong_class_count_is_rejected() {
        let (model, _probe) = ScriptedModel::new(vec![0.2, 0.8]);
        let mut facade = ClassifierFacade::new(Box::new(model), LabelTable::alphabet());
        let features = FeatureBuilder::default().build(&open_palm_landmarks());

        let err = facade.try_classify(features.as_hand().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::ClassCount {
                expected: 26,
                got: 2
            }
        ));
        assert!(facade.classify(features.as_hand().unwrap()).is_none());
    }

    #[test]
    fn classify_after_teardown_is_noop() {
        let (model, probe) = ScriptedModel::new(one_hot(3, 26));
        let mut facade = ClassifierFacade::new(Box::new(model), LabelTable::alphabet());
        facade.teardown();
        let features = FeatureBuilder::default().build(&open_palm_landmarks());

        assert!(facade.classify(features.as_hand().unwrap()).is_none());
        assert!(!facade.is_available());
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn loaded_model_classifies_to_label() {
        let loader = ScriptedLoader {
            scores: one_hot(2, 26),
        };
        let mut facade = ClassifierFacade::load(&loader, b"model", LabelTable::alphabet()).unwrap();
        assert!(facade.is_available());
        assert_eq!(facade.labels().len(), 26);

        let features = FeatureBuilder::default().build(&open_palm_landmarks());
        let result = facade.classify(features.as_hand().unwrap()).unwrap();
        assert_eq!(result.index, 2);
        assert_eq!(result.label, "C");
    }

    #[test]
    fn empty_model_bytes_fail_to_load() {
        let loader = ScriptedLoader {
            scores: one_hot(0, 26),
        };
        let err = ClassifierFacade::load(&loader, &[], LabelTable::alphabet())
            .err()
            .unwrap();
        assert!(matches!(err, ClassifierError::Backend(_)));
    }

    #[test]
    fn custom_label_table_is_used() {
        let labels = LabelTable::new(["hello", "thanks", "yes"]).unwrap();
        let (model, _probe) = ScriptedModel::new(vec![0.1, 0.2, 0.7]);
        let mut facade = ClassifierFacade::new(Box::new(model), labels);
        let features = FeatureBuilder::default().build(&open_palm_landmarks());

        let result = facade.classify(features.as_hand().unwrap()).unwrap();
        assert_eq!(result.label, "yes");
    }
}
