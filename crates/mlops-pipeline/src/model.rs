//! Model capability and concrete classifiers
//!
//! Every classifier exposes the same [`Model`] capability; [`TrainedModel`]
//! is the persisted form, tagged by variant.

use crate::error::PipelineError;
use mlops_artifact::Table;
use mlops_core::ModelChoice;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Feature matrix and class labels extracted from a table
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// One feature row per sample
    pub features: Vec<Vec<f64>>,
    /// Class label per sample
    pub labels: Vec<u32>,
}

impl Dataset {
    /// Split `table` into numeric features and the `target` label column
    ///
    /// # Errors
    /// Returns [`PipelineError::MissingColumn`] if `target` is absent, or
    /// [`PipelineError::NonNumeric`] for any unparsable cell.
    pub fn from_table(table: &Table, target: &str) -> Result<Self, PipelineError> {
        let target_idx = table
            .column_index(target)
            .ok_or_else(|| PipelineError::MissingColumn(target.to_string()))?;
        let mut features = Vec::with_capacity(table.row_count());
        let mut labels = Vec::with_capacity(table.row_count());

        for (r, row) in table.rows().iter().enumerate() {
            let mut values = Vec::with_capacity(row.len().saturating_sub(1));
            for (c, cell) in row.iter().enumerate() {
                let non_numeric = || PipelineError::NonNumeric {
                    row: r + 1,
                    column: table.header().get(c).cloned().unwrap_or_default(),
                    value: cell.clone(),
                };
                if c == target_idx {
                    let label: f64 = cell.parse().map_err(|_| non_numeric())?;
                    if label < 0.0 || label.fract() != 0.0 {
                        return Err(non_numeric());
                    }
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let label = label as u32;
                    labels.push(label);
                } else {
                    values.push(cell.parse().map_err(|_| non_numeric())?);
                }
            }
            features.push(values);
        }
        Ok(Self { features, labels })
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Classifier capability: fit, predict, predict class probabilities
pub trait Model: Send + Sync + Debug {
    /// Variant identifier
    fn kind(&self) -> ModelChoice;

    /// Fit on `features` / `labels`
    ///
    /// # Errors
    /// Returns [`PipelineError::EmptyDataset`] for empty input.
    fn fit(&mut self, features: &[Vec<f64>], labels: &[u32]) -> Result<(), PipelineError>;

    /// Class probabilities per sample, ordered as [`Model::classes`]
    ///
    /// # Errors
    /// Returns [`PipelineError::NotFitted`] before `fit`.
    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, PipelineError>;

    /// Known classes, ascending
    fn classes(&self) -> &[u32];

    /// Most probable class per sample
    ///
    /// # Errors
    /// Returns [`PipelineError::NotFitted`] before `fit`.
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<u32>, PipelineError> {
        let classes = self.classes();
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|probs| {
                probs
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map_or(0, |(i, _)| classes[i])
            })
            .collect())
    }
}

fn sorted_classes(labels: &[u32]) -> Vec<u32> {
    let mut classes = labels.to_vec();
    classes.sort_unstable();
    classes.dedup();
    classes
}

/// Always predicts the class priors seen during fit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MajorityClassifier {
    classes: Vec<u32>,
    priors: Vec<f64>,
}

impl Model for MajorityClassifier {
    fn kind(&self) -> ModelChoice {
        ModelChoice::Majority
    }

    fn fit(&mut self, _features: &[Vec<f64>], labels: &[u32]) -> Result<(), PipelineError> {
        if labels.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }
        self.classes = sorted_classes(labels);
        #[allow(clippy::cast_precision_loss)]
        let total = labels.len() as f64;
        self.priors = self
            .classes
            .iter()
            .map(|c| {
                #[allow(clippy::cast_precision_loss)]
                let count = labels.iter().filter(|l| *l == c).count() as f64;
                count / total
            })
            .collect();
        Ok(())
    }

    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, PipelineError> {
        if self.classes.is_empty() {
            return Err(PipelineError::NotFitted);
        }
        Ok(vec![self.priors.clone(); features.len()])
    }

    fn classes(&self) -> &[u32] {
        &self.classes
    }
}

/// Assigns each sample to the class with the closest mean feature vector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroid {
    classes: Vec<u32>,
    centroids: Vec<Vec<f64>>,
}

impl Model for NearestCentroid {
    fn kind(&self) -> ModelChoice {
        ModelChoice::NearestCentroid
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[u32]) -> Result<(), PipelineError> {
        if labels.is_empty() || features.len() != labels.len() {
            return Err(PipelineError::EmptyDataset);
        }
        let width = features[0].len();
        self.classes = sorted_classes(labels);
        self.centroids = self
            .classes
            .iter()
            .map(|class| {
                let mut sum = vec![0.0; width];
                let mut n = 0usize;
                for (row, _) in features.iter().zip(labels).filter(|(_, l)| *l == class) {
                    for (acc, v) in sum.iter_mut().zip(row) {
                        *acc += v;
                    }
                    n += 1;
                }
                #[allow(clippy::cast_precision_loss)]
                let n = n as f64;
                sum.into_iter().map(|s| s / n).collect()
            })
            .collect();
        Ok(())
    }

    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, PipelineError> {
        let Some(width) = self.centroids.first().map(Vec::len) else {
            return Err(PipelineError::NotFitted);
        };
        features
            .iter()
            .map(|row| {
                if row.len() != width {
                    return Err(PipelineError::FeatureMismatch {
                        expected: width,
                        actual: row.len(),
                    });
                }
                // softmax over negative distances
                let scores: Vec<f64> = self
                    .centroids
                    .iter()
                    .map(|c| -c.iter().zip(row).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt())
                    .collect();
                let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
                let total: f64 = exp.iter().sum();
                Ok(exp.into_iter().map(|e| e / total).collect())
            })
            .collect()
    }

    fn classes(&self) -> &[u32] {
        &self.classes
    }
}

/// Persisted model, tagged by variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedModel {
    Majority(MajorityClassifier),
    NearestCentroid(NearestCentroid),
}

impl TrainedModel {
    /// Unfitted model of the chosen variant
    #[must_use]
    pub fn new(choice: ModelChoice) -> Self {
        match choice {
            ModelChoice::Majority => Self::Majority(MajorityClassifier::default()),
            ModelChoice::NearestCentroid => Self::NearestCentroid(NearestCentroid::default()),
        }
    }

    /// Borrow as the [`Model`] capability
    #[must_use]
    pub fn as_model(&self) -> &dyn Model {
        match self {
            Self::Majority(m) => m,
            Self::NearestCentroid(m) => m,
        }
    }

    /// Mutably borrow as the [`Model`] capability
    pub fn as_model_mut(&mut self) -> &mut dyn Model {
        match self {
            Self::Majority(m) => m,
            Self::NearestCentroid(m) => m,
        }
    }

    /// Fraction of correctly predicted samples
    ///
    /// # Errors
    /// Propagates prediction errors; empty data is [`PipelineError::EmptyDataset`].
    pub fn accuracy(&self, data: &Dataset) -> Result<f64, PipelineError> {
        if data.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }
        let predictions = self.as_model().predict(&data.features)?;
        let correct = predictions
            .iter()
            .zip(&data.labels)
            .filter(|(p, l)| p == l)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let accuracy = correct as f64 / data.len() as f64;
        Ok(accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Dataset {
        let table = Table::parse("f0,f1,target\n0,0,0\n0.2,0.1,0\n5,5,1\n5.1,4.9,1\n4.8,5.2,1\n").unwrap();
        Dataset::from_table(&table, "target").unwrap()
    }

    #[test]
    fn dataset_extraction() {
        let data = toy();
        assert_eq!(data.len(), 5);
        assert_eq!(data.features[2], vec![5.0, 5.0]);
        assert_eq!(data.labels, vec![0, 0, 1, 1, 1]);
    }

    #[test]
    fn dataset_rejects_bad_cells() {
        let table = Table::parse("f0,target\nx,1\n").unwrap();
        assert!(matches!(
            Dataset::from_table(&table, "target"),
            Err(PipelineError::NonNumeric { row: 1, .. })
        ));
        let table = Table::parse("f0,target\n1,0.5\n").unwrap();
        assert!(Dataset::from_table(&table, "target").is_err());
        assert!(matches!(
            Dataset::from_table(&table, "label"),
            Err(PipelineError::MissingColumn(_))
        ));
    }

    #[test]
    fn majority_predicts_most_frequent_class() {
        let data = toy();
        let mut model = TrainedModel::new(ModelChoice::Majority);
        model.as_model_mut().fit(&data.features, &data.labels).unwrap();
        assert_eq!(model.as_model().predict(&data.features).unwrap(), vec![1; 5]);
        let proba = model.as_model().predict_proba(&data.features[..1]).unwrap();
        assert!((proba[0][1] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn nearest_centroid_separates_clusters() {
        let data = toy();
        let mut model = TrainedModel::new(ModelChoice::NearestCentroid);
        model.as_model_mut().fit(&data.features, &data.labels).unwrap();
        assert!((model.accuracy(&data).unwrap() - 1.0).abs() < f64::EPSILON);
        let proba = model.as_model().predict_proba(&[vec![0.0, 0.0]]).unwrap();
        assert!(proba[0][0] > 0.9);
        assert!((proba[0].iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unfitted_and_mismatched_inputs() {
        let model = TrainedModel::new(ModelChoice::NearestCentroid);
        assert!(matches!(model.as_model().predict(&[vec![1.0]]), Err(PipelineError::NotFitted)));

        let data = toy();
        let mut model = TrainedModel::new(ModelChoice::NearestCentroid);
        model.as_model_mut().fit(&data.features, &data.labels).unwrap();
        assert!(matches!(
            model.as_model().predict(&[vec![1.0]]),
            Err(PipelineError::FeatureMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn persisted_form_is_tagged() {
        let data = toy();
        let mut model = TrainedModel::new(ModelChoice::Majority);
        model.as_model_mut().fit(&data.features, &data.labels).unwrap();
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["kind"], "majority");
        let back: TrainedModel = serde_json::from_value(json).unwrap();
        assert_eq!(back, model);
        assert_eq!(back.as_model().kind(), ModelChoice::Majority);
    }
}
