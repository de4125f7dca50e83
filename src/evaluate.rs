use crate::error::{Error, Result};
use crate::features::{Feature, Observation, design_matrix, labels};
use crate::forest::RandomForest;
use crate::metrics::{self, ConfusionMatrix, PrPoint, RocPoint};
use crate::record::Party;
use serde::{Deserialize, Serialize};

/// A test county the model got wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Misclassified {
    pub fips: String,
    pub name: String,
    pub state: String,
    pub actual: Party,
    pub predicted: Party,
    /// Predicted probability of the positive class.
    pub probability: f64,
}

/// Held-out performance of a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub positive: Party,
    pub predictions: Vec<Party>,
    /// Positive-class probability per test county.
    pub probabilities: Vec<f64>,
    pub confusion: ConfusionMatrix,
    pub accuracy: f64,
    pub kappa: Option<f64>,
    pub roc: Option<Vec<RocPoint>>,
    pub auc: Option<f64>,
    pub pr: Option<Vec<PrPoint>>,
    pub misclassified: Vec<Misclassified>,
}

/// Scores `model` on `test`. ROC, AUC and PR are `None` when the test set
/// lacks one of the classes.
pub fn evaluate(
    model: &RandomForest,
    test: &[Observation],
    features: &[Feature],
    positive: Party,
) -> Result<Evaluation> {
    if test.is_empty() {
        return Err(Error::EmptyDataset("no test counties".into()));
    }
    let x = design_matrix(test, features);
    let actual = labels(test).to_vec();
    let proba = model.predict_proba(x.view());
    let predicted = model.predict(x.view()).to_vec();

    let probabilities: Vec<f64> = proba.column(positive.index()).to_vec();
    let positives: Vec<bool> = actual.iter().map(|&a| a == positive.index()).collect();
    let confusion = ConfusionMatrix::from_labels(&actual, &predicted, model.n_classes());

    let roc = metrics::roc_curve(&probabilities, &positives);
    if roc.is_none() {
        log::warn!(
            target: crate::LOG_TARGET,
            "test set has a single class; ROC and AUC are undefined"
        );
    }
    let auc = roc.as_deref().map(metrics::auc);
    let pr = metrics::pr_curve(&probabilities, &positives);

    let predictions = predicted
        .iter()
        .map(|&p| {
            Party::from_index(p)
                .ok_or_else(|| Error::InvalidConfig(format!("model predicted unknown class {p}")))
        })
        .collect::<Result<Vec<Party>>>()?;
    let misclassified = test
        .iter()
        .zip(&predictions)
        .zip(&probabilities)
        .filter(|((obs, predicted), _)| obs.party != **predicted)
        .map(|((obs, &predicted), &probability)| Misclassified {
            fips: obs.record.fips.clone(),
            name: obs.record.name.clone(),
            state: obs.state.clone(),
            actual: obs.party,
            predicted,
            probability,
        })
        .collect();

    let evaluation = Evaluation {
        positive,
        predictions,
        probabilities,
        accuracy: confusion.accuracy(),
        kappa: confusion.kappa(),
        confusion,
        roc,
        auc,
        pr,
        misclassified,
    };
    log::info!(
        target: crate::LOG_TARGET,
        "test accuracy {:.3}, kappa {:?}, AUC {:?}, {} misclassified",
        evaluation.accuracy,
        evaluation.kappa,
        evaluation.auc,
        evaluation.misclassified.len()
    );
    Ok(evaluation)
}
