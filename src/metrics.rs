use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionMetrics {
    pub samples: usize,
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
}

/// Positive class is a home win.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationMetrics {
    pub samples: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub brier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HoldoutMetrics {
    Regression(RegressionMetrics),
    Classification(ClassificationMetrics),
}

pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let mean = actual[..n].iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = actual[..n].iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = actual[..n]
        .iter()
        .zip(&predicted[..n])
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn evaluate_regression(actual: &[f64], predicted: &[f64]) -> RegressionMetrics {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return RegressionMetrics {
            samples: 0,
            r2: 0.0,
            mae: 0.0,
            rmse: 0.0,
        };
    }
    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    for (a, p) in actual.iter().zip(predicted) {
        abs_sum += (a - p).abs();
        sq_sum += (a - p).powi(2);
    }
    RegressionMetrics {
        samples: n,
        r2: r2_score(actual, predicted),
        mae: abs_sum / n as f64,
        rmse: (sq_sum / n as f64).sqrt(),
    }
}

/// Home win only strictly above 0.5, so a coin flip counts like a draw.
pub fn predicts_home_win(prob: f64) -> bool {
    prob > 0.5
}

/// `probs` are home-win probabilities, thresholded by [`predicts_home_win`].
pub fn evaluate_classification(actual: &[bool], probs: &[f64]) -> ClassificationMetrics {
    let n = actual.len().min(probs.len());
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    let mut correct = 0usize;
    let mut brier = 0.0;

    for (&a, &p) in actual.iter().zip(probs) {
        let predicted = predicts_home_win(p);
        match (predicted, a) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
        if predicted == a {
            correct += 1;
        }
        let y = if a { 1.0 } else { 0.0 };
        brier += (p - y).powi(2);
    }

    ClassificationMetrics {
        samples: n,
        accuracy: ratio(correct, n),
        precision: ratio(tp, tp + fp),
        recall: ratio(tp, tp + fn_),
        brier: if n == 0 { 0.0 } else { brier / n as f64 },
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}
