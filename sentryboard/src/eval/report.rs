// src/eval/report.rs
//
// ROC approximation and markdown/JSON report output for the eval harness.

use super::EvalResult;

/// AUC approximated from the single operating point at `threshold`, the
/// same simplification the teacher's `report.rs` uses when per-event score
/// history isn't retained.
pub fn auc_roc_approx(result: &EvalResult) -> f64 {
    let tpr = result.global.recall();
    let fpr = result.global.fpr();
    (1.0 + tpr - fpr) / 2.0
}

pub fn print_markdown(result: &EvalResult) {
    let auc = auc_roc_approx(result);
    println!("# Bot Detection Evaluation Report");
    println!();
    println!(
        "**Requests**: {}  **Positive**: {}  **Negative**: {}  **Threshold**: {:.3}",
        result.n_requests, result.n_positive, result.n_negative, result.threshold
    );
    println!();
    println!("| Metric    | Value  |");
    println!("|-----------|--------|");
    println!("| Precision | {:.4}  |", result.global.precision());
    println!("| Recall    | {:.4}  |", result.global.recall());
    println!("| F1        | {:.4}  |", result.global.f1());
    println!("| FPR       | {:.4}  |", result.global.fpr());
    println!("| AUC-ROC   | {:.4}  |", auc);
    println!();
    result.print_report();
}

pub fn to_json(result: &EvalResult) -> String {
    serde_json::json!({
        "n_requests": result.n_requests,
        "n_positive": result.n_positive,
        "n_negative": result.n_negative,
        "threshold": result.threshold,
        "precision": result.global.precision(),
        "recall": result.global.recall(),
        "f1": result.global.f1(),
        "fpr": result.global.fpr(),
        "auc_roc": auc_roc_approx(result),
        "risk_band_counts": result.risk_band_counts,
    })
    .to_string()
}
