use sledo::backend::EvaluationRequest;
use sledo::space::SearchSpace;
use sledo::{Campaign, TrialStatus};

/// `x` in `[0, 10]`.
pub(crate) fn line() -> SearchSpace {
    SearchSpace::builder().float("x", 0.0, 10.0).build().unwrap()
}

pub(crate) fn x(request: &EvaluationRequest) -> f64 {
    request.parameters["x"].as_f64().unwrap()
}

/// `(x - 3)^2`, minimum `0` at `x = 3`.
pub(crate) fn shifted(request: &EvaluationRequest) -> f64 {
    (x(request) - 3.0).powi(2)
}

/// Asserts trial ids are `0..n` in creation order.
pub(crate) fn assert_dense_ids(campaign: &Campaign) {
    for (index, trial) in campaign.trials().iter().enumerate() {
        assert_eq!(trial.id, index as u64);
    }
}

pub(crate) fn statuses(campaign: &Campaign) -> Vec<TrialStatus> {
    campaign.trials().iter().map(|t| t.status).collect()
}
