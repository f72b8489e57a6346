//! The six-state experiment protocol. Transitions are driven by the SCP
//! list's statistics, the blinded condition order, and explicit operator
//! events; the machine owns the "presentation allowed" flag it signals to
//! the stimulus side.

use super::blinding::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentState {
    AwaitingData,
    AwaitingFirstCriterion,
    FirstInterview,
    AwaitingSecondCriterion,
    SecondInterview,
    Done,
}

impl ExperimentState {
    /// Integer code used in the persisted session record.
    pub fn code(self) -> i64 {
        match self {
            ExperimentState::AwaitingData => 0,
            ExperimentState::AwaitingFirstCriterion => 1,
            ExperimentState::FirstInterview => 2,
            ExperimentState::AwaitingSecondCriterion => 3,
            ExperimentState::SecondInterview => 4,
            ExperimentState::Done => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => ExperimentState::AwaitingData,
            1 => ExperimentState::AwaitingFirstCriterion,
            2 => ExperimentState::FirstInterview,
            3 => ExperimentState::AwaitingSecondCriterion,
            4 => ExperimentState::SecondInterview,
            5 => ExperimentState::Done,
            _ => return None,
        })
    }

    pub fn description(self) -> &'static str {
        match self {
            ExperimentState::AwaitingData => "Waiting for more data.",
            ExperimentState::AwaitingFirstCriterion => {
                "Waiting for appropriate SCP of first condition."
            }
            ExperimentState::FirstInterview => "Interview for first condition.",
            ExperimentState::AwaitingSecondCriterion => {
                "Waiting for appropriate SCP of second condition."
            }
            ExperimentState::SecondInterview => "Interview for second condition.",
            ExperimentState::Done => "Quit experiment.",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CriterionPolicy {
    pub sampling_criterion: usize,
    pub second_interview_delay: usize,
    /// Stricter variant: the deflection must also match the condition's
    /// sign, so a zero-crossing trial never qualifies.
    pub require_sign_match: bool,
}

pub struct ExperimentStateMachine {
    state: ExperimentState,
    policy: CriterionPolicy,
    /// Conditions in interview order, already unblinded via the assignment.
    conditions: [Condition; 2],
    trials_until_first_interview: Option<usize>,
    /// Level signalled to the presentation side. Forced true on interview
    /// entry, reset false on interview exit; toggled by the operator
    /// otherwise.
    allow_presentation: bool,
}

impl ExperimentStateMachine {
    pub fn new(policy: CriterionPolicy, conditions: [Condition; 2]) -> Self {
        ExperimentStateMachine {
            state: ExperimentState::AwaitingData,
            policy,
            conditions,
            trials_until_first_interview: None,
            allow_presentation: false,
        }
    }

    /// Resumes a machine from a persisted state code (crash recovery).
    pub fn resume(
        policy: CriterionPolicy,
        conditions: [Condition; 2],
        state: ExperimentState,
    ) -> Self {
        let mut machine = Self::new(policy, conditions);
        machine.state = state;
        machine
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    pub fn allow_presentation(&self) -> bool {
        self.allow_presentation
    }

    pub fn is_done(&self) -> bool {
        self.state == ExperimentState::Done
    }

    pub fn trials_until_first_interview(&self) -> Option<usize> {
        self.trials_until_first_interview
    }

    /// One evaluation pass, called after every confirmed response and on
    /// every housekeeping tick. Read-only against the SCP list. Returns
    /// true when the state changed.
    pub fn evaluate(&mut self, scp_averages: &[f64], recent_response: bool) -> bool {
        let before = self.state;

        // A resumed session that never saw the first criterion fire counts
        // its cool-down from the list length it finds here.
        if self.state == ExperimentState::AwaitingSecondCriterion
            && self.trials_until_first_interview.is_none()
        {
            self.trials_until_first_interview = Some(scp_averages.len());
        }

        if recent_response {
            match self.state {
                ExperimentState::AwaitingFirstCriterion => {
                    if self.criterion_met(scp_averages, 0) {
                        self.trials_until_first_interview = Some(scp_averages.len());
                        self.state = ExperimentState::FirstInterview;
                        self.allow_presentation = true;
                    }
                }
                ExperimentState::AwaitingSecondCriterion => {
                    if self.cooldown_elapsed(scp_averages) && self.criterion_met(scp_averages, 1) {
                        self.state = ExperimentState::SecondInterview;
                        self.allow_presentation = true;
                    }
                }
                _ => {}
            }
        }

        if self.state == ExperimentState::AwaitingData
            && scp_averages.len() >= self.policy.sampling_criterion
        {
            self.state = ExperimentState::AwaitingFirstCriterion;
        }

        self.state != before
    }

    /// Operator action. Inside an interview it ends the interview (and
    /// withdraws presentation permission); anywhere else it toggles the
    /// permission level. Interview exit deliberately requires this explicit
    /// event so the auto-unlock on entry can never end an interview by
    /// itself.
    pub fn operator_toggle(&mut self) {
        match self.state {
            ExperimentState::FirstInterview => {
                self.state = ExperimentState::AwaitingSecondCriterion;
                self.allow_presentation = false;
            }
            ExperimentState::SecondInterview => {
                self.state = ExperimentState::Done;
                self.allow_presentation = false;
            }
            _ => self.allow_presentation = !self.allow_presentation,
        }
    }

    /// Manual override stepping the protocol forward by one state. `Done`
    /// stays terminal.
    pub fn force_forward(&mut self) {
        self.state = match ExperimentState::from_code(self.state.code() + 1) {
            Some(next) => next,
            None => self.state,
        };
    }

    /// Manual override stepping backward by one state; never leaves `Done`.
    pub fn force_backward(&mut self) {
        if self.state == ExperimentState::Done {
            return;
        }
        self.state = match ExperimentState::from_code(self.state.code() - 1) {
            Some(prev) => prev,
            None => self.state,
        };
    }

    fn cooldown_elapsed(&self, scp_averages: &[f64]) -> bool {
        let floor = self.trials_until_first_interview.unwrap_or(0)
            + self.policy.second_interview_delay;
        scp_averages.len() >= floor
    }

    fn criterion_met(&self, scp_averages: &[f64], interview: usize) -> bool {
        let n = scp_averages.len();
        if n < self.policy.sampling_criterion {
            return false;
        }
        let last = scp_averages[n - 1];
        let med = median(scp_averages);
        let sd = std_dev(scp_averages);

        match self.conditions[interview] {
            Condition::Positive => {
                last > med + sd && (!self.policy.require_sign_match || last > 0.0)
            }
            Condition::Negative => {
                last < med - sd && (!self.policy.require_sign_match || last < 0.0)
            }
        }
    }
}

// STATISTICS ------------------------------------------------------------------

pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}
