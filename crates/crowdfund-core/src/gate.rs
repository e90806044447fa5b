use crate::error::CrowdfundError;
use crate::types::{Allocation, Amount, ClaimCondition};
use chrono::{DateTime, Utc};

/// Pure claim-gating predicate evaluated lazily at every claim/settle call.
///
/// There is no scheduler in the core: a false gate is reported as
/// `GateNotSatisfied` and the caller re-invokes after the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimGate {
    /// Simple variant: claimable once the deadline has passed.
    AfterDeadline { deadline: DateTime<Utc> },
    /// Threshold variant: deadline passed AND aggregate pledged >= goal.
    DeadlineAndGoal {
        deadline: DateTime<Utc>,
        goal: Amount,
    },
}

impl ClaimGate {
    /// Build the gate for a captured claim condition. A goal, when present,
    /// is enforced here rather than delegated to allocation matching.
    pub fn for_condition(condition: &ClaimCondition) -> Self {
        match &condition.goal {
            Some(goal) => Self::DeadlineAndGoal {
                deadline: condition.deadline,
                goal: goal.clone(),
            },
            None => Self::AfterDeadline {
                deadline: condition.deadline,
            },
        }
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        match self {
            Self::AfterDeadline { deadline } | Self::DeadlineAndGoal { deadline, .. } => *deadline,
        }
    }

    /// Evaluate the gate against the current time and the aggregate raised
    /// so far. The goal form reads the raised value of the goal's brand.
    pub fn evaluate(
        &self,
        now: DateTime<Utc>,
        raised: &Allocation,
    ) -> Result<(), CrowdfundError> {
        match self {
            Self::AfterDeadline { deadline } => check_deadline(now, *deadline),
            Self::DeadlineAndGoal { deadline, goal } => {
                check_deadline(now, *deadline)?;
                let raised_value = raised.of(&goal.brand);
                if raised_value < goal.value {
                    return Err(CrowdfundError::GateNotSatisfied(format!(
                        "raised {} {} of {} goal",
                        raised_value, goal.brand, goal
                    )));
                }
                Ok(())
            }
        }
    }
}

fn check_deadline(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Result<(), CrowdfundError> {
    if now < deadline {
        return Err(CrowdfundError::GateNotSatisfied(format!(
            "deadline {} not reached at {}",
            deadline, now
        )));
    }
    Ok(())
}
