//! Pure aggregation over submitted feedback. Safe to call repeatedly,
//! including opportunistically on reads; never mutates stored feedback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    CommitteeMember, CommitteePolicy, Feedback, MemberStatus, Recommendation, VotingMechanism,
};

/// Tally over the three possible verdicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationTally {
    pub recommend: usize,
    pub pending: usize,
    pub not_recommend: usize,
}

impl RecommendationTally {
    fn record(&mut self, recommendation: Recommendation) {
        match recommendation {
            Recommendation::Recommend => self.recommend += 1,
            Recommendation::Pending => self.pending += 1,
            Recommendation::NotRecommend => self.not_recommend += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.recommend + self.pending + self.not_recommend
    }
}

/// Cached aggregate derived from members' feedback. Advisory, never the
/// sole source of truth; always re-derivable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAggregate {
    /// Mean overall score rounded to 1 decimal; absent with zero submissions.
    pub average_score: Option<f64>,
    pub recommendation_counts: RecommendationTally,
    pub final_recommendation: Recommendation,
    pub computed_at: DateTime<Utc>,
}

fn submitted_feedback<'a>(
    members: &'a [CommitteeMember],
) -> impl Iterator<Item = &'a Feedback> + 'a {
    members
        .iter()
        .filter(|member| member.status == MemberStatus::Submitted)
        .filter_map(|member| member.feedback.as_ref())
}

/// Derive the aggregate for an instance from its roster.
pub fn compute_aggregate(
    policy: &CommitteePolicy,
    members: &[CommitteeMember],
    now: DateTime<Utc>,
) -> FeedbackAggregate {
    let mut counts = RecommendationTally::default();
    let mut score_sum: u32 = 0;
    let mut score_count: u32 = 0;

    for feedback in submitted_feedback(members) {
        counts.record(feedback.recommendation);
        score_sum += u32::from(feedback.overall_score);
        score_count += 1;
    }

    let average_score = if score_count == 0 {
        None
    } else {
        let mean = f64::from(score_sum) / f64::from(score_count);
        Some((mean * 10.0).round() / 10.0)
    };

    let final_recommendation = match policy.voting_mechanism {
        VotingMechanism::Average => decide_by_average(policy, average_score),
        VotingMechanism::Majority => decide_by_majority(&counts),
        VotingMechanism::Consensus => decide_by_consensus(&counts),
    };

    FeedbackAggregate {
        average_score,
        recommendation_counts: counts,
        final_recommendation,
        computed_at: now,
    }
}

fn decide_by_average(policy: &CommitteePolicy, average_score: Option<f64>) -> Recommendation {
    match average_score {
        Some(mean) if mean >= policy.recommend_threshold => Recommendation::Recommend,
        Some(mean) if mean <= policy.reject_threshold => Recommendation::NotRecommend,
        _ => Recommendation::Pending,
    }
}

/// Most-voted verdict wins; a tie at the top resolves to pending, never an
/// arbitrary pick.
fn decide_by_majority(counts: &RecommendationTally) -> Recommendation {
    if counts.total() == 0 {
        return Recommendation::Pending;
    }

    let top = counts
        .recommend
        .max(counts.pending)
        .max(counts.not_recommend);
    let mut leaders = Vec::with_capacity(3);
    if counts.recommend == top {
        leaders.push(Recommendation::Recommend);
    }
    if counts.pending == top {
        leaders.push(Recommendation::Pending);
    }
    if counts.not_recommend == top {
        leaders.push(Recommendation::NotRecommend);
    }

    match leaders.as_slice() {
        [single] => *single,
        _ => Recommendation::Pending,
    }
}

fn decide_by_consensus(counts: &RecommendationTally) -> Recommendation {
    let total = counts.total();
    if total > 0 && counts.recommend == total {
        Recommendation::Recommend
    } else if total > 0 && counts.not_recommend == total {
        Recommendation::NotRecommend
    } else {
        Recommendation::Pending
    }
}

/// Completion test over the roster.
pub fn is_complete(policy: &CommitteePolicy, members: &[CommitteeMember]) -> bool {
    let submitted = members
        .iter()
        .filter(|member| member.status == MemberStatus::Submitted)
        .count();

    submitted >= policy.min_feedback_required as usize
        && (!policy.require_all_feedback || submitted == members.len())
}
