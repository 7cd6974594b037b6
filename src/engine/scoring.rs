use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Answer, Question, QuestionKind, ScoreTier, TierCounts};

pub(super) fn is_correct(question: &Question, answer: &Answer) -> bool {
    if answer.kind != question.kind {
        return false;
    }
    match question.kind {
        QuestionKind::Single => matches!(
            (answer.values.as_slice(), question.answers.as_slice()),
            ([given], [expected]) if given == expected
        ),
        QuestionKind::Multiple => {
            answer.values.len() == question.answers.len()
                && as_set(&answer.values) == as_set(&question.answers)
        }
        QuestionKind::FreeText => match answer.values.as_slice() {
            [given] => question.answers.iter().any(|accepted| accepted == given),
            _ => false,
        },
        QuestionKind::Paired | QuestionKind::MultiValued => answer.values == question.answers,
    }
}

fn as_set(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

pub(super) fn fold_tiers(
    scores: &BTreeMap<String, ScoreTier>,
    results: &mut BTreeMap<String, i64>,
    tallies: &mut BTreeMap<String, TierCounts>,
) {
    for (name, tier) in scores {
        *results.entry(name.clone()).or_insert(0) += tier.points();
        tallies.entry(name.clone()).or_default().record(*tier);
    }
}

pub(super) fn stop_penalty(total: usize, ordinal: usize) -> i64 {
    (total + 1).saturating_sub(ordinal) as i64
}
