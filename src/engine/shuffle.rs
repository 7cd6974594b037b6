use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::Question;

pub(super) fn pick_questions<R: Rng + ?Sized>(
    mut candidates: Vec<Question>,
    count: usize,
    rng: &mut R,
) -> Vec<Question> {
    candidates.shuffle(rng);
    candidates.truncate(count);
    candidates
}

pub(super) fn shuffle_options<R: Rng + ?Sized>(question: &mut Question, rng: &mut R) {
    if !question.shuffle_options || question.options.len() < 2 {
        return;
    }
    let mut order: Vec<usize> = (0..question.options.len()).collect();
    order.shuffle(rng);

    question.options = permute(&question.options, &order);
    if question.kind.is_matching() {
        if question.answers.len() == order.len() {
            question.answers = permute(&question.answers, &order);
        }
        if question.option_values.len() == order.len() {
            question.option_values = permute(&question.option_values, &order);
        }
    }
}

fn permute<T: Clone>(items: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&index| items[index].clone()).collect()
}
