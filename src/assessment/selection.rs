use crate::model::{AnswerId, QuestionKind};

/// The selection after picking `answer`: single-choice replaces, multiple-choice toggles.
pub fn apply(kind: QuestionKind, current: &[AnswerId], answer: AnswerId) -> Vec<AnswerId> {
    match kind {
        QuestionKind::Single => vec![answer],
        QuestionKind::Multiple if current.contains(&answer) => current
            .iter()
            .copied()
            .filter(|selected| *selected != answer)
            .collect(),
        QuestionKind::Multiple => {
            let mut next = current.to_vec();
            next.push(answer);
            next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<AnswerId> {
        raw.iter().copied().map(AnswerId::new).collect()
    }

    #[test]
    fn single_choice_keeps_one_answer() {
        let next = apply(QuestionKind::Single, &ids(&[10]), AnswerId::new(11));
        assert_eq!(next, ids(&[11]));

        let again = apply(QuestionKind::Single, &next, AnswerId::new(11));
        assert_eq!(again, ids(&[11]));
    }

    #[test]
    fn multiple_choice_toggles_in_pick_order() {
        let next = apply(QuestionKind::Multiple, &[], AnswerId::new(12));
        let next = apply(QuestionKind::Multiple, &next, AnswerId::new(10));
        assert_eq!(next, ids(&[12, 10]));

        let next = apply(QuestionKind::Multiple, &next, AnswerId::new(12));
        assert_eq!(next, ids(&[10]));
    }
}
