crate::define_id!(CourseId, "course");
crate::define_id!(ChapterId, "chapter");
crate::define_id!(ContentId, "content");
crate::define_id!(AttemptId, "attempt");
crate::define_id!(QuestionId, "question");
crate::define_id!(AnswerId, "answer");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_bare_numbers() {
        let json = serde_json::to_string(&AttemptId::new(77)).unwrap();
        assert_eq!(json, "77");

        let id: QuestionId = serde_json::from_str("12").unwrap();
        assert_eq!(id, QuestionId::new(12));
    }

    #[test]
    fn debug_output_names_the_kind() {
        assert_eq!(format!("{:?}", ContentId::new(3)), "content#3");
        assert_eq!(ChapterId::new(3).to_string(), "3");
    }

    #[test]
    fn parse_from_route_segment() {
        assert_eq!(" 42".parse::<ChapterId>(), Ok(ChapterId::new(42)));
        assert!("forty".parse::<ChapterId>().is_err());
    }
}
