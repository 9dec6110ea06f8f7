/// Defines a numeric identifier issued by the server.
///
/// # Syntax
/// ```text
/// define_id!(Name, "label");
/// ```
/// The label is only used for `Debug` output, the wire format is the bare number.
///
/// # Example
///
/// ```rust
/// use coursetrack::define_id;
///
/// define_id!(LessonId, "lesson");
///
/// let id = LessonId::new(7);
/// assert_eq!(id.to_string(), "7");
/// assert_eq!(format!("{id:?}"), "lesson#7");
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $label:literal) => {
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn value(self) -> u64 {
                self.0
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = ::std::num::ParseIntError;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                input.trim().parse().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}
