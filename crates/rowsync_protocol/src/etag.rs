//! Version tags.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! etag_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a tag value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the tag as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the tag, returning the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

etag_type!(
    /// Table-wide version tag. Totally ordered by string comparison and
    /// strictly increasing over a table's lifetime.
    DataETag
);

etag_type!(
    /// Per-row version tag. Only uniqueness is meaningful.
    RowETag
);

etag_type!(
    /// Version tag of a table's column definitions.
    SchemaETag
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_etags_order_as_strings() {
        let a = DataETag::new("2024-01-01T00:00:00.000000001Z");
        let b = DataETag::new("2024-01-01T00:00:00.000000002Z");
        assert!(a < b);
    }

    #[test]
    fn etags_serialize_transparently() {
        let tag = RowETag::new("abc");
        assert_eq!(serde_json::to_string(&tag).unwrap(), "\"abc\"");
        let back: RowETag = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, tag);
    }
}
