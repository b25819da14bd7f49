use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User-supplied metadata attached to a package name.
///
/// Independent of the package's installation state: annotations for a removed
/// package stay until they are explicitly deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageUserData {
    pub package_name: String,
    #[serde(default)]
    pub notes: String,
    /// Free-form tags. Order is not significant.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub marked_keep: bool,
    #[serde(default)]
    pub marked_review: bool,
    #[serde(default, with = "optional_timestamp")]
    pub last_viewed: Option<DateTime<Utc>>,
}

impl PackageUserData {
    /// An empty annotation for `name`, as returned for unannotated packages.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            package_name: name.into(),
            ..Self::default()
        }
    }

    /// True when the record carries nothing worth persisting.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
            && self.tags.is_empty()
            && !self.marked_keep
            && !self.marked_review
            && self.last_viewed.is_none()
    }

    /// Drop empty and repeated tags, keeping first occurrence order.
    pub fn normalize_tags(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.tags = std::mem::take(&mut self.tags)
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();
    }
}

/// Export files written by older versions use `""` for "never viewed".
mod optional_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw
            .filter(|s| !s.is_empty())
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}
