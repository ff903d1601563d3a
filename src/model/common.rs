use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use uuid::Uuid;

pub type Id = String;

/// REST API version prefix
pub const API_VERSION: &str = "1.0";

/// Project used when a request doesn't name one
pub const DEFAULT_PROJECT: &str = "default";

/// Separates an instance name from a snapshot name ("web/snap0")
pub const SNAPSHOT_DELIMITER: &str = "/";

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Whether the name refers to a snapshot rather than a live instance
pub fn is_snapshot(name: &str) -> bool {
    name.contains(SNAPSHOT_DELIMITER)
}

/// Splits "parent/snap" into its parts. Non-snapshot names yield an empty snapshot part.
pub fn parent_and_snapshot_name(name: &str) -> (&str, &str) {
    match name.split_once(SNAPSHOT_DELIMITER) {
        Some((parent, snapshot)) => (parent, snapshot),
        None => (name, ""),
    }
}

/// Canonical API URL of a resource, e.g. `/1.0/instances/web?project=demo`.
///
/// The project query is omitted for the default project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiUrl {
    segments: Vec<String>,
    project: Option<String>,
}

impl ApiUrl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.segments
            .extend(segments.into_iter().map(|s| escape_segment(s.as_ref())));
        self
    }

    pub fn project(mut self, project: &str) -> Self {
        if !project.is_empty() && project != DEFAULT_PROJECT {
            self.project = Some(project.to_string());
        }
        self
    }
}

impl std::fmt::Display for ApiUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))?;
        if let Some(project) = &self.project {
            write!(f, "?project={}", escape_segment(project))?;
        }
        Ok(())
    }
}

/// Everything outside the RFC 3986 unreserved set
const URL_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn escape_segment(segment: &str) -> String {
    utf8_percent_encode(segment, URL_ESCAPE).to_string()
}
