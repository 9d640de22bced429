use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier of a repository: `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(RepoId::new(owner, name))
            }
            _ => Err(format!("expected owner/name, got {s:?}")),
        }
    }
}

/// One repository waiting in the backlog.
///
/// `cursor` is an opaque position hint (a ref, a branch) handed to the
/// analysis step untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(flatten)]
    pub repo: RepoId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl WorkItem {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            repo: RepoId::new(owner, name),
            cursor: None,
        }
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn id(&self) -> &RepoId {
        &self.repo
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.repo.fmt(f)
    }
}

/// Source location of a pattern instance. Lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_line == self.end_line {
            write!(f, "{}:{}", self.path, self.start_line)
        } else {
            write!(f, "{}:{}-{}", self.path, self.start_line, self.end_line)
        }
    }
}

/// A confirmed occurrence of the target pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub repo: RepoId,
    pub location: Location,
    pub snippet: String,
    /// Short name of the detected pattern, used in report titles.
    #[serde(default)]
    pub pattern: String,
}

impl Finding {
    /// Fingerprint of `(repo, location)`. The snippet is deliberately not
    /// part of it: the same lines re-analyzed with different context must
    /// still deduplicate.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.repo, &self.location)
    }
}

/// Lowercase hex SHA-256 over a finding's repository and location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(repo: &RepoId, location: &Location) -> Self {
        let joined = format!(
            "{}\n{}\n{}\n{}",
            repo, location.path, location.start_line, location.end_line
        );
        let digest = Sha256::digest(joined.as_bytes());
        Fingerprint(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(path: &str, start: u32, end: u32) -> Location {
        Location {
            path: path.to_string(),
            start_line: start,
            end_line: end,
        }
    }

    #[test]
    fn repo_id_parses_owner_and_name() {
        let id: RepoId = "kalexmills/github-vet".parse().unwrap();
        assert_eq!(id.owner, "kalexmills");
        assert_eq!(id.name, "github-vet");
        assert_eq!(id.to_string(), "kalexmills/github-vet");
    }

    #[test]
    fn repo_id_rejects_malformed() {
        assert!("no-slash".parse::<RepoId>().is_err());
        assert!("/name".parse::<RepoId>().is_err());
        assert!("owner/".parse::<RepoId>().is_err());
        assert!("a/b/c".parse::<RepoId>().is_err());
    }

    #[test]
    fn work_item_flattens_repo_fields() {
        let item: WorkItem = serde_json::from_str(r#"{"owner":"a","name":"b"}"#).unwrap();
        assert_eq!(item, WorkItem::new("a", "b"));

        let json = serde_json::to_string(&WorkItem::new("a", "b").with_cursor("main")).unwrap();
        assert!(json.contains(r#""owner":"a""#));
        assert!(json.contains(r#""cursor":"main""#));
    }

    #[test]
    fn fingerprint_is_stable_and_ignores_snippet() {
        let a = Finding {
            repo: RepoId::new("a", "b"),
            location: location("main.go", 10, 12),
            snippet: "for _, v := range xs {".into(),
            pattern: "range-loop-capture".into(),
        };
        let mut b = a.clone();
        b.snippet = "something else".into();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);
    }

    #[test]
    fn fingerprint_differs_by_location_and_repo() {
        let repo = RepoId::new("a", "b");
        let f1 = Fingerprint::of(&repo, &location("main.go", 10, 12));
        let f2 = Fingerprint::of(&repo, &location("main.go", 11, 12));
        let f3 = Fingerprint::of(&RepoId::new("a", "c"), &location("main.go", 10, 12));
        assert_ne!(f1, f2);
        assert_ne!(f1, f3);
    }

    #[test]
    fn location_display() {
        assert_eq!(location("x.go", 3, 3).to_string(), "x.go:3");
        assert_eq!(location("x.go", 3, 7).to_string(), "x.go:3-7");
    }
}
