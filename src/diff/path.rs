//! Dot-separated paths into JSON trees.

use std::cmp::Ordering;
use std::fmt;

/// One step of a path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    fn parse(raw: &str) -> Self {
        // Only plain decimal digits count as an index ("+1" and "01" stay keys).
        let is_index = !raw.is_empty()
            && raw.bytes().all(|b| b.is_ascii_digit())
            && (raw == "0" || !raw.starts_with('0'));
        match raw.parse::<usize>() {
            Ok(index) if is_index => PathSegment::Index(index),
            _ => PathSegment::Key(raw.to_string()),
        }
    }

    /// The segment as an object key.
    pub fn as_key(&self) -> String {
        match self {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(index) => index.to_string(),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

impl PartialOrd for PathSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathSegment {
    /// Indices compare numerically and sort before keys.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PathSegment::Index(a), PathSegment::Index(b)) => a.cmp(b),
            (PathSegment::Key(a), PathSegment::Key(b)) => a.cmp(b),
            (PathSegment::Index(_), PathSegment::Key(_)) => Ordering::Less,
            (PathSegment::Key(_), PathSegment::Index(_)) => Ordering::Greater,
        }
    }
}

/// A parsed path. The empty path addresses the whole value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<PathSegment>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    /// Parse the dot-separated form.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Path::root();
        }
        Path(raw.split('.').map(PathSegment::parse).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Path of the containing value, `None` at the root.
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    pub fn child_key(&self, key: &str) -> Path {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Path(segments)
    }

    pub fn child_index(&self, index: usize) -> Path {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Path(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(raw: &str) -> Self {
        Path::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_segments() {
        let path = Path::parse("items.2.name");
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("items".into()),
                PathSegment::Index(2),
                PathSegment::Key("name".into()),
            ]
        );
        assert_eq!(path.to_string(), "items.2.name");
    }

    #[test]
    fn test_root_path() {
        let path = Path::parse("");
        assert!(path.is_root());
        assert_eq!(path.to_string(), "");
        assert_eq!(path.parent(), None);
    }

    #[test]
    fn test_leading_zero_stays_key() {
        assert_eq!(Path::parse("01").segments(), &[PathSegment::Key("01".into())]);
        assert_eq!(Path::parse("0").segments(), &[PathSegment::Index(0)]);
    }

    #[test]
    fn test_index_ordering_is_numeric() {
        let mut paths = vec![Path::parse("a.10"), Path::parse("a.2"), Path::parse("a.b")];
        paths.sort();
        let rendered: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["a.2", "a.10", "a.b"]);
    }

    #[test]
    fn test_children_and_parent() {
        let path = Path::root().child_key("list").child_index(3);
        assert_eq!(path.to_string(), "list.3");
        assert_eq!(path.parent().unwrap().to_string(), "list");
        assert_eq!(path.last(), Some(&PathSegment::Index(3)));
    }
}
