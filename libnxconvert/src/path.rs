//! Template paths and their translation to NXDL concept paths.
//!
//! A template path such as `/ENTRY[entry]/USER[user1]/name` is parsed once into
//! a list of [`Segment`]s. The class marker `USER[user1]` names the concept `USER`
//! and the instance `user1`; only the concept takes part in schema lookups, which
//! is what [`TemplatePath::concept`] (`to_nxdl_path`) computes.
use std::fmt;
use std::str::FromStr;

use super::error::PathError;

pub const WILDCARD: char = '*';
pub const UNITS_ATTRIBUTE: &str = "units";

/// One element of a template path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    /// A plain name fixed by the schema, e.g. `definition`
    Named(String),
    /// A variadic concept with a user chosen instance name, e.g. `USER[user1]`
    Class { concept: String, instance: String },
    /// A trailing attribute, e.g. `@units`
    Attribute(String),
}

impl Segment {
    fn parse(raw: &str, full: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::EmptySegment(full.to_string()));
        }
        if let Some(name) = raw.strip_prefix('@') {
            if name.is_empty() {
                return Err(PathError::EmptySegment(full.to_string()));
            }
            return Ok(Self::Attribute(name.to_string()));
        }
        match raw.find('[') {
            Some(open) => {
                let concept = &raw[..open];
                let instance = raw[open + 1..]
                    .strip_suffix(']')
                    .ok_or_else(|| PathError::MalformedClassMarker(full.to_string()))?;
                if concept.is_empty() || instance.is_empty() || instance.contains(['[', ']']) {
                    return Err(PathError::MalformedClassMarker(full.to_string()));
                }
                Ok(Self::Class {
                    concept: concept.to_string(),
                    instance: instance.to_string(),
                })
            }
            None if raw.contains(']') => Err(PathError::MalformedClassMarker(full.to_string())),
            None => Ok(Self::Named(raw.to_string())),
        }
    }

    /// The name this segment contributes to a concept path
    pub fn concept_name(&self) -> String {
        match self {
            Self::Named(name) => name.clone(),
            Self::Class { concept, .. } => concept.clone(),
            Self::Attribute(name) => format!("@{name}"),
        }
    }

    /// The name of the HDF5 object (or attribute) this segment materializes as
    pub fn hdf5_name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Class { instance, .. } => instance,
            Self::Attribute(name) => name,
        }
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self, Self::Attribute(_))
    }

    fn has_wildcard(&self) -> bool {
        match self {
            Self::Named(name) => name.contains(WILDCARD),
            Self::Class { instance, .. } => instance.contains(WILDCARD),
            Self::Attribute(_) => false,
        }
    }

    /// Segment-wise compatibility. Wildcards in instance names match by glob.
    fn matches(&self, other: &Segment) -> bool {
        match (self, other) {
            (Self::Named(a), Self::Named(b)) => a == b,
            (Self::Attribute(a), Self::Attribute(b)) => a == b,
            (
                Self::Class {
                    concept: a,
                    instance: ia,
                },
                Self::Class {
                    concept: b,
                    instance: ib,
                },
            ) => a == b && (glob_match(ia, ib) || glob_match(ib, ia)),
            _ => false,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Class { concept, instance } => write!(f, "{concept}[{instance}]"),
            Self::Attribute(name) => write!(f, "@{name}"),
        }
    }
}

/// An absolute, parsed template path
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemplatePath {
    segments: Vec<Segment>,
}

impl TemplatePath {
    /// The path of the file root, which has no segments
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// A new path with `segment` appended
    pub fn join(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// The first `len` segments of this path
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    pub fn starts_with(&self, other: &TemplatePath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    pub fn is_attribute(&self) -> bool {
        self.last().is_some_and(Segment::is_attribute)
    }

    /// True for `.../@units`
    pub fn is_units(&self) -> bool {
        matches!(self.last(), Some(Segment::Attribute(name)) if name == UNITS_ATTRIBUTE)
    }

    /// The `@units` companion of this (field) path
    pub fn units(&self) -> Self {
        self.join(Segment::Attribute(UNITS_ATTRIBUTE.to_string()))
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(Segment::has_wildcard)
    }

    /// `to_nxdl_path`: drop instance names, keep the concept of every segment
    pub fn concept(&self) -> ConceptPath {
        ConceptPath(self.segments.iter().map(Segment::concept_name).collect())
    }

    /// True when both paths address the same concepts and every instance name is
    /// compatible (a wildcard instance matches any instance it globs).
    pub fn matches(&self, other: &TemplatePath) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a.matches(b))
    }

    /// The HDF5 object path, e.g. `/entry/user1/name`. Attribute segments are skipped.
    pub fn hdf5_path(&self) -> String {
        let names: Vec<&str> = self
            .segments
            .iter()
            .filter(|s| !s.is_attribute())
            .map(Segment::hdf5_name)
            .collect();
        format!("/{}", names.join("/"))
    }

    /// Replace successive `*` markers by `indices`. Excess indices are ignored.
    pub fn substitute(&self, indices: &[usize]) -> Result<Self, PathError> {
        let needed: usize = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Named(name) => name.matches(WILDCARD).count(),
                Segment::Class { instance, .. } => instance.matches(WILDCARD).count(),
                Segment::Attribute(_) => 0,
            })
            .sum();
        if needed > indices.len() {
            return Err(PathError::NotEnoughIndices {
                path: self.to_string(),
                needed,
                given: indices.len(),
            });
        }

        let mut remaining = indices.iter();
        let mut fill = |text: &str| -> String {
            let mut out = String::with_capacity(text.len());
            for c in text.chars() {
                if c != WILDCARD {
                    out.push(c);
                } else if let Some(index) = remaining.next() {
                    out.push_str(&index.to_string());
                }
            }
            out
        };
        let segments = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Named(name) => Segment::Named(fill(name)),
                Segment::Class { concept, instance } => Segment::Class {
                    concept: concept.clone(),
                    instance: fill(instance),
                },
                Segment::Attribute(name) => Segment::Attribute(name.clone()),
            })
            .collect();
        Ok(Self { segments })
    }
}

impl FromStr for TemplatePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "/" {
            return Err(PathError::Empty);
        }
        let body = s
            .strip_prefix('/')
            .ok_or_else(|| PathError::NotAbsolute(s.to_string()))?;
        let segments = body
            .split('/')
            .map(|raw| Segment::parse(raw, s))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(position) = segments.iter().position(Segment::is_attribute) {
            if position + 1 != segments.len() {
                return Err(PathError::AttributeNotLast(s.to_string()));
            }
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for TemplatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in self.segments.iter() {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// A path of concept names identifying a node of the schema tree, e.g. `/ENTRY/USER/name`
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConceptPath(Vec<String>);

impl ConceptPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn join(&self, name: &str) -> Self {
        let mut names = self.0.clone();
        names.push(name.to_string());
        Self(names)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn starts_with(&self, other: &ConceptPath) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl FromStr for ConceptPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix('/')
            .ok_or_else(|| PathError::NotAbsolute(s.to_string()))?;
        if body.is_empty() {
            return Ok(Self::root());
        }
        Ok(Self(body.split('/').map(str::to_string).collect()))
    }
}

impl fmt::Display for ConceptPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// `to_nxdl_path`
pub fn to_nxdl_path(path: &TemplatePath) -> ConceptPath {
    path.concept()
}

/// `variations`: every candidate path that realizes `concept`
pub fn variations<'a, I>(concept: &ConceptPath, candidates: I) -> Vec<TemplatePath>
where
    I: IntoIterator<Item = &'a TemplatePath>,
{
    candidates
        .into_iter()
        .filter(|path| path.concept() == *concept)
        .cloned()
        .collect()
}

/// `substitute`
pub fn substitute(path: &TemplatePath, indices: &[usize]) -> Result<TemplatePath, PathError> {
    path.substitute(indices)
}

/// Glob match where `*` in `pattern` matches any (possibly empty) run of characters
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == WILDCARD {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == WILDCARD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> TemplatePath {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let p = path("/ENTRY[entry]/USER[user1]/name/@units");
        assert_eq!(p.len(), 4);
        assert_eq!(
            p.segments()[1],
            Segment::Class {
                concept: String::from("USER"),
                instance: String::from("user1")
            }
        );
        assert!(p.is_units());
        assert_eq!(p.to_string(), "/ENTRY[entry]/USER[user1]/name/@units");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<TemplatePath>(), Err(PathError::Empty));
        assert!(matches!(
            "ENTRY[entry]".parse::<TemplatePath>(),
            Err(PathError::NotAbsolute(_))
        ));
        assert!(matches!(
            "/ENTRY[entry]//name".parse::<TemplatePath>(),
            Err(PathError::EmptySegment(_))
        ));
        assert!(matches!(
            "/ENTRY[entry/name".parse::<TemplatePath>(),
            Err(PathError::MalformedClassMarker(_))
        ));
        assert!(matches!(
            "/ENTRY[entry]/@units/name".parse::<TemplatePath>(),
            Err(PathError::AttributeNotLast(_))
        ));
    }

    #[test]
    fn test_to_nxdl_path() {
        let p = path("/ENTRY[entry]/USER[user1]/name");
        assert_eq!(to_nxdl_path(&p).to_string(), "/ENTRY/USER/name");
        let attr = path("/ENTRY[my_entry]/definition/@version");
        assert_eq!(attr.concept().to_string(), "/ENTRY/definition/@version");
    }

    #[test]
    fn test_hdf5_path() {
        let p = path("/ENTRY[entry]/USER[user1]/name/@units");
        assert_eq!(p.hdf5_path(), "/entry/user1/name");
    }

    #[test]
    fn test_substitute() {
        let p = path("/ENTRY[entry]/USER[user*]/ION[ion*]/name");
        let concrete = substitute(&p, &[2, 7, 99]).unwrap();
        assert_eq!(
            concrete.to_string(),
            "/ENTRY[entry]/USER[user2]/ION[ion7]/name"
        );
        assert_eq!(
            substitute(&p, &[1]),
            Err(PathError::NotEnoughIndices {
                path: p.to_string(),
                needed: 2,
                given: 1
            })
        );
    }

    #[test]
    fn test_substitute_round_trips_concept() {
        let variadic = path("/ENTRY[entry]/USER[user*]/name");
        for idx in [0, 1, 42] {
            let concrete = substitute(&variadic, &[idx]).unwrap();
            assert_eq!(to_nxdl_path(&concrete), variadic.concept());
        }
    }

    #[test]
    fn test_variations() {
        let candidates = vec![
            path("/ENTRY[entry]/USER[user1]/name"),
            path("/ENTRY[entry]/USER[user2]/name"),
            path("/ENTRY[entry]/USER[user2]/email"),
            path("/ENTRY[entry]/definition"),
        ];
        let concept: ConceptPath = "/ENTRY/USER/name".parse().unwrap();
        let found = variations(&concept, &candidates);
        assert_eq!(found, candidates[..2].to_vec());
    }

    #[test]
    fn test_matches_is_case_sensitive() {
        let a = path("/ENTRY[entry]/USER[user*]/name");
        assert!(a.matches(&path("/ENTRY[entry]/USER[user3]/name")));
        assert!(!a.matches(&path("/ENTRY[other]/USER[user3]/name")));
        assert!(!a.matches(&path("/ENTRY[entry]/user[user3]/name")));
        assert!(!a.matches(&path("/ENTRY[entry]/USER[user3]/Name")));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("user*", "user12"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("user*", "sample"));
        assert!(!glob_match("user", "user1"));
    }
}
