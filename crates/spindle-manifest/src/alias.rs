//! Minimal unique aliases for image names.
//!
//! Every image starts with the rightmost `/`-separated part of its name
//! as the candidate alias. A fixed-point loop extends colliding aliases
//! by one leading component at a time, and also extends pairs where one
//! alias appears as a trailing segment run of the other name, until no
//! further mutation occurs. The result is minimal, unique for distinct
//! names, and independent of input order.

use crate::image::Image;
use spindle_oci::split_ref;

const SEPARATOR: char = '/';

/// Outcome of an alias search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasMatch {
    /// Exactly one image matched; carries its full name.
    Unique(String),
    /// Several images matched the trailing segments; carries their full names.
    Ambiguous(Vec<String>),
    NotFound,
}

struct ImageName {
    parts: Vec<String>,
    current: usize,
}

impl ImageName {
    fn new(name: &str) -> Self {
        let parts: Vec<String> = name.split(SEPARATOR).map(str::to_owned).collect();
        let current = parts.len() - 1;
        Self { parts, current }
    }

    fn last(&self) -> usize {
        self.parts.len() - 1
    }

    fn shortest(&self) -> &str {
        &self.parts[self.last()]
    }

    fn longest(&self) -> String {
        self.parts.join("/")
    }

    fn join(&self) -> String {
        self.parts[self.current..].join("/")
    }

    fn extendable(&self) -> bool {
        self.current > 0
    }

    fn extend(&mut self) -> bool {
        if !self.extendable() {
            return false;
        }
        self.current -= 1;
        true
    }
}

/// Derives and looks up aliases over a fixed set of image names.
pub struct AliasCache {
    entries: Vec<ImageName>,
}

impl AliasCache {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            entries: names
                .iter()
                .map(|raw| {
                    let (name, _, _) = split_ref(raw.as_ref());
                    ImageName::new(&name)
                })
                .collect(),
        }
    }

    pub fn from_images(images: &[Image]) -> Self {
        Self {
            entries: images
                .iter()
                .map(|image| ImageName::new(&image.original_name))
                .collect(),
        }
    }

    /// Derive one alias per entry, in entry order.
    pub fn make_aliases_for_names(&mut self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.shortest().to_owned())
            .collect();

        loop {
            let mut mutated = false;
            for n in 0..self.entries.len() {
                for m in 0..self.entries.len() {
                    if m == n || self.entries[m].parts == self.entries[n].parts {
                        continue;
                    }

                    if names[m] == names[n] {
                        if self.entries[m].extend() {
                            names[m] = self.entries[m].join();
                            mutated = true;
                        }
                        if self.entries[n].extend() {
                            names[n] = self.entries[n].join();
                            mutated = true;
                        }
                    }

                    let (a, b) = pair_mut(&mut self.entries, m, n);
                    if extend_if_suffix_matches(a, b) {
                        names[m] = self.entries[m].join();
                        names[n] = self.entries[n].join();
                        mutated = true;
                        continue;
                    }
                }
            }
            if !mutated {
                break;
            }
        }
        names
    }

    /// Match a search term against full names, current aliases, and
    /// trailing `/`-segment subsequences, in that order.
    pub fn lookup(&self, term: &str) -> AliasMatch {
        let mut candidates: Vec<String> = Vec::new();

        for entry in &self.entries {
            if term == entry.join() || term == entry.longest() {
                candidates.push(entry.longest());
            }
        }

        if candidates.is_empty() {
            let parts: Vec<&str> = term.split(SEPARATOR).collect();
            for entry in &self.entries {
                for j in 0..entry.parts.len() {
                    let suffix: Vec<&str> =
                        entry.parts[j..].iter().map(String::as_str).collect();
                    if suffix == parts {
                        candidates.push(entry.longest());
                    }
                }
            }
        }

        match candidates.len() {
            0 => AliasMatch::NotFound,
            1 => AliasMatch::Unique(candidates.remove(0)),
            _ => AliasMatch::Ambiguous(candidates),
        }
    }
}

fn pair_mut(entries: &mut [ImageName], m: usize, n: usize) -> (&mut ImageName, &mut ImageName) {
    if m < n {
        let (left, right) = entries.split_at_mut(n);
        (&mut left[m], &mut right[0])
    } else {
        let (left, right) = entries.split_at_mut(m);
        (&mut right[0], &mut left[n])
    }
}

fn extend_if_suffix_matches(a: &mut ImageName, b: &mut ImageName) -> bool {
    if !a.extendable() {
        return false;
    }
    let mut mutated = false;
    if a.parts[a.current - 1..] == b.parts[b.current..] {
        if a.extend() {
            mutated = true;
        }
        if b.extend() {
            mutated = true;
        }
    }
    let mut i = b.last();
    while i > b.current {
        if a.parts[a.current..] == b.parts[i..] && a.extend() {
            mutated = true;
        }
        i -= 1;
    }
    mutated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shuffled<T>(mut items: Vec<T>, seed: usize) -> Vec<T> {
        // deterministic pseudo-shuffle, enough to vary input order
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        for i in (1..items.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            items.swap(i, state % (i + 1));
        }
        items
    }

    fn check_aliases(case: &[(&str, &str)]) {
        let names: Vec<&str> = case.iter().map(|(image, _)| *image).collect();
        let aliases = AliasCache::from_names(&names).make_aliases_for_names();
        for (i, (image, expected)) in case.iter().enumerate() {
            assert_eq!(
                &aliases[i], expected,
                "alias for {image} in case {case:?}"
            );
        }
    }

    #[test]
    fn make_aliases_for_names() {
        let cases: Vec<Vec<(&str, &str)>> = vec![
            vec![
                ("example.com/a1/bar/foo", "bar/foo"),
                ("example.com/a1/bar/foo1", "foo1"),
                ("example.io/b1/baz/foo", "baz/foo"),
                ("example.io/b1/baz/foo", "baz/foo"),
                ("example.com/f1/foo", "f1/foo"),
                ("example.io/f2/foo", "f2/foo"),
                ("foo", "foo"),
                ("example.io/b2/barfoo", "example.io/b2/barfoo"),
                ("example.sh/b2/barfoo", "example.sh/b2/barfoo"),
                ("example.io/b1/barfoo", "b1/barfoo"),
            ],
            vec![
                ("example.io/b1/barfoo", "b1/barfoo"),
                ("example.io/b1/x/barfoo", "x/barfoo"),
                ("example.io/b1/baz/foo", "baz/foo"),
                ("example.io/b1/foo/baz", "baz"),
                ("example.io/b1/foo", "b1/foo"),
            ],
            vec![("foo", "foo"), ("bar", "bar")],
            vec![("example.io/foo", "foo"), ("example.io/bar", "bar")],
            vec![
                ("example.io/foo", "example.io/foo"),
                ("example.io/foo", "example.io/foo"),
                ("example.org/foo", "example.org/foo"),
            ],
            vec![
                ("example.io/bar/foo", "bar/foo"),
                ("example.io/foo", "example.io/foo"),
            ],
            vec![
                ("example.io/bar/foo", "bar/foo"),
                ("example.io/baz/foo", "baz/foo"),
            ],
            vec![
                ("example.com/a1/bar/foo", "bar/foo"),
                ("example.io/b1/baz/foo", "baz/foo"),
            ],
            vec![
                ("example.com/a1/bar/foo", "bar/foo"),
                ("example.com/b1/baz/foo", "baz/foo"),
            ],
            vec![
                ("example.com/a1/bar/foo", "foo"),
                ("example.io/b1/baz/bar", "bar"),
            ],
        ];

        // case order must not matter
        for seed in 0..4 {
            for case in shuffled(cases.clone(), seed) {
                check_aliases(&case);
            }
        }
    }

    #[test]
    fn aliases_are_nonempty_and_distinct() {
        let names = vec![
            "ghcr.io/projectcontour/contour",
            "docker.io/envoyproxy/envoy",
            "ghcr.io/fluxcd/kustomize-controller",
            "ghcr.io/fluxcd/source-controller",
        ];
        let aliases = AliasCache::from_names(&names).make_aliases_for_names();
        assert_eq!(aliases.len(), names.len());
        for alias in &aliases {
            assert!(!alias.is_empty());
        }
        let mut deduped = aliases.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), aliases.len(), "aliases must be distinct");
        assert_eq!(
            aliases,
            vec!["contour", "envoy", "kustomize-controller", "source-controller"]
        );
    }

    #[test]
    fn lookup_round_trips_every_alias() {
        let names = vec![
            "example.com/a1/bar/foo",
            "example.io/b1/baz/foo",
            "example.io/b1/foo/baz",
        ];
        let mut cache = AliasCache::from_names(&names);
        let aliases = cache.make_aliases_for_names();
        for (name, alias) in names.iter().zip(&aliases) {
            match cache.lookup(alias) {
                AliasMatch::Unique(full) => assert_eq!(&full, name),
                other => panic!("alias {alias} resolved to {other:?}"),
            }
        }
    }

    #[test]
    fn lookup_ambiguous_and_not_found() {
        let names = vec!["example.com/a1/bar/foo", "example.io/b1/baz/foo"];
        let cache = AliasCache::from_names(&names);

        match cache.lookup("foo") {
            AliasMatch::Ambiguous(candidates) => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("shared trailing segment should be ambiguous, got {other:?}"),
        }
        assert_eq!(cache.lookup("does-not-exist"), AliasMatch::NotFound);
    }

    #[test]
    fn lookup_by_full_name() {
        let names = vec!["example.com/a1/bar/foo", "example.io/b1/baz/foo"];
        let cache = AliasCache::from_names(&names);
        match cache.lookup("example.com/a1/bar/foo") {
            AliasMatch::Unique(full) => assert_eq!(full, "example.com/a1/bar/foo"),
            other => panic!("full name should match uniquely, got {other:?}"),
        }
    }
}
