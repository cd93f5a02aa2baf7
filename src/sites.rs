//! Grouping of manifest entries into per-domain sites
//!
//! Entries are sorted by url path and split on the domain prefix, so the
//! same manifest always yields the same groups in the same order no matter
//! how its keys were written.

use crate::manifest::{domain_of, Manifest, ManifestEntry};

/// A domain and every manifest entry served under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainGroup<'a> {
    pub domain: &'a str,
    pub entries: Vec<&'a ManifestEntry>,
}

/// Partition entries by domain, groups and members sorted ascending
pub fn group<'a, I>(entries: I) -> Vec<DomainGroup<'a>>
where
    I: IntoIterator<Item = &'a ManifestEntry>,
{
    let mut sorted: Vec<&ManifestEntry> = entries.into_iter().collect();
    // Sorting on the bare url would interleave "a.com.au" between "a.com"
    // and "a.com/x", so the domain is the primary key.
    sorted.sort_by(|a, b| (domain_of(&a.url), &a.url).cmp(&(domain_of(&b.url), &b.url)));

    let mut groups: Vec<DomainGroup<'a>> = Vec::new();
    for entry in sorted {
        let domain = domain_of(&entry.url);
        match groups.last_mut() {
            Some(last) if last.domain == domain => last.entries.push(entry),
            _ => groups.push(DomainGroup {
                domain,
                entries: vec![entry],
            }),
        }
    }

    groups
}

/// Group every entry of a manifest
pub fn group_manifest(manifest: &Manifest) -> Vec<DomainGroup<'_>> {
    group(manifest.entries())
}

/// Sorted, distinct domains of a manifest
pub fn domains(manifest: &Manifest) -> Vec<&str> {
    group_manifest(manifest)
        .into_iter()
        .map(|g| g.domain)
        .collect()
}
