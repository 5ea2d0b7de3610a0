//! Tracking which cached files a dataset's rows point at.

use std::collections::BTreeMap;

use regex::Regex;

/// Finds local media links in rendered cells.
///
/// A link looks like `name.png (<prefix>/<localFilename>)`.
#[derive(Debug, Clone)]
pub struct MediaLinkPattern {
    regex: Regex,
}

impl MediaLinkPattern {
    pub fn new(link_prefix: &str) -> Result<Self, regex::Error> {
        let prefix = regex::escape(link_prefix.trim_end_matches('/'));
        let regex = Regex::new(&format!(r"\({}/([A-Za-z0-9._-]+)\)", prefix))?;
        Ok(Self { regex })
    }

    /// Local filenames linked from `text`, in order of appearance.
    pub fn find_all<'t>(&self, text: &'t str) -> impl Iterator<Item = &'t str> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Per-dataset reference counts for cached files.
///
/// Seeded from the existing rows before a delta merge; each replaced or
/// deleted row releases its links and each rebuilt row adds its own.
#[derive(Debug, Clone, Default)]
pub struct MediaRefs {
    counts: BTreeMap<String, usize>,
}

impl MediaRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: impl Into<String>) {
        *self.counts.entry(file.into()).or_insert(0) += 1;
    }

    pub fn release(&mut self, file: &str) {
        if let Some(count) = self.counts.get_mut(file) {
            *count = count.saturating_sub(1);
        }
    }

    /// Add every link found in `cells`.
    pub fn add_links<'a, I>(&mut self, pattern: &MediaLinkPattern, cells: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for cell in cells {
            for file in pattern.find_all(cell) {
                self.add(file);
            }
        }
    }

    /// Release every link found in `cells`.
    pub fn release_links<'a, I>(&mut self, pattern: &MediaLinkPattern, cells: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for cell in cells {
            for file in pattern.find_all(cell) {
                self.release(file);
            }
        }
    }

    pub fn count(&self, file: &str) -> usize {
        self.counts.get(file).copied().unwrap_or(0)
    }

    /// Files still referenced at least once.
    pub fn in_use(&self) -> impl Iterator<Item = &str> {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(file, _)| file.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_finds_local_links_only() {
        let pattern = MediaLinkPattern::new("data/media/").unwrap();
        let cell = "a.png (data/media/att1_a.png), b.pdf (https://dl.example.com/b.pdf), \
                    c.jpg (data/media/att3_c.jpg)";

        let found: Vec<&str> = pattern.find_all(cell).collect();
        assert_eq!(found, vec!["att1_a.png", "att3_c.jpg"]);
    }

    #[test]
    fn test_pattern_escapes_prefix() {
        let pattern = MediaLinkPattern::new("assets/media.v2").unwrap();
        assert_eq!(pattern.find_all("x (assets/media.v2/f.png)").count(), 1);
        assert_eq!(pattern.find_all("x (assets/mediaXv2/f.png)").count(), 0);
    }

    #[test]
    fn test_refcounts_survive_shared_files() {
        let pattern = MediaLinkPattern::new("data/media").unwrap();
        let mut refs = MediaRefs::new();
        refs.add_links(
            &pattern,
            ["s.png (data/media/att1_s.png)", "s.png (data/media/att1_s.png)"],
        );
        assert_eq!(refs.count("att1_s.png"), 2);

        refs.release_links(&pattern, ["s.png (data/media/att1_s.png)"]);
        assert_eq!(refs.in_use().collect::<Vec<_>>(), vec!["att1_s.png"]);

        refs.release("att1_s.png");
        refs.release("att1_s.png");
        assert_eq!(refs.count("att1_s.png"), 0);
        assert_eq!(refs.in_use().count(), 0);
    }
}
