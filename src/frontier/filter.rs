use bloomfilter::Bloom;

/// Probabilistic set of URLs seen during one page-task run
///
/// False positives are possible and accepted: a link wrongly reported as seen is
/// simply not crawled this run. A URL that was inserted is always reported as seen.
pub struct FrontierFilter {
    bloom: Bloom<String>,
    inserted: usize,
}

impl FrontierFilter {
    /// Sizes the filter for `capacity` items at the given false-positive rate
    pub fn new(capacity: usize, false_positive_rate: f64) -> Self {
        Self {
            bloom: Bloom::new_for_fp_rate(capacity.max(1), false_positive_rate),
            inserted: 0,
        }
    }

    /// Adds every known URL
    pub fn seed<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for url in urls {
            self.insert(url.into());
        }
    }

    /// Whether the URL has probably been seen
    pub fn check(&self, url: &str) -> bool {
        self.bloom.check(&url.to_string())
    }

    pub fn insert(&mut self, url: String) {
        self.bloom.set(&url);
        self.inserted += 1;
    }

    /// Inserts the URL and reports whether it was new
    ///
    /// Returns `false` when the URL was (probably) already present.
    pub fn check_and_insert(&mut self, url: &str) -> bool {
        let url = url.to_string();
        if self.bloom.check(&url) {
            return false;
        }
        self.bloom.set(&url);
        self.inserted += 1;
        true
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }
}
