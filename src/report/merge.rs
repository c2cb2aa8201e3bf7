//! Additive merge of provider contributions
//!
//! Every mapping is a sum over providers, so the order providers finish in
//! never changes the final report.

use super::{tally_add, PartialReport, Report, Tally};

impl Report {
    /// Fold one provider's normalized contribution into the report
    pub fn merge(&mut self, partial: PartialReport) {
        accumulate(&mut self.by_requests, partial.by_requests);
        accumulate(&mut self.by_bytes, partial.by_bytes);
        accumulate(&mut self.by_country, partial.by_country);
        if let (Some(target), Some(source)) =
            (self.by_requests_unique.as_mut(), partial.by_requests_unique)
        {
            accumulate(target, source);
        }
    }
}

/// Merge a set of contributions into a fresh report
pub fn merge_all<I>(timespan: &str, count_unique: bool, partials: I) -> Report
where
    I: IntoIterator<Item = PartialReport>,
{
    let mut report = Report::new(timespan, count_unique);
    for partial in partials {
        report.merge(partial);
    }
    report
}

fn accumulate(target: &mut Tally, source: Tally) {
    for (key, value) in source {
        tally_add(target, key, value);
    }
}
