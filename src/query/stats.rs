//! Per-query statistics.
//!
//! A `QueryStats` record is threaded through every query; nothing in the
//! engine keeps process-wide counters. Aggregation over a workload is
//! explicit addition of the records.

use std::time::Duration;

use serde::Serialize;

fn duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1e3)
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct QueryStats {
    /// Seed-tree node reads plus graph-page probes made while seeding.
    pub seed_ios: u64,
    /// Metadata-store page reads made while crawling.
    pub metadata_ios: u64,
    /// Graph-page reads made while crawling (prefetch reads included).
    pub payload_ios: u64,
    /// Metadata entries resolved (cached lookups included).
    pub metadata_entry_lookups: u64,

    pub result_points: u64,
    /// Vertices decoded from visited pages that fell outside the query.
    pub useless_points: u64,

    /// Prefetched pages that the crawl actually consumed.
    pub prefetch_hits: u64,
    /// Speculative page reads issued.
    pub prefetch_issued: u64,
    /// Out-edges considered by the prediction model.
    pub prefetch_edges: u64,
    /// Score comparisons made while ranking candidates.
    pub prefetch_prediction_comparisons: u64,
    /// Candidate pages that survived scoring.
    pub prefetch_entry_candidates: u64,

    #[serde(serialize_with = "duration_ms")]
    pub total_time: Duration,
    #[serde(serialize_with = "duration_ms")]
    pub seeding_time: Duration,
    #[serde(serialize_with = "duration_ms")]
    pub crawling_time: Duration,
}

impl QueryStats {
    pub fn total_ios(&self) -> u64 {
        self.seed_ios + self.metadata_ios + self.payload_ios
    }

    /// Accumulates `other` into `self`.
    pub fn add(&mut self, other: &QueryStats) {
        self.seed_ios += other.seed_ios;
        self.metadata_ios += other.metadata_ios;
        self.payload_ios += other.payload_ios;
        self.metadata_entry_lookups += other.metadata_entry_lookups;
        self.result_points += other.result_points;
        self.useless_points += other.useless_points;
        self.prefetch_hits += other.prefetch_hits;
        self.prefetch_issued += other.prefetch_issued;
        self.prefetch_edges += other.prefetch_edges;
        self.prefetch_prediction_comparisons += other.prefetch_prediction_comparisons;
        self.prefetch_entry_candidates += other.prefetch_entry_candidates;
        self.total_time += other.total_time;
        self.seeding_time += other.seeding_time;
        self.crawling_time += other.crawling_time;
    }

    /// Column header matching [`QueryStats::row`].
    pub fn header() -> String {
        [
            "total_io", "seed_io", "meta_io", "payload_io", "results", "useless",
            "total_ms", "seed_ms", "crawl_ms", "pf_hits", "pf_issued",
        ]
        .join("\t")
    }

    /// One tab-separated row for the workload report.
    pub fn row(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{:.3}\t{:.3}\t{:.3}\t{}\t{}",
            self.total_ios(),
            self.seed_ios,
            self.metadata_ios,
            self.payload_ios,
            self.result_points,
            self.useless_points,
            self.total_time.as_secs_f64() * 1e3,
            self.seeding_time.as_secs_f64() * 1e3,
            self.crawling_time.as_secs_f64() * 1e3,
            self.prefetch_hits,
            self.prefetch_issued,
        )
    }
}
