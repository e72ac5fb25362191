// Connection metrics
// Per-connection aggregates over finished queries. A query contributes to
// exactly one bucket, exactly once, at the moment it reaches a terminal status.

use std::time::Duration;

use crate::query::{QueryExecutionStatus, QueryMetrics};

/// Aggregate over all queries that ended with the same outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionQueryMetrics {
    pub total_queries: u64,
    pub total_batches_received: u64,
    pub total_rows_received: u64,
    pub accumulated_time_until_first_batch: Duration,
    pub accumulated_query_duration: Duration,
}

impl ConnectionQueryMetrics {
    /// Add one finished query to the aggregate
    pub fn merge(&self, query: &QueryMetrics) -> Self {
        Self {
            total_queries: self.total_queries + 1,
            total_batches_received: self.total_batches_received + query.stream.total_batches_received,
            total_rows_received: self.total_rows_received + query.stream.total_rows_received,
            accumulated_time_until_first_batch: self.accumulated_time_until_first_batch
                + query.time_until_first_batch().unwrap_or_default(),
            accumulated_query_duration: self.accumulated_query_duration
                + query.query_duration.unwrap_or_default(),
        }
    }

    /// Mean duration over the aggregated queries
    pub fn average_query_duration(&self) -> Option<Duration> {
        if self.total_queries == 0 {
            return None;
        }
        let total = self.accumulated_query_duration;
        Some(match u32::try_from(self.total_queries) {
            Ok(count) => total / count,
            Err(_) => total.div_f64(self.total_queries as f64),
        })
    }
}

/// Outcome buckets of a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionMetrics {
    pub successful_queries: ConnectionQueryMetrics,
    pub canceled_queries: ConnectionQueryMetrics,
    pub failed_queries: ConnectionQueryMetrics,
}

impl ConnectionMetrics {
    /// Fold a query that reached `status` into the matching bucket.
    /// Non-terminal statuses leave the metrics unchanged.
    pub fn fold(&self, status: QueryExecutionStatus, query: &QueryMetrics) -> Self {
        let mut next = *self;
        match status {
            QueryExecutionStatus::Succeeded => {
                next.successful_queries = self.successful_queries.merge(query)
            }
            QueryExecutionStatus::Cancelled => {
                next.canceled_queries = self.canceled_queries.merge(query)
            }
            QueryExecutionStatus::Failed => next.failed_queries = self.failed_queries.merge(query),
            _ => {}
        }
        next
    }

    pub fn total_queries(&self) -> u64 {
        self.successful_queries.total_queries
            + self.canceled_queries.total_queries
            + self.failed_queries.total_queries
    }

    /// Render the buckets for the shell
    pub fn format(&self) -> String {
        let mut out = String::new();
        for (label, bucket) in [
            ("succeeded", &self.successful_queries),
            ("cancelled", &self.canceled_queries),
            ("failed", &self.failed_queries),
        ] {
            out.push_str(&format!(
                "{:<10} queries={} batches={} rows={} total_time={:?}\n",
                label,
                bucket.total_queries,
                bucket.total_batches_received,
                bucket.total_rows_received,
                bucket.accumulated_query_duration
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryExecutionMetrics;

    fn finished_query(batches: u64, rows: u64, millis: u64) -> QueryMetrics {
        QueryMetrics {
            stream: QueryExecutionMetrics {
                total_batches_received: batches,
                total_rows_received: rows,
                ..Default::default()
            },
            query_duration: Some(Duration::from_millis(millis)),
            ..Default::default()
        }
    }

    #[test]
    fn test_fold_into_matching_bucket() {
        let metrics = ConnectionMetrics::default()
            .fold(QueryExecutionStatus::Succeeded, &finished_query(2, 20, 10))
            .fold(QueryExecutionStatus::Succeeded, &finished_query(1, 5, 30))
            .fold(QueryExecutionStatus::Failed, &finished_query(0, 0, 5));

        assert_eq!(metrics.successful_queries.total_queries, 2);
        assert_eq!(metrics.successful_queries.total_batches_received, 3);
        assert_eq!(metrics.successful_queries.total_rows_received, 25);
        assert_eq!(
            metrics.successful_queries.average_query_duration(),
            Some(Duration::from_millis(20))
        );
        assert_eq!(metrics.failed_queries.total_queries, 1);
        assert_eq!(metrics.canceled_queries, ConnectionQueryMetrics::default());
        assert_eq!(metrics.total_queries(), 3);
    }

    #[test]
    fn test_average_beyond_u32_query_count() {
        let metrics = ConnectionQueryMetrics {
            total_queries: 1 << 32,
            accumulated_query_duration: Duration::from_secs(1 << 33),
            ..Default::default()
        };
        assert_eq!(metrics.average_query_duration(), Some(Duration::from_secs(2)));
        assert_eq!(ConnectionQueryMetrics::default().average_query_duration(), None);
    }

    #[test]
    fn test_fold_ignores_non_terminal_status() {
        let metrics = ConnectionMetrics::default();
        let folded = metrics.fold(QueryExecutionStatus::Running, &finished_query(1, 1, 1));
        assert_eq!(folded, metrics);
    }
}
