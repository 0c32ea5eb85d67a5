pub mod backfill_aggregates;

pub use backfill_aggregates::BackfillAggregatesError;
