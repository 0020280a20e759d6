//! Checks on the data warehouse that report to a file instead of a load table.

pub mod fact_dimension_join;
