//! The corpus counting pipeline.
//!
//! Counting runs in two stages connected through the filesystem. The
//! [`sequencer`] projects the training corpus into raw per-bucket split
//! files, one family per pattern. The [`aggregator`] turns each split file
//! into a sorted chunk of unique keys, spilling to disk when a chunk
//! outgrows memory. The [`pipeline`] driver schedules both, derives
//! continuation stores from absolute ones and keeps completed stores from
//! being rebuilt.

pub mod aggregator;
pub mod pipeline;
pub mod sequencer;
