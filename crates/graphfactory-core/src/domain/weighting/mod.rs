//! Edge weighting from aggregated strength and external co-occurrence data

mod calculator;
mod cooccurrence;

pub use calculator::{EdgeWeightCalculator, WeightingParams};
pub use cooccurrence::{
    CoOccurrenceEntry, CoOccurrenceSource, CoOccurrenceStat, CoOccurrenceTable, NoCoOccurrence,
    lookup_name,
};
