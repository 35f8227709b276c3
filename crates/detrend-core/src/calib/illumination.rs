//! Flat-field illumination sources (LEDs) and the filter band each one
//! belongs to.

use std::collections::BTreeMap;

use crate::error::{DetrendError, Result};
use crate::frame::FilterBand;
use crate::io::CalibrationRecord;

/// Inclusive LED id ranges per filter band.
const LED_RANGES: [(FilterBand, i64, i64); 3] = [
    (FilterBand::Zg, 2, 5),
    (FilterBand::Zr, 7, 10),
    (FilterBand::Zi, 11, 13),
];

/// Map an LED id onto its filter band.
pub fn led_to_filter(led: i64) -> Result<FilterBand> {
    LED_RANGES
        .iter()
        .find(|(_, lo, hi)| (*lo..=*hi).contains(&led))
        .map(|(band, _, _)| *band)
        .ok_or(DetrendError::UnknownIllumination(led))
}

/// LED ids belonging to a filter band.
pub fn leds_for(filter: FilterBand) -> Vec<i64> {
    LED_RANGES
        .iter()
        .filter(|(band, _, _)| *band == filter)
        .flat_map(|(_, lo, hi)| *lo..=*hi)
        .collect()
}

/// Split flat records by filter band, keeping acquisition order inside
/// each band. One unknown LED fails the whole grouping.
pub fn group_by_filter(
    records: Vec<CalibrationRecord>,
) -> Result<BTreeMap<FilterBand, Vec<CalibrationRecord>>> {
    let mut groups: BTreeMap<FilterBand, Vec<CalibrationRecord>> = BTreeMap::new();
    for record in records {
        let led = record.led.ok_or_else(|| {
            DetrendError::Configuration(format!(
                "flat exposure {} has no LED id",
                record.path.display()
            ))
        })?;
        let filter = led_to_filter(led)?;
        groups.entry(filter).or_default().push(record);
    }
    Ok(groups)
}
