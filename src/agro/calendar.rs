//! Crop calendars: when a crop is sown and harvested at a location.

use crate::config::CropWeatherConfig;
use crate::types::location::LocationQuery;
use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A month and day without a year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub const fn new(month: u32, day: u32) -> Self {
        Self { month, day }
    }

    /// The date in `year`, or `None` for combinations like February 30th.
    pub fn in_year(&self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

/// Sowing and harvest dates for one season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantingWindow {
    pub sowing: NaiveDate,
    pub harvest: NaiveDate,
}

/// Bounds applied to calendar dates before a simulation runs.
///
/// Sowing earlier than `earliest_sowing` moves to it, harvest later than `latest_harvest`
/// moves to it. Either bound can be disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarClampPolicy {
    pub earliest_sowing: Option<MonthDay>,
    pub latest_harvest: Option<MonthDay>,
}

impl Default for CalendarClampPolicy {
    fn default() -> Self {
        Self {
            earliest_sowing: Some(MonthDay::new(4, 22)),
            latest_harvest: Some(MonthDay::new(9, 29)),
        }
    }
}

impl CalendarClampPolicy {
    /// A policy that leaves windows untouched.
    pub fn disabled() -> Self {
        Self {
            earliest_sowing: None,
            latest_harvest: None,
        }
    }

    /// Clamps `window` to the bounds in the sowing year.
    ///
    /// Returns `None` when clamping leaves harvest before sowing.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use cropweather::agro::calendar::{CalendarClampPolicy, PlantingWindow};
    ///
    /// let d = |m, day| NaiveDate::from_ymd_opt(2022, m, day).unwrap();
    /// let window = PlantingWindow { sowing: d(3, 1), harvest: d(10, 15) };
    /// let clamped = CalendarClampPolicy::default().apply(window).unwrap();
    /// assert_eq!(clamped, PlantingWindow { sowing: d(4, 22), harvest: d(9, 29) });
    /// ```
    pub fn apply(&self, window: PlantingWindow) -> Option<PlantingWindow> {
        let year = window.sowing.year();
        let mut out = window;
        if let Some(bound) = self.earliest_sowing.and_then(|b| b.in_year(year)) {
            out.sowing = out.sowing.max(bound);
        }
        if let Some(bound) = self.latest_harvest.and_then(|b| b.in_year(year)) {
            out.harvest = out.harvest.min(bound);
        }
        if out.harvest < out.sowing {
            warn!(
                "Clamping {} .. {} leaves harvest before sowing; skipping",
                window.sowing, window.harvest
            );
            return None;
        }
        if out != window {
            debug!(
                "Clamped window {} .. {} to {} .. {}",
                window.sowing, window.harvest, out.sowing, out.harvest
            );
        }
        Some(out)
    }
}

/// Supplies planting windows per crop and location.
pub trait CropCalendar: Send + Sync {
    /// The window for `crop` at `location` in `year`, or `None` when the crop is not grown
    /// there. A `None` means the location is skipped, not that the run failed.
    fn window(&self, crop: &str, location: &LocationQuery, year: i32) -> Option<PlantingWindow>;
}

/// One grid cell of a gridded crop calendar. Missing days mark cells where the crop is not
/// grown.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarCell {
    pub latitude: f64,
    pub longitude: f64,
    pub plant_doy: Option<u32>,
    pub harvest_doy: Option<u32>,
}

impl RTreeObject for CalendarCell {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.latitude, self.longitude])
    }
}

impl PointDistance for CalendarCell {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.latitude - point[0];
        let dy = self.longitude - point[1];
        dx * dx + dy * dy
    }
}

/// An in-memory gridded calendar of day-of-year sowing and harvest per crop.
///
/// A query uses the nearest cell of the crop's grid, then applies the clamp policy.
#[derive(Debug, Clone, Default)]
pub struct DayOfYearCalendar {
    grids: HashMap<String, RTree<CalendarCell>>,
    policy: CalendarClampPolicy,
}

impl DayOfYearCalendar {
    pub fn new(policy: CalendarClampPolicy) -> Self {
        Self {
            grids: HashMap::new(),
            policy,
        }
    }

    /// An empty calendar clamped by the configured policy.
    pub fn from_config(config: &CropWeatherConfig) -> Self {
        Self::new(config.calendar_clamp)
    }

    /// Replaces the grid of `crop`.
    pub fn with_crop(mut self, crop: &str, cells: Vec<CalendarCell>) -> Self {
        self.grids
            .insert(crop.to_lowercase(), RTree::bulk_load(cells));
        self
    }

    pub fn policy(&self) -> &CalendarClampPolicy {
        &self.policy
    }
}

impl CropCalendar for DayOfYearCalendar {
    fn window(&self, crop: &str, location: &LocationQuery, year: i32) -> Option<PlantingWindow> {
        let grid = self.grids.get(&crop.to_lowercase())?;
        let cell = grid.nearest_neighbor(&location.as_point())?;
        let (Some(plant), Some(harvest)) = (cell.plant_doy, cell.harvest_doy) else {
            debug!("No {} calendar at {}", crop, location);
            return None;
        };
        let window = PlantingWindow {
            sowing: NaiveDate::from_yo_opt(year, plant)?,
            harvest: NaiveDate::from_yo_opt(year, harvest)?,
        };
        self.policy.apply(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, m, day).unwrap()
    }

    fn calendar(policy: CalendarClampPolicy) -> DayOfYearCalendar {
        DayOfYearCalendar::new(policy).with_crop(
            "Maize",
            vec![
                CalendarCell {
                    latitude: 45.0,
                    longitude: 10.0,
                    // Day 100 = April 10th, day 290 = October 17th (2022).
                    plant_doy: Some(100),
                    harvest_doy: Some(290),
                },
                CalendarCell {
                    latitude: 60.0,
                    longitude: 10.0,
                    plant_doy: None,
                    harvest_doy: Some(250),
                },
            ],
        )
    }

    #[test]
    fn test_default_policy_clamps_both_ends() {
        let loc = LocationQuery::new(45.2, 9.9).unwrap();
        let window = calendar(CalendarClampPolicy::default())
            .window("maize", &loc, 2022)
            .unwrap();
        assert_eq!(window, PlantingWindow { sowing: d(4, 22), harvest: d(9, 29) });
    }

    #[test]
    fn test_disabled_policy_keeps_calendar_dates() {
        let loc = LocationQuery::new(45.0, 10.0).unwrap();
        let window = calendar(CalendarClampPolicy::disabled())
            .window("maize", &loc, 2022)
            .unwrap();
        assert_eq!(window, PlantingWindow { sowing: d(4, 10), harvest: d(10, 17) });
    }

    #[test]
    fn test_missing_cell_value_skips_location() {
        let loc = LocationQuery::new(59.0, 10.0).unwrap();
        assert_eq!(calendar(CalendarClampPolicy::default()).window("maize", &loc, 2022), None);
        assert_eq!(calendar(CalendarClampPolicy::default()).window("wheat", &loc, 2022), None);
    }

    #[test]
    fn test_inverted_window_after_clamping_is_skipped() {
        let policy = CalendarClampPolicy {
            earliest_sowing: Some(MonthDay::new(8, 1)),
            latest_harvest: Some(MonthDay::new(7, 1)),
        };
        let window = PlantingWindow { sowing: d(5, 1), harvest: d(9, 1) };
        assert_eq!(policy.apply(window), None);
    }

    #[test]
    fn test_from_config_uses_configured_clamp() {
        let config = CropWeatherConfig {
            calendar_clamp: CalendarClampPolicy {
                earliest_sowing: None,
                latest_harvest: Some(MonthDay::new(10, 1)),
            },
            ..CropWeatherConfig::default()
        };
        let calendar = DayOfYearCalendar::from_config(&config).with_crop(
            "maize",
            vec![CalendarCell {
                latitude: 45.0,
                longitude: 10.0,
                plant_doy: Some(100),
                harvest_doy: Some(290),
            }],
        );
        assert_eq!(calendar.policy(), &config.calendar_clamp);
        let window = calendar
            .window("maize", &LocationQuery::new(45.0, 10.0).unwrap(), 2022)
            .unwrap();
        assert_eq!(window, PlantingWindow { sowing: d(4, 10), harvest: d(10, 1) });
    }
}
