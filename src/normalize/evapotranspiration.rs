//! Reference evapotranspiration from canonical daily weather.
//!
//! `E0` and `ES0` follow the Penman (1948) open-water and bare-soil formulation used by
//! WOFOST; `ET0` is the FAO-56 Penman-Monteith grass reference. All results are in cm/day.

use crate::normalize::calibration::AngstromCoefficients;
use crate::types::record::{DailyWeatherRecord, ReferenceEt};
use crate::units::saturation_vapour_pressure_kpa;
use chrono::{Datelike, NaiveDate};
use std::f64::consts::PI;

/// Solar constant, MJ/m²/min.
const SOLAR_CONSTANT: f64 = 0.0820;
/// Stefan-Boltzmann constant, MJ/K⁴/m²/day.
const STEFAN_BOLTZMANN_MJ: f64 = 4.903e-9;
/// Latent heat of vaporisation, MJ/kg.
const LATENT_HEAT_MJ: f64 = 2.45;
const ALBEDO_WATER: f64 = 0.05;
const ALBEDO_SOIL: f64 = 0.15;
const ALBEDO_GRASS: f64 = 0.23;

/// Inputs for one day, in canonical units.
#[derive(Debug, Clone, Copy)]
pub struct EtInputs {
    pub date: NaiveDate,
    pub latitude: f64,
    /// m
    pub elevation: f64,
    /// °C
    pub temp_min: f64,
    /// °C
    pub temp_max: f64,
    /// MJ/m²/day
    pub irradiance: f64,
    /// hPa
    pub vapour_pressure: f64,
    /// m/s at 2 m
    pub wind_speed: f64,
}

impl EtInputs {
    pub fn from_record(record: &DailyWeatherRecord) -> Self {
        Self {
            date: record.date,
            latitude: record.latitude,
            elevation: record.elevation,
            temp_min: record.temp_min,
            temp_max: record.temp_max,
            irradiance: record.irradiance,
            vapour_pressure: record.vapour_pressure,
            wind_speed: record.wind_speed_ms(),
        }
    }
}

/// Sets [`DailyWeatherRecord::reference_et`] on every record.
pub fn attach_reference_et(records: &mut [DailyWeatherRecord], angstrom: AngstromCoefficients) {
    for record in records {
        record.reference_et = Some(reference_et(&EtInputs::from_record(record), angstrom));
    }
}

/// Extraterrestrial radiation (MJ/m²/day) for a latitude and date, FAO-56 eq. 21.
pub fn extraterrestrial_radiation(latitude: f64, date: NaiveDate) -> f64 {
    let doy = date.ordinal() as f64;
    let phi = latitude.to_radians();
    let dr = 1.0 + 0.033 * (2.0 * PI * doy / 365.0).cos();
    let delta = 0.409 * (2.0 * PI * doy / 365.0 - 1.39).sin();
    // Clamped so polar day/night stays defined.
    let ws = (-phi.tan() * delta.tan()).clamp(-1.0, 1.0).acos();
    let ra = 24.0 * 60.0 / PI
        * SOLAR_CONSTANT
        * dr
        * (ws * phi.sin() * delta.sin() + phi.cos() * delta.cos() * ws.sin());
    ra.max(0.0)
}

fn psychrometric_constant_kpa(elevation: f64) -> f64 {
    let pressure = 101.3 * ((293.0 - 0.0065 * elevation) / 293.0).powf(5.26);
    0.000665 * pressure
}

fn slope_vapour_pressure_curve(t: f64) -> f64 {
    4098.0 * saturation_vapour_pressure_kpa(t) / (t + 237.3).powi(2)
}

/// Net outgoing long-wave radiation (MJ/m²/day), FAO-56 eq. 39.
fn net_longwave(input: &EtInputs, ea_kpa: f64, rs_rso: f64) -> f64 {
    let tmax_k4 = (input.temp_max + 273.16).powi(4);
    let tmin_k4 = (input.temp_min + 273.16).powi(4);
    STEFAN_BOLTZMANN_MJ
        * (tmax_k4 + tmin_k4)
        / 2.0
        * (0.34 - 0.14 * ea_kpa.max(0.0).sqrt())
        * (1.35 * rs_rso - 0.35)
}

/// Computes E0, ES0 and ET0 for one day.
///
/// Vapour pressure is capped at saturation for the mean temperature. Negative results are
/// clipped to zero.
pub fn reference_et(input: &EtInputs, angstrom: AngstromCoefficients) -> ReferenceEt {
    let t_mean = (input.temp_min + input.temp_max) / 2.0;
    let es = (saturation_vapour_pressure_kpa(input.temp_max)
        + saturation_vapour_pressure_kpa(input.temp_min))
        / 2.0;
    let ea = (input.vapour_pressure / 10.0).min(saturation_vapour_pressure_kpa(t_mean));
    let delta = slope_vapour_pressure_curve(t_mean);
    let gamma = psychrometric_constant_kpa(input.elevation);
    let u2 = input.wind_speed.max(0.0);

    let ra = extraterrestrial_radiation(input.latitude, input.date);
    let rso = angstrom.clear_sky_fraction() * ra;
    let rs_rso = if rso > 0.0 {
        (input.irradiance / rso).clamp(0.3, 1.0)
    } else {
        0.3
    };
    let rnl = net_longwave(input, ea, rs_rso);
    let deficit = (es - ea).max(0.0);

    // FAO-56 Penman-Monteith, mm/day.
    let rn_grass = (1.0 - ALBEDO_GRASS) * input.irradiance - rnl;
    let et0 = (0.408 * delta * rn_grass + gamma * 900.0 / (t_mean + 273.0) * u2 * deficit)
        / (delta + gamma * (1.0 + 0.34 * u2));

    // Penman with the Rome wind function, mm/day. The wind coefficient grows with the
    // diurnal temperature range.
    let bu = 0.54 + 0.35 * ((input.temp_max - input.temp_min - 12.0) / 4.0).clamp(0.0, 1.0);
    let aerodynamic = 0.26 * (deficit * 10.0) * (0.5 + bu * u2);
    // Penman's psychrometric constant is in hPa/K; DELTA must match.
    let delta_hpa = delta * 10.0;
    let gamma_hpa = gamma * 10.0;
    let penman = |albedo: f64| {
        let rn = ((1.0 - albedo) * input.irradiance - rnl) / LATENT_HEAT_MJ;
        (delta_hpa * rn + gamma_hpa * aerodynamic) / (delta_hpa + gamma_hpa)
    };
    let e0 = penman(ALBEDO_WATER);
    let es0 = penman(ALBEDO_SOIL);

    ReferenceEt {
        e0: e0.max(0.0) / 10.0,
        es0: es0.max(0.0) / 10.0,
        et0: et0.max(0.0) / 10.0,
    }
}
