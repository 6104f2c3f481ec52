//! Output-schema descriptors: which source variable feeds which canonical field, and how
//! its values are converted on the way.

use crate::normalize::error::NormalizeError;
use crate::types::record::WindUnit;
use crate::units::{ConversionChain, ConversionError, Unit};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;

/// Canonical fields of a [`crate::DailyWeatherRecord`] that a schema can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WeatherField {
    TempMin,
    TempMax,
    TempMean,
    Precipitation,
    WindSpeed,
    Irradiance,
    VapourPressure,
    Dewpoint,
    RelativeHumidity,
}

impl WeatherField {
    /// Short column name, as used in cached weather files and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            WeatherField::TempMin => "TMIN",
            WeatherField::TempMax => "TMAX",
            WeatherField::TempMean => "TEMP",
            WeatherField::Precipitation => "RAIN",
            WeatherField::WindSpeed => "WIND",
            WeatherField::Irradiance => "IRRAD",
            WeatherField::VapourPressure => "VAP",
            WeatherField::Dewpoint => "TDEW",
            WeatherField::RelativeHumidity => "RH",
        }
    }

    /// Physically plausible range in canonical units. Wind is given in m/s.
    pub fn physical_range(&self) -> RangeInclusive<f64> {
        match self {
            WeatherField::TempMin
            | WeatherField::TempMax
            | WeatherField::TempMean
            | WeatherField::Dewpoint => -50.0..=60.0,
            WeatherField::Precipitation => 0.0..=25.0,
            WeatherField::WindSpeed => 0.0..=100.0,
            WeatherField::Irradiance => 0.0..=40.0,
            WeatherField::VapourPressure => 0.06..=199.3,
            WeatherField::RelativeHumidity => 0.0..=100.0,
        }
    }
}

impl fmt::Display for WeatherField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One output field: the canonical target, the raw source variable and the conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub target: WeatherField,
    pub source: String,
    pub chain: ConversionChain,
}

impl FieldSpec {
    pub fn new(target: WeatherField, source: &str, chain: ConversionChain) -> Self {
        Self {
            target,
            source: source.to_string(),
            chain,
        }
    }
}

/// Source variables holding top-of-atmosphere and surface shortwave radiation, used for
/// Angstrom calibration. Both must share a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiationSources {
    pub top_of_atmosphere: String,
    pub surface: String,
}

/// An ordered list of [`FieldSpec`]s describing how a raw source maps onto canonical records.
///
/// A valid schema populates minimum and maximum temperature, precipitation, wind speed,
/// irradiance and either vapour pressure or dewpoint. Mean temperature is derived from the
/// extremes when absent, and vapour pressure from the dewpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    name: String,
    fields: Vec<FieldSpec>,
    wind_unit: WindUnit,
    radiation: Option<RadiationSources>,
}

const REQUIRED: [WeatherField; 5] = [
    WeatherField::TempMin,
    WeatherField::TempMax,
    WeatherField::Precipitation,
    WeatherField::WindSpeed,
    WeatherField::Irradiance,
];

impl OutputSchema {
    /// Validates and builds a schema.
    ///
    /// # Errors
    ///
    /// [`NormalizeError::InvalidSchema`] if a required field is missing, a target appears
    /// twice, or the wind chain does not end in `wind_unit`.
    pub fn new(
        name: &str,
        fields: Vec<FieldSpec>,
        wind_unit: WindUnit,
    ) -> Result<Self, NormalizeError> {
        let mut seen = BTreeSet::new();
        for field in &fields {
            if !seen.insert(field.target) {
                return Err(NormalizeError::InvalidSchema(format!(
                    "{} is mapped more than once",
                    field.target
                )));
            }
        }
        if let Some(missing) = REQUIRED.iter().find(|f| !seen.contains(f)) {
            return Err(NormalizeError::InvalidSchema(format!(
                "required field {} is not mapped",
                missing
            )));
        }
        if !seen.contains(&WeatherField::VapourPressure) && !seen.contains(&WeatherField::Dewpoint)
        {
            return Err(NormalizeError::InvalidSchema(
                "one of VAP or TDEW must be mapped".to_string(),
            ));
        }

        let expected_wind = match wind_unit {
            WindUnit::MetresPerSecond => Unit::MetresPerSecond,
            WindUnit::KilometresPerDay => Unit::KilometresPerDay,
        };
        let wind_target = fields
            .iter()
            .find(|f| f.target == WeatherField::WindSpeed)
            .and_then(|f| f.chain.target_unit());
        if let Some(found) = wind_target {
            if found != expected_wind {
                return Err(NormalizeError::InvalidSchema(format!(
                    "wind chain ends in {} but the profile expects {}",
                    found, wind_unit
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            fields,
            wind_unit,
            radiation: None,
        })
    }

    /// Declares the radiation variables used for Angstrom calibration.
    pub fn with_radiation(mut self, top_of_atmosphere: &str, surface: &str) -> Self {
        self.radiation = Some(RadiationSources {
            top_of_atmosphere: top_of_atmosphere.to_string(),
            surface: surface.to_string(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, target: WeatherField) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.target == target)
    }

    pub fn wind_unit(&self) -> WindUnit {
        self.wind_unit
    }

    pub fn radiation(&self) -> Option<&RadiationSources> {
        self.radiation.as_ref()
    }

    /// Every raw variable the schema reads, deduplicated, in first-use order.
    pub fn source_variables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let radiation = self
            .radiation
            .iter()
            .flat_map(|r| [r.top_of_atmosphere.as_str(), r.surface.as_str()]);
        for name in self.fields.iter().map(|f| f.source.as_str()).chain(radiation) {
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
        out
    }

    /// NASA POWER daily-point API: values already arrive in °C, mm/day, MJ/m²/day and m/s.
    pub fn power_api(wind_unit: WindUnit) -> Result<Self, ConversionError> {
        use Unit::*;
        let fields = vec![
            FieldSpec::new(WeatherField::TempMin, "T2M_MIN", ConversionChain::identity()),
            FieldSpec::new(WeatherField::TempMax, "T2M_MAX", ConversionChain::identity()),
            FieldSpec::new(WeatherField::TempMean, "T2M", ConversionChain::identity()),
            FieldSpec::new(
                WeatherField::Precipitation,
                "PRECTOTCORR",
                ConversionChain::through(&[MillimetresPerDay, CentimetresPerDay])?,
            ),
            FieldSpec::new(WeatherField::WindSpeed, "WS2M", wind_chain(wind_unit)?),
            FieldSpec::new(
                WeatherField::Irradiance,
                "ALLSKY_SFC_SW_DWN",
                ConversionChain::identity(),
            ),
            FieldSpec::new(
                WeatherField::VapourPressure,
                "T2MDEW",
                ConversionChain::through(&[Celsius, Hectopascal])?,
            ),
            FieldSpec::new(WeatherField::Dewpoint, "T2MDEW", ConversionChain::identity()),
            FieldSpec::new(WeatherField::RelativeHumidity, "RH2M", ConversionChain::identity()),
        ];
        Ok(Self::from_profile("power_api", fields, wind_unit)
            .with_radiation("TOA_SW_DWN", "ALLSKY_SFC_SW_DWN"))
    }

    /// NASA POWER analysis-ready archive: K, kg/m²/s and W/m².
    pub fn power_archive(wind_unit: WindUnit) -> Result<Self, ConversionError> {
        use Unit::*;
        let temperature = ConversionChain::through(&[Kelvin, Celsius])?;
        let fields = vec![
            FieldSpec::new(WeatherField::TempMin, "T2M_MIN", temperature.clone()),
            FieldSpec::new(WeatherField::TempMax, "T2M_MAX", temperature.clone()),
            FieldSpec::new(WeatherField::TempMean, "T2M", temperature.clone()),
            FieldSpec::new(
                WeatherField::Precipitation,
                "PRECTOTCORR",
                ConversionChain::through(&[
                    KgPerSquareMetreSecond,
                    MillimetresPerDay,
                    CentimetresPerDay,
                ])?,
            ),
            FieldSpec::new(WeatherField::WindSpeed, "WS2M", wind_chain(wind_unit)?),
            FieldSpec::new(
                WeatherField::Irradiance,
                "ALLSKY_SFC_SW_DWN",
                ConversionChain::through(&[
                    WattsPerSquareMetre,
                    JoulesPerSquareMetreDay,
                    MegajoulesPerSquareMetreDay,
                ])?,
            ),
            FieldSpec::new(
                WeatherField::VapourPressure,
                "T2MDEW",
                ConversionChain::through(&[Kelvin, Celsius, Hectopascal])?,
            ),
            FieldSpec::new(WeatherField::Dewpoint, "T2MDEW", temperature),
        ];
        Ok(Self::from_profile("power_archive", fields, wind_unit)
            .with_radiation("TOA_SW_DWN", "ALLSKY_SFC_SW_DWN"))
    }

    // Shipped profiles satisfy every check in `new`.
    fn from_profile(name: &str, fields: Vec<FieldSpec>, wind_unit: WindUnit) -> Self {
        Self {
            name: name.to_string(),
            fields,
            wind_unit,
            radiation: None,
        }
    }
}

fn wind_chain(wind_unit: WindUnit) -> Result<ConversionChain, ConversionError> {
    match wind_unit {
        WindUnit::MetresPerSecond => Ok(ConversionChain::identity()),
        WindUnit::KilometresPerDay => {
            ConversionChain::through(&[Unit::MetresPerSecond, Unit::KilometresPerDay])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shipped_profiles_pass_validation() {
        for wind in [WindUnit::MetresPerSecond, WindUnit::KilometresPerDay] {
            for schema in [
                OutputSchema::power_api(wind).unwrap(),
                OutputSchema::power_archive(wind).unwrap(),
            ] {
                let revalidated =
                    OutputSchema::new(schema.name(), schema.fields().to_vec(), wind).unwrap();
                assert_eq!(revalidated.fields(), schema.fields());
            }
        }
    }

    #[test]
    fn test_source_variables_are_deduplicated() {
        let schema = OutputSchema::power_api(WindUnit::MetresPerSecond).unwrap();
        let vars = schema.source_variables();
        assert_eq!(vars.iter().filter(|v| *v == "T2MDEW").count(), 1);
        assert_eq!(vars.iter().filter(|v| *v == "ALLSKY_SFC_SW_DWN").count(), 1);
        assert!(vars.contains(&"TOA_SW_DWN".to_string()));
    }

    #[test]
    fn test_archive_chains_reach_canonical_units() {
        let schema = OutputSchema::power_archive(WindUnit::KilometresPerDay).unwrap();
        let apply = |f: WeatherField, x: f64| schema.field(f).unwrap().chain.apply(x);
        assert_relative_eq!(apply(WeatherField::TempMax, 300.0), 26.85, epsilon = 1e-9);
        assert_relative_eq!(apply(WeatherField::Precipitation, 1e-4), 0.864, epsilon = 1e-9);
        assert_relative_eq!(apply(WeatherField::Irradiance, 250.0), 21.6, epsilon = 1e-9);
        assert_relative_eq!(apply(WeatherField::WindSpeed, 2.0), 172.8, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let fields = vec![
            FieldSpec::new(WeatherField::TempMin, "a", ConversionChain::identity()),
            FieldSpec::new(WeatherField::TempMax, "b", ConversionChain::identity()),
        ];
        let err = OutputSchema::new("partial", fields, WindUnit::MetresPerSecond).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidSchema(_)));
    }

    #[test]
    fn test_wind_unit_mismatch_is_rejected() {
        let mut fields = OutputSchema::power_api(WindUnit::KilometresPerDay)
            .unwrap()
            .fields()
            .to_vec();
        fields.retain(|f| f.target != WeatherField::RelativeHumidity);
        assert!(OutputSchema::new("mismatch", fields, WindUnit::MetresPerSecond).is_err());
    }
}
