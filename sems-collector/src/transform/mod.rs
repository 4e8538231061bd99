pub mod path;

use std::collections::BTreeMap;

use sems_model::domain::{Measurement, Metric, PlantSnapshot};
use serde_json::Value;
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::pipeline::MappingError;

pub use path::PathError;

/// Powerflow readings below this magnitude (W) are sensor noise.
const FLOW_NOISE_FLOOR_W: f64 = 10.0;

enum Kind {
    Number,
    /// A `"1234(W)"` style powerflow reading, optionally signed by a status flag.
    Flow { direction: &'static [&'static str] },
}

struct Rule {
    metric: Metric,
    /// Candidate paths, first one holding a usable value wins. Several entries
    /// exist because the portal misspells keys (`bettery`, `energe`, `tempperature`).
    paths: &'static [&'static str],
    kind: Kind,
}

const RULES: &[Rule] = &[
    Rule {
        metric: Metric::PowerAc,
        paths: &["pac", "inverter[0].d.pac", "kpi.pac"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::PowerPv,
        paths: &["powerflow.pv"],
        kind: Kind::Flow { direction: &[] },
    },
    Rule {
        metric: Metric::PowerLoad,
        paths: &["powerflow.load"],
        kind: Kind::Flow { direction: &[] },
    },
    Rule {
        metric: Metric::PowerGrid,
        paths: &["powerflow.grid"],
        kind: Kind::Flow {
            direction: &["powerflow.loadStatus"],
        },
    },
    Rule {
        metric: Metric::PowerBattery,
        paths: &["powerflow.bettery", "powerflow.battery"],
        kind: Kind::Flow {
            direction: &["powerflow.betteryStatus", "powerflow.batteryStatus"],
        },
    },
    Rule {
        metric: Metric::BatterySoc,
        paths: &["battery_soc", "bettery_soc", "soc.power", "powerflow.soc"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::EnergyToday,
        paths: &["kpi.power"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::EnergyTotal,
        paths: &["kpi.total_power"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::EnergyTodayPv,
        paths: &["energeStatisticsCharts.sum", "energyStatisticsCharts.sum"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::EnergyTodaySelfUse,
        paths: &["energeStatisticsCharts.selfUseOfPv", "energyStatisticsCharts.selfUseOfPv"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::EnergyTodaySell,
        paths: &["energeStatisticsCharts.sell", "energyStatisticsCharts.sell"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::EnergyTodayBuy,
        paths: &["energeStatisticsCharts.buy", "energyStatisticsCharts.buy"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::EnergyTodayLoad,
        paths: &[
            "energeStatisticsCharts.consumptionOfLoad",
            "energyStatisticsCharts.consumptionOfLoad",
        ],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::VoltageDc1,
        paths: &["inverter[0].d.vpv1"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::VoltageDc2,
        paths: &["inverter[0].d.vpv2"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::VoltageDc3,
        paths: &["inverter[0].d.vpv3"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::CurrentDc1,
        paths: &["inverter[0].d.ipv1"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::CurrentDc2,
        paths: &["inverter[0].d.ipv2"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::CurrentDc3,
        paths: &["inverter[0].d.ipv3"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::VoltageAc,
        paths: &["inverter[0].d.vac1"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::CurrentAc,
        paths: &["inverter[0].d.iac1"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::FrequencyAc,
        paths: &["inverter[0].d.fac1"],
        kind: Kind::Number,
    },
    Rule {
        metric: Metric::InverterTemperature,
        paths: &["inverter[0].tempperature", "inverter[0].temperature"],
        kind: Kind::Number,
    },
];

const REQUIRED: &[Metric] = &[Metric::PowerAc];

/// First candidate path that resolves to a value `parse` accepts.
fn first_parsed(data: &Value, paths: &[&str], parse: fn(&Value) -> Option<f64>) -> Option<f64> {
    paths
        .iter()
        .filter_map(|p| path::resolve(data, p))
        .find_map(|v| parse(&v))
}

/// Plain numeric reading: a JSON number or a numeric string.
fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Powerflow reading: `"3503(W)"`, a bare number, or a numeric string.
fn parse_flow(value: &Value) -> Option<f64> {
    let n = match value {
        Value::String(s) => {
            let s = s.trim();
            let s = s.strip_suffix("(W)").unwrap_or(s).trim();
            s.parse::<f64>().ok()?
        }
        other => parse_number(other)?,
    };
    if !n.is_finite() {
        return None;
    }
    Some(if n.abs() < FLOW_NOISE_FLOOR_W { 0.0 } else { n })
}

/// Vendor status flags are -1, 0 or 1; zero means no flow in either direction.
fn direction_sign(flag: f64) -> f64 {
    if flag > 0.0 {
        1.0
    } else if flag < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl Rule {
    fn extract(&self, data: &Value) -> Option<f64> {
        match self.kind {
            Kind::Number => first_parsed(data, self.paths, parse_number),
            Kind::Flow { direction } => {
                let magnitude = first_parsed(data, self.paths, parse_flow)?;
                let sign = first_parsed(data, direction, parse_number).map_or(1.0, direction_sign);
                let value = magnitude * sign;
                // Avoid writing `-0`.
                Some(if value == 0.0 { 0.0 } else { value })
            }
        }
    }
}

/// Translates a raw portal snapshot into a [`Measurement`].
///
/// Mapping is pure: the same snapshot always yields the same measurement.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    utc_offset: UtcOffset,
    extra_fields: BTreeMap<String, String>,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self {
            utc_offset: UtcOffset::UTC,
            extra_fields: BTreeMap::new(),
        }
    }
}

impl FieldMapper {
    /// `utc_offset` is the plant's local offset, used to read `info.time`.
    /// `extra_fields` maps additional field names to paths into the snapshot.
    pub fn new(utc_offset: UtcOffset, extra_fields: BTreeMap<String, String>) -> Result<Self, PathError> {
        for p in extra_fields.values() {
            path::validate(p)?;
        }
        Ok(Self {
            utc_offset,
            extra_fields,
        })
    }

    pub fn map(&self, snapshot: &PlantSnapshot) -> Result<Measurement, MappingError> {
        let data = &snapshot.data;
        let mut measurement = Measurement::new(self.timestamp(snapshot));

        for rule in RULES {
            if let Some(value) = rule.extract(data) {
                measurement.fields.insert(rule.metric.as_str().to_string(), value);
            }
        }

        for (name, p) in &self.extra_fields {
            if let Some(value) = path::resolve(data, p).as_ref().and_then(parse_number) {
                measurement.fields.insert(name.clone(), value);
            }
        }

        if let Some(missing) = REQUIRED.iter().find(|m| measurement.get(**m).is_none()) {
            return Err(MappingError::MissingField {
                field: missing.as_str(),
            });
        }

        measurement
            .tags
            .insert("plant_id".to_string(), snapshot.plant_id.clone());
        if let Some(Value::String(sn)) = path::resolve(data, "inverter[0].sn") {
            if !sn.is_empty() {
                measurement.tags.insert("inverter_sn".to_string(), sn);
            }
        }

        Ok(measurement)
    }

    /// `info.time` in plant-local time, falling back to the fetch time.
    fn timestamp(&self, snapshot: &PlantSnapshot) -> OffsetDateTime {
        let format = format_description!(
            "[month padding:none]/[day padding:none]/[year] [hour padding:none]:[minute]:[second]"
        );
        snapshot
            .reported_time()
            .and_then(|t| PrimitiveDateTime::parse(t.trim(), format).ok())
            .map_or(snapshot.fetched_at, |t| {
                t.assume_offset(self.utc_offset).to_offset(UtcOffset::UTC)
            })
    }
}
