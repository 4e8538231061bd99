use std::{collections::BTreeMap, fmt};

use time::OffsetDateTime;

/// Canonical metric names written to the time-series store.
///
/// Units are implicit: powers in W, energies in kWh, voltages in V, currents
/// in A, frequency in Hz, temperature in °C, state of charge in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    PowerAc,
    PowerPv,
    PowerLoad,
    PowerGrid,
    PowerBattery,
    BatterySoc,
    EnergyToday,
    EnergyTotal,
    EnergyTodayPv,
    EnergyTodaySelfUse,
    EnergyTodaySell,
    EnergyTodayBuy,
    EnergyTodayLoad,
    VoltageDc1,
    VoltageDc2,
    VoltageDc3,
    CurrentDc1,
    CurrentDc2,
    CurrentDc3,
    VoltageAc,
    CurrentAc,
    FrequencyAc,
    InverterTemperature,
}

impl Metric {
    pub const ALL: [Metric; 23] = [
        Metric::PowerAc,
        Metric::PowerPv,
        Metric::PowerLoad,
        Metric::PowerGrid,
        Metric::PowerBattery,
        Metric::BatterySoc,
        Metric::EnergyToday,
        Metric::EnergyTotal,
        Metric::EnergyTodayPv,
        Metric::EnergyTodaySelfUse,
        Metric::EnergyTodaySell,
        Metric::EnergyTodayBuy,
        Metric::EnergyTodayLoad,
        Metric::VoltageDc1,
        Metric::VoltageDc2,
        Metric::VoltageDc3,
        Metric::CurrentDc1,
        Metric::CurrentDc2,
        Metric::CurrentDc3,
        Metric::VoltageAc,
        Metric::CurrentAc,
        Metric::FrequencyAc,
        Metric::InverterTemperature,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::PowerAc => "power_ac",
            Metric::PowerPv => "power_pv",
            Metric::PowerLoad => "power_load",
            Metric::PowerGrid => "power_grid",
            Metric::PowerBattery => "power_battery",
            Metric::BatterySoc => "battery_soc",
            Metric::EnergyToday => "energy_today",
            Metric::EnergyTotal => "energy_total",
            Metric::EnergyTodayPv => "energy_today_pv",
            Metric::EnergyTodaySelfUse => "energy_today_self_use",
            Metric::EnergyTodaySell => "energy_today_sell",
            Metric::EnergyTodayBuy => "energy_today_buy",
            Metric::EnergyTodayLoad => "energy_today_load",
            Metric::VoltageDc1 => "voltage_dc_1",
            Metric::VoltageDc2 => "voltage_dc_2",
            Metric::VoltageDc3 => "voltage_dc_3",
            Metric::CurrentDc1 => "current_dc_1",
            Metric::CurrentDc2 => "current_dc_2",
            Metric::CurrentDc3 => "current_dc_3",
            Metric::VoltageAc => "voltage_ac",
            Metric::CurrentAc => "current_ac",
            Metric::FrequencyAc => "frequency_ac",
            Metric::InverterTemperature => "inverter_temperature",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized telemetry snapshot: every field shares `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub timestamp: OffsetDateTime,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
}

impl Measurement {
    pub fn new(timestamp: OffsetDateTime) -> Self {
        Self {
            timestamp,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.fields.get(metric.as_str()).copied()
    }
}
