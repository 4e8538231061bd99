use serde_json::Value;
use time::OffsetDateTime;

/// The unmodified `data` object of one plant status response.
#[derive(Debug, Clone, PartialEq)]
pub struct PlantSnapshot {
    pub plant_id: String,
    pub fetched_at: OffsetDateTime,
    pub data: Value,
}

impl PlantSnapshot {
    /// Server-reported time string (`info.time`), if any.
    pub fn reported_time(&self) -> Option<&str> {
        self.data.get("info")?.get("time")?.as_str()
    }
}
