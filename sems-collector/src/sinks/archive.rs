use std::{
    io,
    path::{Path, PathBuf},
};

use sems_model::domain::PlantSnapshot;

/// Keeps every raw portal response as `<dir>/<unix seconds>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    dir: PathBuf,
}

impl SnapshotArchive {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, snapshot: &PlantSnapshot) -> io::Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}.json", snapshot.fetched_at.unix_timestamp()));
        let body = serde_json::to_vec(&snapshot.data)?;
        tokio::fs::write(&path, body).await?;
        tracing::info!(path = %path.display(), "archived raw snapshot");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[tokio::test]
    async fn snapshot_is_written_under_fetch_time() {
        let dir = tempfile::tempdir().unwrap();
        let archive = SnapshotArchive::new(dir.path());
        let snapshot = PlantSnapshot {
            plant_id: "plant-1".to_string(),
            fetched_at: datetime!(2024-06-01 10:05:30 UTC),
            data: json!({ "kpi": { "pac": 1500 } }),
        };

        let path = archive.save(&snapshot).await.unwrap();

        assert_eq!(path, dir.path().join("1717236330.json"));
        let stored: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, snapshot.data);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = SnapshotArchive::new(dir.path().join("nope"));
        let snapshot = PlantSnapshot {
            plant_id: "plant-1".to_string(),
            fetched_at: datetime!(2024-06-01 10:05:30 UTC),
            data: json!({}),
        };

        assert!(archive.save(&snapshot).await.is_err());
    }
}
