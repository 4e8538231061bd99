pub mod error;
pub mod scheduler;

use std::sync::Arc;

use sems_model::domain::{Measurement, PlantSnapshot, Session};
use time::OffsetDateTime;

use crate::{sinks::SnapshotArchive, transform::FieldMapper};

pub use error::{AuthError, CycleError, FetchError, MappingError, Stage, WriteError};
pub use scheduler::{LoopState, Scheduler};

/// Vendor side of a cycle: login plus the plant status call.
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    fn plant_id(&self) -> &str;

    async fn obtain_session(&self) -> Result<Session, AuthError>;

    /// Hand back `session` untouched while it is still valid, otherwise log in again.
    async fn ensure_valid(&self, session: Session) -> Result<Session, AuthError> {
        if session.is_valid_at(OffsetDateTime::now_utc()) {
            Ok(session)
        } else {
            tracing::debug!(expired_at = %session.expires_at, "session expired, logging in again");
            self.obtain_session().await
        }
    }

    async fn fetch_status(&self, session: &Session) -> Result<PlantSnapshot, FetchError>;
}

/// Store side of a cycle. One call per cycle, no local buffering.
#[async_trait::async_trait]
pub trait PointSink: Send + Sync {
    async fn write(&self, measurement: &Measurement) -> Result<(), WriteError>;
}

#[async_trait::async_trait]
impl<T: TelemetrySource + ?Sized> TelemetrySource for Arc<T> {
    fn plant_id(&self) -> &str {
        (**self).plant_id()
    }

    async fn obtain_session(&self) -> Result<Session, AuthError> {
        (**self).obtain_session().await
    }

    async fn ensure_valid(&self, session: Session) -> Result<Session, AuthError> {
        (**self).ensure_valid(session).await
    }

    async fn fetch_status(&self, session: &Session) -> Result<PlantSnapshot, FetchError> {
        (**self).fetch_status(session).await
    }
}

#[async_trait::async_trait]
impl<T: PointSink + ?Sized> PointSink for Arc<T> {
    async fn write(&self, measurement: &Measurement) -> Result<(), WriteError> {
        (**self).write(measurement).await
    }
}

/// Result of a single fetch-map-write pass.
#[derive(Debug)]
pub enum CycleOutcome {
    Written {
        timestamp: OffsetDateTime,
        fields: usize,
    },
    Failed(CycleError),
}

impl CycleOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, CycleOutcome::Written { .. })
    }
}

pub struct Pipeline<S, K> {
    pub source: S,
    pub mapper: FieldMapper,
    pub sink: K,
    pub archive: Option<SnapshotArchive>,
    /// Extra logins allowed per cycle when the portal rejects the token.
    pub max_session_retries: u32,
}

impl<S, K> Pipeline<S, K>
where
    S: TelemetrySource,
    K: PointSink,
{
    /// Run one cycle. `session` is left holding the session worth reusing on
    /// the next cycle, or `None` if it must be recreated.
    pub async fn run_cycle(&self, session: &mut Option<Session>) -> CycleOutcome {
        match self.try_cycle(session).await {
            Ok(measurement) => CycleOutcome::Written {
                timestamp: measurement.timestamp,
                fields: measurement.fields.len(),
            },
            Err(e) => CycleOutcome::Failed(e),
        }
    }

    async fn try_cycle(&self, session: &mut Option<Session>) -> Result<Measurement, CycleError> {
        let snapshot = self.fetch(session).await?;

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.save(&snapshot).await {
                tracing::warn!(error = %e, dir = %archive.dir().display(), "failed to archive raw snapshot");
            }
        }

        let measurement = self.mapper.map(&snapshot)?;
        tracing::debug!(?measurement, "mapped snapshot");

        self.sink.write(&measurement).await?;
        Ok(measurement)
    }

    async fn fetch(&self, slot: &mut Option<Session>) -> Result<PlantSnapshot, CycleError> {
        let mut session = match slot.take() {
            Some(session) => self.source.ensure_valid(session).await?,
            None => self.source.obtain_session().await?,
        };

        let mut renewals: u32 = 0;
        loop {
            match self.source.fetch_status(&session).await {
                Ok(snapshot) => {
                    *slot = Some(session);
                    return Ok(snapshot);
                }
                Err(FetchError::SessionRejected(reason)) if renewals < self.max_session_retries => {
                    renewals += 1;
                    tracing::debug!(%reason, renewals, "session rejected, logging in again");
                    session = self.source.obtain_session().await?;
                }
                // The session is dropped here; the next cycle starts with a fresh login.
                Err(e @ FetchError::SessionRejected(_)) => return Err(e.into()),
                Err(e) => {
                    *slot = Some(session);
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted source and recording sink shared by pipeline tests.

    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use reqwest::StatusCode;
    use serde_json::{Map, Value};
    use time::Duration;

    use super::*;

    pub fn session(max_age: Duration) -> Session {
        Session::new(Map::new(), "http://sems.test/api/", OffsetDateTime::now_utc(), max_age)
    }

    pub fn snapshot(data: Value) -> PlantSnapshot {
        PlantSnapshot {
            plant_id: "plant-1".to_string(),
            fetched_at: OffsetDateTime::now_utc(),
            data,
        }
    }

    pub enum Fetch {
        Ok(Value),
        Rejected,
        Unavailable,
    }

    #[derive(Default)]
    pub struct ScriptedSource {
        pub logins: AtomicUsize,
        pub fetches: AtomicUsize,
        pub fail_login: bool,
        pub script: Mutex<VecDeque<Fetch>>,
    }

    impl ScriptedSource {
        pub fn new(script: impl IntoIterator<Item = Fetch>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl TelemetrySource for ScriptedSource {
        fn plant_id(&self) -> &str {
            "plant-1"
        }

        async fn obtain_session(&self) -> Result<Session, AuthError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if self.fail_login {
                return Err(AuthError::Rejected {
                    message: "bad password".to_string(),
                });
            }
            Ok(session(Duration::hours(1)))
        }

        async fn fetch_status(&self, _session: &Session) -> Result<PlantSnapshot, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Fetch::Ok(data)) => Ok(snapshot(data)),
                Some(Fetch::Rejected) => Err(FetchError::SessionRejected("HTTP 401 Unauthorized".to_string())),
                Some(Fetch::Unavailable) | None => Err(FetchError::Status(StatusCode::SERVICE_UNAVAILABLE)),
            }
        }
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub written: Mutex<Vec<Measurement>>,
        pub fail: bool,
    }

    #[async_trait::async_trait]
    impl PointSink for RecordingSink {
        async fn write(&self, measurement: &Measurement) -> Result<(), WriteError> {
            if self.fail {
                return Err(WriteError::Rejected {
                    status: StatusCode::UNAUTHORIZED,
                    body: "authorization failed".to_string(),
                });
            }
            self.written.lock().unwrap().push(measurement.clone());
            Ok(())
        }
    }

    pub fn pipeline(source: ScriptedSource, sink: RecordingSink) -> Pipeline<ScriptedSource, RecordingSink> {
        Pipeline {
            source,
            mapper: FieldMapper::default(),
            sink,
            archive: None,
            max_session_retries: 2,
        }
    }
}
