//! Full cycles against mock SEMS Portal and InfluxDB servers.

use std::{collections::BTreeMap, time::Duration};

use mockito::{Matcher, Mock, Server, ServerGuard};
use sems_collector::{
    pipeline::{CycleOutcome, Pipeline, Scheduler, Stage},
    sinks::{InfluxDbSink, InfluxDbTarget, SnapshotArchive},
    sources::SemsPortalSource,
    transform::FieldMapper,
};
use sems_model::domain::Credentials;
use serde_json::json;
use time::UtcOffset;

const LOGIN_PATH: &str = "/api/v2/Common/CrossLogin";
const STATUS_PATH: &str = "/api/v2/PowerStation/GetMonitorDetailByPowerstationId";

async fn mock_login(server: &mut ServerGuard, hits: usize) -> Mock {
    let body = json!({
        "hasError": false,
        "msg": "Successful",
        "data": { "uid": "u-1", "token": "abc", "client": "ios", "version": "", "language": "en" },
        "api": format!("{}/api/", server.url()),
    });
    server
        .mock("POST", LOGIN_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .expect(hits)
        .create_async()
        .await
}

fn pipeline(
    sems: &ServerGuard,
    influx: &ServerGuard,
    archive: Option<SnapshotArchive>,
) -> Pipeline<SemsPortalSource, InfluxDbSink> {
    let source = SemsPortalSource::new(
        Credentials {
            account: "visitor@example.com".to_string(),
            password: "secret".to_string(),
            plant_id: "plant-1".to_string(),
        },
        format!("{}{LOGIN_PATH}", sems.url()),
        Duration::from_secs(5),
        Duration::from_secs(3600),
    )
    .unwrap();

    let sink = InfluxDbSink::new(
        influx.url(),
        InfluxDbTarget::V1 {
            database: "solar".to_string(),
            username: None,
            password: None,
        },
        "sems",
        Duration::from_secs(5),
    )
    .unwrap();

    Pipeline {
        source,
        mapper: FieldMapper::new(UtcOffset::UTC, BTreeMap::new()).unwrap(),
        sink,
        archive,
        max_session_retries: 2,
    }
}

#[tokio::test]
async fn status_document_becomes_one_line_in_influxdb() {
    let mut sems = Server::new_async().await;
    let mut influx = Server::new_async().await;
    let archive_dir = tempfile::tempdir().unwrap();

    let login = mock_login(&mut sems, 1).await;
    let status = sems
        .mock("POST", STATUS_PATH)
        .match_body(Matcher::Json(json!({ "powerStationId": "plant-1" })))
        .with_status(200)
        .with_body(
            json!({
                "hasError": false,
                "msg": "success",
                "data": {
                    "info": { "time": "06/01/2024 12:05:30" },
                    "kpi": { "pac": 1500, "power": 12.4 },
                    "powerflow": { "pv": "1620(W)", "grid": "350(W)", "loadStatus": -1 },
                    "inverter": [ { "sn": "GW5K-1", "d": { "vpv1": 301.2 } } ]
                }
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;
    let write = influx
        .mock("POST", "/write")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("db".into(), "solar".into()),
            Matcher::UrlEncoded("precision".into(), "s".into()),
        ]))
        .match_body(
            "sems,inverter_sn=GW5K-1,plant_id=plant-1 \
             energy_today=12.4,power_ac=1500,power_grid=-350,power_pv=1620,voltage_dc_1=301.2 \
             1717243530\n",
        )
        .with_status(204)
        .expect(2)
        .create_async()
        .await;

    let archive = SnapshotArchive::new(archive_dir.path());
    let mut scheduler = Scheduler::new(pipeline(&sems, &influx, Some(archive)), Duration::from_secs(60));
    let mut session = None;

    assert!(scheduler.tick(&mut session).await.is_written());
    assert!(session.is_some());
    assert!(scheduler.tick(&mut session).await.is_written());

    login.assert_async().await;
    status.assert_async().await;
    write.assert_async().await;

    let archived = std::fs::read_dir(archive_dir.path()).unwrap().count();
    assert!(archived >= 1);
}

#[tokio::test]
async fn unauthorized_status_fails_cycle_without_writing() {
    let mut sems = Server::new_async().await;
    let mut influx = Server::new_async().await;

    // One initial login plus two renewals.
    let login = mock_login(&mut sems, 3).await;
    let status = sems
        .mock("POST", STATUS_PATH)
        .with_status(401)
        .expect(3)
        .create_async()
        .await;
    let write = influx
        .mock("POST", "/write")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let mut scheduler = Scheduler::new(pipeline(&sems, &influx, None), Duration::from_secs(60));
    let mut session = None;

    match scheduler.tick(&mut session).await {
        CycleOutcome::Failed(e) => assert_eq!(e.stage(), Stage::Fetch),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(session.is_none());

    login.assert_async().await;
    status.assert_async().await;
    write.assert_async().await;
}
