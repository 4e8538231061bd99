use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use sems_model::domain::Measurement;

use crate::pipeline::{PointSink, WriteError};

/// Escape tag keys, tag values and field keys for line protocol.
///
/// Line protocol requires escaping commas, spaces and equals with a backslash.
fn escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

/// Measurement names only need commas and spaces escaped.
fn escape_measurement(s: &str, out: &mut String) {
    for ch in s.chars() {
        if matches!(ch, ',' | ' ') {
            out.push('\\');
        }
        out.push(ch);
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    escape_ident(key, out);
    out.push('=');
    escape_ident(value, out);
}

fn push_field_f64(out: &mut String, first: &mut bool, key: &str, value: f64) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }

    escape_ident(key, out);
    out.push('=');
    out.push_str(&value.to_string());
}

/// Encode one measurement as a single line, timestamp in seconds.
pub fn encode_line(name: &str, m: &Measurement, out: &mut String) {
    escape_measurement(name, out);

    // Empty tag values are invalid line protocol.
    for (key, value) in m.tags.iter().filter(|(_, v)| !v.is_empty()) {
        push_tag(out, key, value);
    }

    out.push(' ');
    let mut first = true;
    for (key, value) in &m.fields {
        push_field_f64(out, &mut first, key, *value);
    }

    out.push(' ');
    out.push_str(&m.timestamp.unix_timestamp().to_string());
}

/// Which write API the server speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfluxDbTarget {
    /// InfluxDB 1.x: `/write?db=`.
    V1 {
        database: String,
        username: Option<String>,
        password: Option<String>,
    },
    /// InfluxDB 2.x: `/api/v2/write?org=&bucket=` with a token.
    V2 {
        organization: String,
        bucket: String,
        token: String,
    },
}

pub struct InfluxDbSink {
    client: Client,
    base_url: String,
    target: InfluxDbTarget,
    measurement: String,
}

impl InfluxDbSink {
    pub fn new(
        base_url: impl Into<String>,
        target: InfluxDbTarget,
        measurement: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("sems-collector/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            target,
            measurement: measurement.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.target {
            InfluxDbTarget::V1 {
                username: Some(user),
                password,
                ..
            } => request.basic_auth(user, password.as_deref()),
            InfluxDbTarget::V1 { .. } => request,
            InfluxDbTarget::V2 { token, .. } => request.header("Authorization", format!("Token {token}")),
        }
    }

    fn write_request(&self) -> RequestBuilder {
        let request = match &self.target {
            InfluxDbTarget::V1 { database, .. } => self
                .client
                .post(format!("{}/write", self.base_url))
                .query(&[("db", database.as_str()), ("precision", "s")]),
            InfluxDbTarget::V2 {
                organization, bucket, ..
            } => self
                .client
                .post(format!("{}/api/v2/write", self.base_url))
                .query(&[
                    ("org", organization.as_str()),
                    ("bucket", bucket.as_str()),
                    ("precision", "s"),
                ]),
        };
        self.authorize(request)
    }

    /// Check that the server answers at all.
    pub async fn ping(&self) -> Result<(), WriteError> {
        let response = self
            .client
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .map_err(WriteError::Transport)?;
        check(response).await
    }

    /// Create the target database on 1.x servers; a no-op for 2.x buckets.
    pub async fn ensure_database(&self) -> Result<(), WriteError> {
        let InfluxDbTarget::V1 { database, .. } = &self.target else {
            return Ok(());
        };

        let statement = format!("CREATE DATABASE \"{}\"", database.replace('"', "\\\""));
        let request = self
            .client
            .post(format!("{}/query", self.base_url))
            .query(&[("q", statement.as_str())]);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(WriteError::Transport)?;
        check(response).await
    }
}

async fn check(response: reqwest::Response) -> Result<(), WriteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > 512 {
        let mut end = 512;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    Err(WriteError::Rejected { status, body })
}

#[async_trait::async_trait]
impl PointSink for InfluxDbSink {
    async fn write(&self, measurement: &Measurement) -> Result<(), WriteError> {
        let mut line = String::with_capacity(512);
        encode_line(&self.measurement, measurement, &mut line);
        line.push('\n');
        let bytes = line.len() as u64;

        let result = match self.write_request().body(line).send().await {
            Ok(response) => check(response).await,
            Err(e) => Err(WriteError::Transport(e)),
        };

        match &result {
            Ok(()) => {
                metrics::counter!("influxdb_points_written_total").increment(1);
                metrics::counter!("influxdb_write_bytes_total").increment(bytes);
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %self.base_url, "InfluxDB write failed");
                metrics::counter!("influxdb_write_errors_total").increment(1);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use reqwest::StatusCode;
    use time::macros::datetime;

    fn measurement() -> Measurement {
        let mut m = Measurement::new(datetime!(2024-06-01 10:05:30 UTC));
        m.tags.insert("plant_id".to_string(), "plant 1".to_string());
        m.fields.insert("power_ac".to_string(), 1500.0);
        m.fields.insert("battery_soc".to_string(), 42.5);
        m
    }

    #[test]
    fn escape_ident_escapes_commas_spaces_and_equals() {
        let mut out = String::new();
        escape_ident("a b,c=d", &mut out);
        assert_eq!(out, "a\\ b\\,c\\=d");
    }

    #[test]
    fn line_has_tags_fields_and_seconds_timestamp() {
        let mut line = String::new();
        encode_line("solar panels", &measurement(), &mut line);

        assert_eq!(
            line,
            "solar\\ panels,plant_id=plant\\ 1 battery_soc=42.5,power_ac=1500 1717236330"
        );
    }

    #[test]
    fn empty_tag_values_are_skipped() {
        let mut m = measurement();
        m.tags.insert("inverter_sn".to_string(), String::new());

        let mut line = String::new();
        encode_line("sems", &m, &mut line);
        assert!(!line.contains("inverter_sn"));
    }

    #[tokio::test]
    async fn v1_write_posts_line_with_basic_auth() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("db".into(), "solar".into()),
                Matcher::UrlEncoded("precision".into(), "s".into()),
            ]))
            .match_header("authorization", "Basic YWRtaW46c2VjcmV0")
            .match_body("sems,plant_id=plant\\ 1 battery_soc=42.5,power_ac=1500 1717236330\n")
            .with_status(204)
            .create_async()
            .await;

        let sink = InfluxDbSink::new(
            server.url(),
            InfluxDbTarget::V1 {
                database: "solar".to_string(),
                username: Some("admin".to_string()),
                password: Some("secret".to_string()),
            },
            "sems",
            Duration::from_secs(5),
        )
        .unwrap();

        sink.write(&measurement()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn v2_write_uses_bucket_and_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("org".into(), "home".into()),
                Matcher::UrlEncoded("bucket".into(), "solar".into()),
                Matcher::UrlEncoded("precision".into(), "s".into()),
            ]))
            .match_header("authorization", "Token t0k3n")
            .with_status(204)
            .create_async()
            .await;

        let sink = InfluxDbSink::new(
            format!("{}/", server.url()),
            InfluxDbTarget::V2 {
                organization: "home".to_string(),
                bucket: "solar".to_string(),
                token: "t0k3n".to_string(),
            },
            "sems",
            Duration::from_secs(5),
        )
        .unwrap();

        sink.write(&measurement()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_write_surfaces_status_and_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/write")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"error":"authorization failed"}"#)
            .create_async()
            .await;

        let sink = InfluxDbSink::new(
            server.url(),
            InfluxDbTarget::V1 {
                database: "solar".to_string(),
                username: None,
                password: None,
            },
            "sems",
            Duration::from_secs(5),
        )
        .unwrap();

        match sink.write(&measurement()).await {
            Err(WriteError::Rejected { status, body }) => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert!(body.contains("authorization failed"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ensure_database_issues_create_statement_on_v1() {
        let mut server = Server::new_async().await;
        let ping = server.mock("GET", "/ping").with_status(204).create_async().await;
        let create = server
            .mock("POST", "/query")
            .match_query(Matcher::UrlEncoded("q".into(), "CREATE DATABASE \"solar\"".into()))
            .with_status(200)
            .with_body(r#"{"results":[{"statement_id":0}]}"#)
            .create_async()
            .await;

        let sink = InfluxDbSink::new(
            server.url(),
            InfluxDbTarget::V1 {
                database: "solar".to_string(),
                username: None,
                password: None,
            },
            "sems",
            Duration::from_secs(5),
        )
        .unwrap();

        sink.ping().await.unwrap();
        sink.ensure_database().await.unwrap();
        ping.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_store_is_a_transport_error() {
        let sink = InfluxDbSink::new(
            "http://127.0.0.1:9",
            InfluxDbTarget::V1 {
                database: "solar".to_string(),
                username: None,
                password: None,
            },
            "sems",
            Duration::from_secs(2),
        )
        .unwrap();

        assert!(matches!(sink.write(&measurement()).await, Err(WriteError::Transport(_))));
    }
}
