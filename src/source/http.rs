use std::time::Duration;

use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::sse::{SseDecoder, SseFrame};
use super::{SUBSCRIPTION_BUFFER, SourceEvent, StatusSource, Subscription};
use crate::error::StatusError;
use crate::status::{JobId, Status, StatusEvent};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `POST /createJob` response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobResponse {
    job_id: String,
}

/// Body of `GET /status/:jobId` and of `statusUpdate` push events.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    #[serde(default)]
    job_id: Option<String>,
    status: String,
}

/// Body of `error` push events.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

/// Talks to the job service over HTTP: plain requests for the pull path and a
/// server-sent-event stream for the push path.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpStatusSource {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, StatusError> {
        // No overall client timeout: event streams stay open for the whole wait.
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl StatusSource for HttpStatusSource {
    async fn create_job(&self) -> Result<JobId, StatusError> {
        let response = self
            .client
            .post(self.url("createJob"))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StatusError::Transport(format!(
                "createJob returned status {status}"
            )));
        }

        let body = response.json::<CreateJobResponse>().await?;
        Ok(JobId::from(body.job_id))
    }

    async fn query_once(&self, job_id: &JobId) -> Result<Status, StatusError> {
        let response = self
            .client
            .get(self.url(&format!("status/{job_id}")))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StatusError::NotFound(job_id.clone()));
        }
        if !status.is_success() {
            return Err(StatusError::Transport(format!(
                "status endpoint returned {status}"
            )));
        }

        let text = response.text().await?;
        let payload: StatusPayload = serde_json::from_str(&text)
            .map_err(|e| StatusError::Protocol(format!("malformed status body: {e}")))?;
        Status::parse(&payload.status)
    }

    fn subscribe(&self, job_id: &JobId) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let request = self
            .client
            .get(self.url(&format!("events/{job_id}")))
            .header(ACCEPT, "text/event-stream");
        let reader = tokio::spawn(stream_events(request, job_id.clone(), tx));
        Subscription::new(rx, move || reader.abort())
    }
}

/// Drive one event-stream connection, forwarding what it sees until the
/// stream ends or the subscriber goes away.
async fn stream_events(request: RequestBuilder, job_id: JobId, tx: mpsc::Sender<SourceEvent>) {
    let response = match request.send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            let message = format!("event stream rejected with status {}", response.status());
            let _ = tx.send(SourceEvent::ConnectionError(message)).await;
            return;
        }
        Err(e) => {
            let _ = tx
                .send(SourceEvent::ConnectionError(format!("connect error: {e}")))
                .await;
            return;
        }
    };

    if tx.send(SourceEvent::Connected).await.is_err() {
        return;
    }
    tracing::debug!(job_id = %job_id, "event stream connected");

    let mut decoder = SseDecoder::default();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx
                    .send(SourceEvent::ConnectionError(format!("event stream dropped: {e}")))
                    .await;
                return;
            }
        };
        for frame in decoder.feed(&bytes) {
            let Some(event) = translate_frame(&job_id, frame) else {
                continue;
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }

    let _ = tx
        .send(SourceEvent::ConnectionError("event stream closed by server".into()))
        .await;
}

/// Map a decoded frame onto a [`SourceEvent`]. Unknown event names are skipped.
fn translate_frame(subscribed: &JobId, frame: SseFrame) -> Option<SourceEvent> {
    match frame.event.as_str() {
        "statusUpdate" => {
            let event = serde_json::from_str::<StatusPayload>(&frame.data)
                .map_err(|e| StatusError::Protocol(format!("malformed statusUpdate: {e}")))
                .and_then(|payload| {
                    let status = Status::parse(&payload.status)?;
                    let job_id = payload
                        .job_id
                        .map(JobId::from)
                        .unwrap_or_else(|| subscribed.clone());
                    Ok(StatusEvent { job_id, status })
                });
            Some(match event {
                Ok(event) => SourceEvent::Status(event),
                Err(e) => SourceEvent::ProtocolError(e.to_string()),
            })
        }
        "error" => {
            let message = serde_json::from_str::<ErrorPayload>(&frame.data)
                .map(|payload| payload.message)
                .unwrap_or(frame.data);
            Some(SourceEvent::ServerError(message))
        }
        other => {
            tracing::debug!(event = other, "ignoring unknown push event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn source(server: &MockServer) -> HttpStatusSource {
        HttpStatusSource::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.into(),
            data: data.into(),
        }
    }

    #[tokio::test]
    async fn create_job_returns_backend_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/createJob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"jobId": "abc"})))
            .mount(&server)
            .await;

        let id = source(&server).create_job().await.unwrap();
        assert_eq!(id, JobId::from("abc"));
    }

    #[tokio::test]
    async fn query_once_parses_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/42"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"jobId": "42", "status": "completed"})),
            )
            .mount(&server)
            .await;

        let status = source(&server).query_once(&JobId::from("42")).await.unwrap();
        assert_eq!(status, Status::Completed);
    }

    #[tokio::test]
    async fn query_once_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/unknown"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = source(&server)
            .query_once(&JobId::from("unknown"))
            .await
            .unwrap_err();
        assert_eq!(err, StatusError::NotFound(JobId::from("unknown")));
    }

    #[tokio::test]
    async fn query_once_rejects_unknown_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/7"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"jobId": "7", "status": "finished"})),
            )
            .mount(&server)
            .await;

        let err = source(&server).query_once(&JobId::from("7")).await.unwrap_err();
        assert!(matches!(err, StatusError::Protocol(_)));
    }

    #[tokio::test]
    async fn query_once_server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/9"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = source(&server).query_once(&JobId::from("9")).await.unwrap_err();
        assert!(matches!(err, StatusError::Transport(_)));
    }

    #[tokio::test]
    async fn query_once_unreachable_is_transport() {
        let source = HttpStatusSource::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = source.query_once(&JobId::from("1")).await.unwrap_err();
        assert!(matches!(err, StatusError::Transport(_)));
    }

    #[tokio::test]
    async fn subscribe_delivers_connected_then_status() {
        let server = MockServer::start().await;
        let body = "event: statusUpdate\ndata: {\"jobId\":\"42\",\"status\":\"pending\"}\n\n\
                    event: statusUpdate\ndata: {\"jobId\":\"42\",\"status\":\"completed\"}\n\n";
        Mock::given(method("GET"))
            .and(path("/events/42"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let mut sub = source(&server).subscribe(&JobId::from("42"));
        assert_eq!(sub.next_event().await, Some(SourceEvent::Connected));
        assert_eq!(
            sub.next_event().await,
            Some(SourceEvent::Status(StatusEvent {
                job_id: JobId::from("42"),
                status: Status::Pending,
            }))
        );
        assert_eq!(
            sub.next_event().await,
            Some(SourceEvent::Status(StatusEvent {
                job_id: JobId::from("42"),
                status: Status::Completed,
            }))
        );
        // The body ends, which the server side reports as a lost connection.
        assert!(matches!(
            sub.next_event().await,
            Some(SourceEvent::ConnectionError(_))
        ));
        sub.close();
    }

    #[tokio::test]
    async fn subscribe_rejected_stream_reports_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events/42"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut sub = source(&server).subscribe(&JobId::from("42"));
        match sub.next_event().await {
            Some(SourceEvent::ConnectionError(message)) => assert!(message.contains("503")),
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[test]
    fn status_frame_without_job_id_uses_subscribed_job() {
        let event = translate_frame(&JobId::from("5"), frame("statusUpdate", r#"{"status":"error"}"#));
        assert_eq!(
            event,
            Some(SourceEvent::Status(StatusEvent {
                job_id: JobId::from("5"),
                status: Status::Error,
            }))
        );
    }

    #[test]
    fn malformed_status_frame_is_protocol_error() {
        let subscribed = JobId::from("5");
        assert!(matches!(
            translate_frame(&subscribed, frame("statusUpdate", "not json")),
            Some(SourceEvent::ProtocolError(_))
        ));
        assert!(matches!(
            translate_frame(&subscribed, frame("statusUpdate", r#"{"status":"weird"}"#)),
            Some(SourceEvent::ProtocolError(_))
        ));
    }

    #[test]
    fn error_frame_carries_message() {
        let event = translate_frame(&JobId::from("5"), frame("error", r#"{"message":"overloaded"}"#));
        assert_eq!(event, Some(SourceEvent::ServerError("overloaded".into())));
    }

    #[test]
    fn unknown_frame_is_ignored() {
        assert_eq!(translate_frame(&JobId::from("5"), frame("ping", "{}")), None);
    }
}
