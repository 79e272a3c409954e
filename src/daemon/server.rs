use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{Days, NaiveDate};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    clients::{Connection, Subscriber},
    tracker::{command::Command, state::Snapshot},
};

use super::{engine::PunchClock, storage::daily_store::DailyTotalsStore};

const DEFAULT_TOTALS_DAYS: u32 = 7;
const MAX_TOTALS_DAYS: u32 = 31;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PunchClock>,
    pub store: Option<Arc<dyn DailyTotalsStore>>,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(current_snapshot).post(run_command))
        .route("/ws", get(websocket))
        .route("/totals", get(daily_totals))
        .with_state(state)
}

/// Serves until the shutdown token is cancelled. The token is cancelled on return either way, so
/// a failing server brings the rest of the daemon down with it.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    info!("Listening on http://{}", listener.local_addr()?);

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    shutdown.cancel();

    result.context("Server failed")?;
    info!("Server stopped");
    Ok(())
}

fn json_response(status: StatusCode, snapshot: &Snapshot) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        snapshot.to_json(),
    )
        .into_response()
}

async fn current_snapshot(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, &state.engine.snapshot())
}

/// The current state is returned even for requests that can't be parsed.
async fn run_command(State(state): State<AppState>, body: String) -> Response {
    match Command::parse(&body) {
        Ok(command) => {
            info!(?command, "HTTP command received");
            json_response(StatusCode::OK, &state.engine.handle(&command))
        }
        Err(e) => {
            warn!("Malformed command {body:?}: {e}");
            json_response(StatusCode::BAD_REQUEST, &state.engine.snapshot())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TotalsQuery {
    date: Option<String>,
    n: Option<String>,
}

/// Resolves the inclusive date range of a totals request ending at `today` by default.
fn totals_range(query: &TotalsQuery, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let end = match query.date.as_deref() {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .with_context(|| format!("Invalid date {date:?}"))?,
        None => today,
    };
    let days = match query.n.as_deref() {
        Some(n) => n
            .parse::<u32>()
            .with_context(|| format!("Invalid number of days {n:?}"))?,
        None => DEFAULT_TOTALS_DAYS,
    };
    anyhow::ensure!(
        (1..=MAX_TOTALS_DAYS).contains(&days),
        "Number of days must be between 1 and {MAX_TOTALS_DAYS}"
    );
    let start = end
        .checked_sub_days(Days::new(u64::from(days - 1)))
        .context("Date range out of bounds")?;
    Ok((start, end))
}

async fn daily_totals(State(state): State<AppState>, Query(query): Query<TotalsQuery>) -> Response {
    let Some(store) = state.store else {
        return (StatusCode::NOT_FOUND, "Persistence is disabled").into_response();
    };

    let today = state.engine.tracker().clock().now().date_naive();
    let (start, end) = match totals_range(&query, today) {
        Ok(range) => range,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("{e:#}")).into_response(),
    };

    let rows = match tokio::task::spawn_blocking(move || store.read_range(start, end)).await {
        Ok(rows) => rows,
        Err(e) => Err(e.into()),
    };
    match rows {
        Ok(rows) => rows
            .iter()
            .map(|row| format!("{row}\n"))
            .collect::<String>()
            .into_response(),
        Err(e) => {
            warn!("Failed to read the daily totals: {e:?}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read the daily totals").into_response()
        }
    }
}

/// Write half of an upgraded websocket.
struct WebSocketConnection(SplitSink<WebSocket, Message>);

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, text: &str) -> Result<()> {
        self.0.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }
}

/// Unregisters the subscriber however the socket loop ends.
struct Subscription {
    engine: Arc<PunchClock>,
    subscriber: Arc<Subscriber>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.engine.unsubscribe(&self.subscriber);
    }
}

async fn websocket(upgrade: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let subscription = Subscription {
        subscriber: state.engine.subscribe(Box::new(WebSocketConnection(sink))),
        engine: state.engine.clone(),
    };
    let span = info_span!("client", id = subscription.subscriber.id());

    async {
        loop {
            let message = tokio::select! {
                _ = state.shutdown.cancelled() => {
                    debug!("Shutting down, closing the websocket");
                    break;
                }
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => match Command::parse(text.as_str()) {
                    Ok(command) => {
                        info!(?command, "Websocket command received");
                        state.engine.handle(&command);
                    }
                    Err(e) => info!("Malformed websocket command, ignoring: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Websocket closed");
                    break;
                }
                Some(Ok(_)) => (),
                Some(Err(e)) => {
                    debug!("Websocket read error, closing: {e}");
                    break;
                }
            }
        }
    }
    .instrument(span)
    .await;

    drop(subscription);
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use axum::{
        body::to_bytes,
        extract::{Query, State},
        http::StatusCode,
        response::Response,
    };
    use chrono::{Local, NaiveDate, TimeDelta, TimeZone};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        time::timeout,
    };
    use futures::{SinkExt, Stream, StreamExt};
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{Error as WsError, Message},
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            engine::PunchClock,
            storage::daily_store::{DailyTotalsStore, SqliteDailyStore},
        },
        tracker::Tracker,
        utils::{clock::ManualClock, logging::TEST_LOGGING},
    };

    use super::{
        current_snapshot, daily_totals, run_command, serve, totals_range, AppState, TotalsQuery,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup(store: Option<Arc<dyn DailyTotalsStore>>) -> (Arc<ManualClock>, AppState) {
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap(),
        ));
        let engine = Arc::new(PunchClock::new(Arc::new(Tracker::new(clock.clone()))));
        let state = AppState {
            engine,
            store,
            shutdown: CancellationToken::new(),
        };
        (clock, state)
    }

    async fn body(response: Response) -> Result<String> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    #[tokio::test]
    async fn test_post_then_get() -> Result<()> {
        *TEST_LOGGING;
        let (clock, state) = setup(None);

        let response = run_command(State(state.clone()), r#"{"Mode": "work"}"#.into()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body(response).await?,
            r#"{"mode":"work","work":0.00,"rest":0.00,"modeStart":0}"#
        );

        clock.advance(TimeDelta::seconds(10));
        let response = current_snapshot(State(state)).await;
        assert_eq!(
            body(response).await?,
            r#"{"mode":"work","work":10.00,"rest":0.00,"modeStart":10000}"#
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_post_returns_current_state() -> Result<()> {
        *TEST_LOGGING;
        let (_clock, state) = setup(None);
        state.engine.tracker().change_mode("rest");

        let response = run_command(State(state), r#"{"Mode": "work", "Extra": 1}"#.into()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body(response).await?,
            r#"{"mode":"rest","work":0.00,"rest":0.00,"modeStart":0}"#
        );
        Ok(())
    }

    #[test]
    fn test_totals_range() -> Result<()> {
        let today = date(2025, 6, 3);
        assert_eq!(
            totals_range(&TotalsQuery::default(), today)?,
            (date(2025, 5, 28), today)
        );

        let query = TotalsQuery {
            date: Some("2025-05-31".into()),
            n: Some("1".into()),
        };
        assert_eq!(totals_range(&query, today)?, (date(2025, 5, 31), date(2025, 5, 31)));

        for (date, n) in [(None, Some("0")), (None, Some("32")), (Some("31.05.2025"), None)] {
            let query = TotalsQuery {
                date: date.map(Into::into),
                n: n.map(Into::into),
            };
            assert!(totals_range(&query, today).is_err());
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_totals() -> Result<()> {
        *TEST_LOGGING;
        let store = Arc::new(SqliteDailyStore::in_memory()?);
        store.upsert_if_different(date(2025, 6, 1), TimeDelta::seconds(3600), TimeDelta::zero())?;
        store.upsert_if_different(date(2025, 6, 2), TimeDelta::seconds(60), TimeDelta::seconds(5))?;
        let (_clock, state) = setup(Some(store as Arc<dyn DailyTotalsStore>));

        let response = daily_totals(State(state.clone()), Query(TotalsQuery::default())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body(response).await?,
            "2025-06-02 60.00 5.00\n2025-06-01 3600.00 0.00\n"
        );

        let query = TotalsQuery {
            date: None,
            n: Some("x".into()),
        };
        let response = daily_totals(State(state), Query(query)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn test_totals_without_store() {
        *TEST_LOGGING;
        let (_clock, state) = setup(None);
        let response = daily_totals(State(state), Query(TotalsQuery::default())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() -> Result<()> {
        *TEST_LOGGING;
        let (_clock, state) = setup(None);
        let shutdown = state.shutdown.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let server = tokio::spawn(serve(listener, state));

        let request_body = r#"{"Work": "+1m5s"}"#;
        let mut stream = TcpStream::connect(address).await?;
        stream
            .write_all(
                format!(
                    "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{request_body}",
                    request_body.len()
                )
                .as_bytes(),
            )
            .await?;
        let mut response = String::new();
        timeout(Duration::from_secs(5), stream.read_to_string(&mut response)).await??;

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with(r#"{"mode":"off","work":65.00,"rest":0.00,"modeStart":0}"#));

        shutdown.cancel();
        timeout(Duration::from_secs(5), server).await???;
        Ok(())
    }

    async fn next_text<S>(socket: &mut S) -> Result<String>
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            match timeout(Duration::from_secs(5), socket.next()).await? {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(_)) => continue,
                other => anyhow::bail!("Unexpected websocket event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_session() -> Result<()> {
        *TEST_LOGGING;
        let (clock, state) = setup(None);
        let engine = state.engine.clone();
        let shutdown = state.shutdown.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let server = tokio::spawn(serve(listener, state));

        let (mut socket, _) = connect_async(format!("ws://{address}/ws")).await?;

        assert_eq!(
            next_text(&mut socket).await?,
            r#"{"mode":"off","work":0.00,"rest":0.00,"modeStart":0}"#
        );
        assert_eq!(engine.clients().len(), 1);

        clock.advance(TimeDelta::seconds(3));
        socket.send(Message::Text(r#"{"Mode": "rest"}"#.into())).await?;
        assert_eq!(
            next_text(&mut socket).await?,
            r#"{"mode":"rest","work":0.00,"rest":0.00,"modeStart":0}"#
        );

        // Malformed frames are ignored and the session stays open.
        socket.send(Message::Text("not json".into())).await?;
        socket.send(Message::Text(r#"{"Work": "+10s"}"#.into())).await?;
        assert_eq!(
            next_text(&mut socket).await?,
            r#"{"mode":"rest","work":10.00,"rest":0.00,"modeStart":0}"#
        );

        socket.close(None).await?;
        timeout(Duration::from_secs(5), async {
            while !engine.clients().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;

        shutdown.cancel();
        timeout(Duration::from_secs(5), server).await???;
        Ok(())
    }
}
