//! WebSocket handlers streaming live snapshots to the presentation layer

use super::extractor::Principal;
use super::handlers::ApiState;
use crate::error::CrmError;
use crate::owner::OwnerId;
use crate::subscription::{Snapshot, SnapshotStream};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Collections that can be watched over `/ws/{collection}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsCollection {
    Templates,
    Contacts,
    Deals,
}

impl WsCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsCollection::Templates => "templates",
            WsCollection::Contacts => "contacts",
            WsCollection::Deals => "deals",
        }
    }
}

/// Frame sent to the client. An `error` frame is always the last one.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsFrame<'a, T> {
    Snapshot {
        collection: &'static str,
        version: u64,
        records: &'a [T],
        skipped: usize,
    },
    Error {
        collection: &'static str,
        kind: &'static str,
        message: String,
    },
}

impl<'a, T> WsFrame<'a, T> {
    fn snapshot(collection: WsCollection, snapshot: &'a Snapshot<T>) -> Self {
        WsFrame::Snapshot {
            collection: collection.as_str(),
            version: snapshot.version,
            records: &snapshot.records,
            skipped: snapshot.skipped,
        }
    }

    fn error(collection: WsCollection, err: &CrmError) -> Self {
        WsFrame::Error {
            collection: collection.as_str(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// WebSocket upgrade handler for `/ws/{collection}`
pub async fn ws_snapshots(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(collection): Path<WsCollection>,
    Principal(owner): Principal,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state, collection, owner))
}

async fn handle_ws(socket: WebSocket, state: ApiState, collection: WsCollection, owner: OwnerId) {
    debug!(collection = collection.as_str(), owner = %owner, "WebSocket snapshot client connected");
    match collection {
        WsCollection::Templates => {
            forward_snapshots(socket, collection, state.templates.snapshots(&owner)).await
        }
        WsCollection::Contacts => {
            forward_snapshots(socket, collection, state.contacts.snapshots(&owner)).await
        }
        WsCollection::Deals => {
            forward_snapshots(socket, collection, state.deals.snapshots(&owner)).await
        }
    }
}

/// Pump snapshots into the socket until either side ends.
///
/// Returning drops `stream`, which cancels the subscription.
async fn forward_snapshots<T: Serialize>(
    socket: WebSocket,
    collection: WsCollection,
    mut stream: SnapshotStream<T>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            item = stream.next() => {
                let (json, last) = match item {
                    Some(Ok(snapshot)) => {
                        (serde_json::to_string(&WsFrame::snapshot(collection, &snapshot)), false)
                    }
                    Some(Err(err)) => {
                        warn!(collection = collection.as_str(), error = %err, "Subscription failed");
                        (serde_json::to_string(&WsFrame::<T>::error(collection, &err)), true)
                    }
                    None => break,
                };
                match json {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            debug!("WebSocket send failed, client disconnected");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to serialize snapshot frame: {}", e);
                    }
                }
                if last {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if ws_sender.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!("Ping failed, client disconnected");
                    break;
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    stream.handle().cancel();
    debug!(collection = collection.as_str(), "WebSocket connection closed");
}
