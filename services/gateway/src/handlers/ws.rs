use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{future, SinkExt, StreamExt};
use tally::{relay, RelayEnd, Subscription};
use tracing::{debug, info};

/// Live totals feed. The subscription is taken before the upgrade, so every
/// vote accepted after this request arrives reaches the client.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let subscription = state.hub.subscribe(state.channel());
    ws.on_upgrade(move |socket| handle_socket(socket, subscription))
}

async fn handle_socket(socket: WebSocket, subscription: Subscription) {
    let channel = subscription.channel().to_string();
    info!(%channel, "Live subscriber connected");

    let (sink, mut inbound) = socket.split();
    let sink = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))));

    // Inbound frames are ignored; the stream only tells us when the client goes away.
    let client_gone = async {
        while let Some(Ok(msg)) = inbound.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    };

    tokio::select! {
        end = relay(subscription, sink) => match end {
            RelayEnd::HubClosed => debug!(%channel, "Hub closed, ending relay"),
            RelayEnd::Transport(failure) => debug!(%channel, %failure, "Relay transport lost"),
        },
        _ = client_gone => debug!(%channel, "Client disconnected"),
    }

    info!(%channel, "Live subscriber disconnected");
}
