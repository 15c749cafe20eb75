use crate::pipeline::live::run_live_session;
use crate::pipeline::{ChannelSource, FrameSource, PrimedSource};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use common::crowd::{ClientFrame, ErrorMessage, LiveFrameMessage, LiveSource};
use common::validation::validate_uri;
use common::video::{decode_base64_image, decode_image, FrameReader};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use image::RgbImage;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Client frames buffered ahead of the pipeline.
const CLIENT_FRAME_BUFFER: usize = 2;

/// How long a server-side source gets to deliver its first frame.
const SOURCE_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_error(sender: &mut SplitSink<WebSocket, Message>, message: &str) {
    if let Ok(json) = serde_json::to_string(&ErrorMessage::new(message)) {
        let _ = sender.send(Message::Text(json)).await;
    }
}

/// Wait for the handshake and open the requested source. On failure the
/// returned text is sent to the client.
async fn open_source(
    receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Result<Option<(Box<dyn FrameSource>, Option<mpsc::Sender<RgbImage>>)>, &'static str> {
    let text = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(Message::Binary(_))) => return Err("Invalid source specified."),
            Some(Err(e)) => {
                debug!(error = %e, "websocket closed before handshake");
                return Ok(None);
            }
        }
    };

    let source: LiveSource = serde_json::from_str(&text).map_err(|_| "Invalid source specified.")?;
    let config = state.config();
    match source {
        LiveSource::Webcam => {
            info!(device = %config.webcam_device, "opening webcam");
            let opened = match FrameReader::open_device(
                &config.webcam_device,
                config.webcam_width,
                config.webcam_height,
            ) {
                Ok(reader) => PrimedSource::open(reader, SOURCE_OPEN_TIMEOUT).await,
                Err(e) => Err(e),
            };
            let source = opened.map_err(|e| {
                error!(error = %format!("{:#}", e), "failed to open webcam");
                "Could not open webcam."
            })?;
            Ok(Some((Box::new(source), None)))
        }
        LiveSource::Stream { url } => {
            validate_uri(&url, "url").map_err(|_| "Invalid stream URL.")?;
            info!(url = %url, "opening stream");
            let opened = match FrameReader::open_stream(&url, config.webcam_width, config.webcam_height) {
                Ok(reader) => PrimedSource::open(reader, SOURCE_OPEN_TIMEOUT).await,
                Err(e) => Err(e),
            };
            let source = opened.map_err(|e| {
                error!(error = %format!("{:#}", e), "failed to open stream");
                "Could not open stream."
            })?;
            Ok(Some((Box::new(source), None)))
        }
        LiveSource::Client => {
            let (tx, source) = ChannelSource::channel(CLIENT_FRAME_BUFFER);
            Ok(Some((Box::new(source), Some(tx))))
        }
    }
}

fn decode_client_frame(message: Message) -> Option<anyhow::Result<RgbImage>> {
    match message {
        Message::Text(text) => Some(
            serde_json::from_str::<ClientFrame>(&text)
                .map_err(anyhow::Error::from)
                .and_then(|f| decode_base64_image(&f.frame)),
        ),
        Message::Binary(bytes) => Some(decode_image(&bytes)),
        _ => None,
    }
}

/// Read the client side until it closes: forward pushed frames when the
/// session is client-fed, then cancel the session.
async fn read_client(
    mut receiver: SplitStream<WebSocket>,
    frames: Option<mpsc::Sender<RgbImage>>,
    cancel: CancellationToken,
) {
    while let Some(Ok(message)) = receiver.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
        let Some(frames) = &frames else {
            continue;
        };
        match decode_client_frame(message) {
            Some(Ok(frame)) => {
                if frames.send(frame).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => warn!(error = %e, "dropping undecodable client frame"),
            None => {}
        }
    }
    info!("WebSocket connection closed by client");
    cancel.cancel();
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().simple().to_string();
    let (mut sender, mut receiver) = socket.split();

    let (mut source, frames) = match open_source(&mut receiver, &state).await {
        Ok(Some(opened)) => opened,
        Ok(None) => return,
        Err(message) => {
            send_error(&mut sender, message).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let cancel = state.register_live_session(&session_id).await;
    let reader = tokio::spawn(read_client(receiver, frames, cancel.clone()));

    let (out_tx, mut out_rx) = mpsc::channel::<LiveFrameMessage>(1);
    let pipeline = {
        let detector = state.detector();
        let analytics = state.config().analytics.clone();
        let cancel = cancel.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            run_live_session(&session_id, detector, analytics, source.as_mut(), out_tx, cancel).await
        })
    };

    while let Some(message) = out_rx.recv().await {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to serialise live frame");
                break;
            }
        };
        if sender.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
    drop(out_rx);

    match pipeline.await {
        Ok(Ok(stats)) => info!(session_id = %session_id, frames = stats.frames, end = ?stats.end, "live session ended"),
        Ok(Err(e)) => {
            error!(session_id = %session_id, error = %format!("{:#}", e), "live session failed");
            send_error(&mut sender, "An internal error occurred.").await;
        }
        Err(e) => error!(session_id = %session_id, error = %e, "live session task panicked"),
    }

    reader.abort();
    state.unregister_live_session(&session_id).await;
    let _ = sender.send(Message::Close(None)).await;
    info!(session_id = %session_id, "WebSocket resources cleaned up");
}
