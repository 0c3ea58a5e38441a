//! WebSocket upgrade handler and per-connection session

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{Audience, Outbound, PlayerInput, WorldInput};
use crate::store::{Account, CharacterRecord};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

type WsSink = futures::stream::SplitSink<WebSocket, Message>;
type WsStream = futures::stream::SplitStream<WebSocket>;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(player_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Connected {
        player_id: session_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(player_id = %session_id, error = %e, "Failed to send welcome");
        return;
    }

    // Subscribe before login so nothing between join and game state is missed
    let world_rx = state.world.subscribe();
    let (direct_tx, direct_rx) = mpsc::unbounded_channel();

    let username = run_session(session_id, &state, ws_sink, ws_stream, world_rx, direct_tx, direct_rx).await;

    if let Some(username) = username {
        let _ = state
            .world
            .input_tx
            .send(PlayerInput {
                player_id: session_id,
                input: WorldInput::Leave,
                received_at: unix_millis(),
            })
            .await;
        state.release_username(&username, session_id);
    }

    info!(player_id = %session_id, "WebSocket connection closed");
}

/// Run the session with read/write split. Returns the logged-in username, if any.
async fn run_session(
    session_id: Uuid,
    state: &AppState,
    ws_sink: WsSink,
    mut ws_stream: WsStream,
    world_rx: broadcast::Receiver<Outbound>,
    direct_tx: mpsc::UnboundedSender<ServerMsg>,
    direct_rx: mpsc::UnboundedReceiver<ServerMsg>,
) -> Option<String> {
    let rate_limiter = SessionRateLimiter::new();
    let writer_handle = tokio::spawn(run_writer(session_id, ws_sink, world_rx, direct_rx));
    let mut username: Option<String> = None;

    // Reader loop: WebSocket -> world task
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(player_id = %session_id, "Rate limited client message");
                    continue;
                }

                let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(player_id = %session_id, error = %e, "Failed to parse client message");
                        continue;
                    }
                };

                match client_msg {
                    ClientMsg::Ping { t } => {
                        let _ = direct_tx.send(ServerMsg::Pong { t });
                    }
                    ClientMsg::Authenticate {
                        username: name,
                        password,
                        is_guest,
                    } => {
                        if username.is_some() {
                            let _ = direct_tx.send(error_msg("already_authenticated", "Already logged in"));
                            continue;
                        }
                        if !rate_limiter.check_auth() {
                            let _ = direct_tx.send(auth_failure("Too many login attempts"));
                            continue;
                        }
                        match login(state, session_id, &name, &password, is_guest).await {
                            Ok((account, character)) => {
                                let _ = direct_tx.send(ServerMsg::AuthResponse {
                                    success: true,
                                    username: Some(account.username.clone()),
                                    is_admin: account.is_admin,
                                    message: None,
                                    character: character.clone(),
                                });
                                let join = WorldInput::Join {
                                    username: account.username.clone(),
                                    is_admin: account.is_admin,
                                    is_guest: account.is_guest,
                                    character,
                                };
                                username = Some(account.username);
                                if !forward(state, session_id, join).await {
                                    break;
                                }
                            }
                            Err(message) => {
                                info!(player_id = %session_id, reason = %message, "Login refused");
                                let _ = direct_tx.send(auth_failure(&message));
                            }
                        }
                    }
                    msg if username.is_none() => {
                        debug!(player_id = %session_id, event = ?msg, "Message before login");
                        let _ = direct_tx.send(error_msg("not_authenticated", "Log in first"));
                    }
                    msg => {
                        if !forward(state, session_id, WorldInput::Client(msg)).await {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %session_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %session_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
    username
}

/// Writer task: direct replies and filtered world broadcasts -> WebSocket
async fn run_writer(
    session_id: Uuid,
    mut ws_sink: WsSink,
    mut world_rx: broadcast::Receiver<Outbound>,
    mut direct_rx: mpsc::UnboundedReceiver<ServerMsg>,
) {
    let mut filter = DeliveryFilter::new(session_id);
    loop {
        let msg = tokio::select! {
            direct = direct_rx.recv() => match direct {
                Some(msg) => msg,
                None => break,
            },
            outbound = world_rx.recv() => match outbound {
                Ok(outbound) => {
                    if !filter.admit(&outbound) {
                        continue;
                    }
                    outbound.msg
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        player_id = %session_id,
                        lagged_count = n,
                        "Client lagged, skipping {} world messages", n
                    );
                    // Continue - don't disconnect for lag
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(player_id = %session_id, "World channel closed");
                    break;
                }
            },
        };

        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(player_id = %session_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Decides which world broadcasts reach a session. Messages addressed to the
/// session always pass; shared traffic starts once its own game state arrives.
#[derive(Debug)]
pub struct DeliveryFilter {
    session_id: Uuid,
    in_world: bool,
}

impl DeliveryFilter {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            in_world: false,
        }
    }

    pub fn admit(&mut self, outbound: &Outbound) -> bool {
        if !outbound.audience.includes(self.session_id) {
            return false;
        }
        if let ServerMsg::GameState { self_id, .. } = &outbound.msg {
            if *self_id == self.session_id {
                self.in_world = true;
            }
        }
        self.in_world || outbound.audience == Audience::Only(self.session_id)
    }
}

/// Authenticate, claim the username and load the saved character
async fn login(
    state: &AppState,
    session_id: Uuid,
    username: &str,
    password: &str,
    is_guest: bool,
) -> Result<(Account, Option<CharacterRecord>), String> {
    let account = state
        .accounts
        .authenticate(username, password, is_guest)
        .await
        .map_err(|e| e.to_string())?;

    if !state.claim_username(&account.username, session_id) {
        return Err("Already logged in elsewhere".to_string());
    }

    let character = if account.is_guest {
        None
    } else {
        state.characters.load(&account.username).await
    };

    info!(
        player_id = %session_id,
        username = %account.username,
        guest = account.is_guest,
        created = account.created,
        "Logged in"
    );
    Ok((account, character))
}

/// Send an input to the world task. False if the world is gone.
async fn forward(state: &AppState, session_id: Uuid, input: WorldInput) -> bool {
    let input = PlayerInput {
        player_id: session_id,
        input,
        received_at: unix_millis(),
    };
    if state.world.input_tx.send(input).await.is_err() {
        debug!(player_id = %session_id, "World input channel closed");
        return false;
    }
    true
}

fn auth_failure(message: &str) -> ServerMsg {
    ServerMsg::AuthResponse {
        success: false,
        username: None,
        is_admin: false,
        message: Some(message.to_string()),
        character: None,
    }
}

fn error_msg(code: &str, message: &str) -> ServerMsg {
    ServerMsg::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
