use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures_util::{stream::StreamExt, SinkExt};
use parking_lot::Mutex as P_Mutex;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use set_table_core::{
    ClientMessage, Config, ConnectionId, Game, GameHandle, PlayerId, RoomId, SeatInfo, ServerMessage,
    TracingUi, UiEvent, UserInterface,
};

/// 一个房间最多补充的电脑玩家
const MAX_COMPUTER_PLAYERS: usize = 8;

// 服务器全局状态
struct AppState {
    rooms: DashMap<RoomId, Arc<Room>>,
    config: Config,  // 每局游戏的基础配置，玩家人数在开局时填入
}

// 单个房间的状态
// 重要‼️：严格规定使用锁的顺序，避免死锁：
// connections -> lobby
struct Room {
    id: RoomId,
    lobby: P_Mutex<Lobby>,
    // 将连接映射到具体的网络通道
    connections: RwLock<HashMap<ConnectionId, PlayerConnection>>,
}

struct Lobby {
    host: ConnectionId,
    seats: Vec<SeatInfo>,  // 真人座位，离开后保留，开局时按座位号成为玩家编号
    game: Option<GameHandle>,
}

// 玩家的网络连接信息
struct PlayerConnection {
    seat: PlayerId,
    // 用于向该玩家的 WebSocket 任务发送消息的通道
    sender: mpsc::Sender<ServerMessage>,
}

type SharedState = Arc<AppState>;

/// 把牌局的界面通知转成服务器消息，由房间的转发任务广播出去
/// 每条通知同时写进 debug 日志
struct BroadcastUi {
    sender: broadcast::Sender<ServerMessage>,
    log: TracingUi,
}

impl BroadcastUi {
    fn new(sender: broadcast::Sender<ServerMessage>) -> Self {
        Self { sender, log: TracingUi }
    }
}

impl UserInterface for BroadcastUi {
    fn dispatch(&self, event: UiEvent) {
        self.log.dispatch(event.clone());
        // 没有订阅者说明房间已经关闭，直接丢弃
        let _ = self.sender.send(event.into());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::var("SET_TABLE_CONFIG") {
        Ok(path) => {
            info!("读取配置文件 {}", path);
            Config::load(path)?
        }
        Err(_) => Config::default(),
    };
    let addr: SocketAddr = std::env::var("SET_TABLE_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:25917".to_string())
        .parse()?;

    let state = SharedState::new(AppState {
        rooms: DashMap::new(),
        config,
    });

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state);

    info!("服务器正在监听 {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

/// 处理 WebSocket 连接请求
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// 处理单个 WebSocket 连接的生命周期
async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();

    // 创建一个 MPSC 通道，用于从其他任务接收要发送的消息
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(256);

    // 启动一个新任务，专门负责将 MPSC 通道中的消息发送到 WebSocket
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let payload = match serde_json::to_string(&msg) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("序列化消息失败: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                // 发送失败，说明客户端已断开，退出任务
                break;
            }
        }
    });

    let connection_id = Uuid::new_v4();
    // 当前连接所在的房间，加入或创建房间后填充
    let mut room_context: Option<RoomId> = None;

    // 主循环，处理从客户端接收到的消息
    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Text(text) = msg {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle_client_message(client_msg, state.clone(), connection_id, &tx, &mut room_context).await;
                }
                Err(e) => {
                    warn!("解析消息失败: {}", e);
                    let _ = tx.send(ServerMessage::error("无法识别的消息")).await;
                }
            }
        }
    }

    // 客户端断开连接，执行清理工作
    if let Some(room_id) = room_context {
        handle_disconnect(state, room_id, connection_id).await;
    }
    info!("客户端连接 {} 关闭", connection_id);
}

/// 核心消息处理逻辑
async fn handle_client_message(
    msg: ClientMessage,
    state: SharedState,
    connection_id: ConnectionId,
    tx: &mpsc::Sender<ServerMessage>,
    context: &mut Option<RoomId>,
) {
    match msg {
        ClientMessage::CreateRoom { nickname } => {
            if context.is_some() {
                let _ = tx.send(ServerMessage::error("你已经在一个房间里了")).await;
                return;
            }

            let room_id = Uuid::new_v4();
            let seat = SeatInfo { seat: 0, nickname, human: true };
            let mut room = Room {
                id: room_id,
                lobby: P_Mutex::new(Lobby {
                    host: connection_id,
                    seats: vec![seat.clone()],
                    game: None,
                }),
                connections: RwLock::new(HashMap::new()),
            };
            room.connections.get_mut().insert(connection_id, PlayerConnection {
                seat: 0,
                sender: tx.clone(),
            });
            state.rooms.insert(room_id, Arc::new(room));

            info!("{} 创建了新房间 {}", seat.nickname, room_id);
            *context = Some(room_id);
            let _ = tx.send(ServerMessage::RoomJoined {
                room_id,
                your_seat: 0,
                host: 0,
                seats: vec![seat],
            }).await;
        }
        ClientMessage::JoinRoom { room_id, nickname } => {
            if context.is_some() {
                let _ = tx.send(ServerMessage::error("你已经在一个房间里了")).await;
                return;
            }

            let room = match state.rooms.get(&room_id) {
                Some(r) => r.clone(),
                None => {
                    let _ = tx.send(ServerMessage::error("房间不存在")).await;
                    return;
                }
            };

            let joined = {  // connections write lock
                let mut connections = room.connections.write().await;
                let admitted = {  // lobby lock
                    let mut lobby = room.lobby.lock();
                    if lobby.game.is_some() {
                        None
                    } else {
                        let seat = lobby.seats.len();
                        lobby.seats.push(SeatInfo { seat, nickname: nickname.clone(), human: true });
                        let host = connections.get(&lobby.host).map_or(0, |c| c.seat);
                        let joined = ServerMessage::RoomJoined {
                            room_id,
                            your_seat: seat,
                            host,
                            seats: lobby.seats.clone(),
                        };
                        Some((seat, joined))
                    }
                };
                match admitted {
                    None => None,
                    Some((seat, joined)) => {
                        connections.insert(connection_id, PlayerConnection {
                            seat,
                            sender: tx.clone(),
                        });
                        // 广播给房间内其他玩家
                        let join_msg = ServerMessage::PlayerJoined { seat, nickname: nickname.clone() };
                        broadcast(connections.iter(), &join_msg, Some(connection_id)).await;
                        Some(joined)
                    }
                }
            };
            let Some(joined) = joined else {
                let _ = tx.send(ServerMessage::error("游戏已经开始，无法加入")).await;
                return;
            };

            info!("{} 加入了房间 {}", nickname, room_id);
            *context = Some(room_id);
            let _ = tx.send(joined).await;
        }
        // ... 其他需要先进入房间才能执行的消息
        _ => {
            let Some(room_id) = *context else {
                let _ = tx.send(ServerMessage::error("请先加入或创建房间")).await;
                return;
            };
            let room = match state.rooms.get(&room_id) {
                None => {
                    let _ = tx.send(ServerMessage::error("房间不存在")).await;
                    return;
                }
                Some(r) => r.clone(),
            };

            let reply = match msg {
                ClientMessage::StartGame { computer_players } => {
                    start_game(&state, &room, connection_id, computer_players).await
                }
                ClientMessage::KeyPressed { slot } => {
                    let seat = room.connections.read().await.get(&connection_id).map(|c| c.seat);
                    let game = room.lobby.lock().game.clone();
                    match (seat, game) {
                        (Some(seat), Some(game)) => match game.key_pressed(seat, slot) {
                            Ok(_) => None,
                            Err(e) => Some(ServerMessage::error(e.to_string())),
                        },
                        _ => Some(ServerMessage::error("游戏还没有开始")),
                    }
                }
                ClientMessage::StopGame => {
                    let lobby = room.lobby.lock();
                    if lobby.host != connection_id {
                        Some(ServerMessage::error("只有房主可以结束游戏"))
                    } else if let Some(game) = &lobby.game {
                        info!("房主结束了房间 {} 的游戏", room.id);
                        game.terminate();
                        None
                    } else {
                        Some(ServerMessage::error("游戏还没有开始"))
                    }
                }
                ClientMessage::CreateRoom { .. } | ClientMessage::JoinRoom { .. } => {
                    Some(ServerMessage::error("你已经在一个房间里了"))
                }
            };

            // 错误消息只发给当前玩家
            if let Some(reply) = reply {
                let _ = tx.send(reply).await;
            }
        }
    }
}

/// 房主开局: 真人座位加上补充的电脑玩家组成一局游戏，在独立线程中运行
async fn start_game(
    state: &SharedState,
    room: &Arc<Room>,
    connection_id: ConnectionId,
    computer_players: usize,
) -> Option<ServerMessage> {
    if computer_players > MAX_COMPUTER_PLAYERS {
        return Some(ServerMessage::error(format!("电脑玩家最多 {} 名", MAX_COMPUTER_PLAYERS)));
    }

    let (sender, receiver) = broadcast::channel(1024);
    let started;
    let dealer;
    {  // lobby lock
        let mut lobby = room.lobby.lock();
        if lobby.host != connection_id {
            return Some(ServerMessage::error("只有房主可以开始游戏"));
        }
        if lobby.game.is_some() {
            return Some(ServerMessage::error("游戏已经在进行中"));
        }

        let humans = lobby.seats.len();
        let mut config = state.config.clone();
        config.human_players = humans;
        config.computer_players = computer_players;
        config.player_names = lobby.seats.iter().map(|s| s.nickname.clone()).collect();
        config.player_names.extend((0..computer_players).map(|n| format!("电脑 {}", n + 1)));

        let ui = Arc::new(BroadcastUi::new(sender.clone()));
        let game = match Game::with_classic_rules(config.clone(), ui) {
            Ok(game) => game,
            Err(e) => return Some(ServerMessage::error(e.to_string())),
        };
        let handle = game.handle();
        dealer = match game.spawn() {
            Ok(dealer) => dealer,
            Err(e) => return Some(ServerMessage::error(e.to_string())),
        };
        lobby.game = Some(handle);

        let players = (0..config.players())
            .map(|seat| SeatInfo { seat, nickname: config.player_name(seat), human: config.is_human(seat) })
            .collect();
        started = ServerMessage::GameStarted { table_size: config.table_size, rules: config.rules(), players };
    }

    info!("房间 {} 开始游戏，电脑玩家 {} 名", room.id, computer_players);
    broadcast(room.connections.read().await.iter(), &started, None).await;
    tokio::spawn(forward_ui(Arc::downgrade(room), receiver));

    // 等待庄家线程结束，然后宣布结果并允许再开一局
    let room = Arc::downgrade(room);
    tokio::task::spawn_blocking(move || {
        let winners = match dealer.join() {
            Ok(winners) => winners,
            Err(_) => {
                warn!("庄家线程异常退出");
                Vec::new()
            }
        };
        if let Some(room) = room.upgrade() {
            room.lobby.lock().game = None;
            info!("房间 {} 的游戏结束，赢家 {:?}", room.id, winners);
        }
        // 与界面通知走同一个通道，保证在它们之后到达
        let _ = sender.send(ServerMessage::GameOver { winners });
    });
    None
}

/// 把牌局的界面通知转发给房间里的每个连接，房间关闭或牌局结束后退出
async fn forward_ui(room: Weak<Room>, mut receiver: broadcast::Receiver<ServerMessage>) {
    loop {
        let msg = match receiver.recv().await {
            Ok(msg) => msg,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("转发任务落后，丢弃了 {} 条界面通知", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(room) = room.upgrade() else {
            break;
        };
        let game_over = matches!(msg, ServerMessage::GameOver { .. });
        broadcast(room.connections.read().await.iter(), &msg, None).await;
        if game_over {
            break;
        }
    }
}

/// 玩家断开连接后的处理
async fn handle_disconnect(state: SharedState, room_id: RoomId, connection_id: ConnectionId) {
    let room = match state.rooms.get(&room_id) {
        None => return,
        Some(r) => r.clone(),
    };

    let mut connections = room.connections.write().await;
    // 从连接映射中移除
    let Some(left) = connections.remove(&connection_id) else {
        return;
    };
    info!("座位 {} 从房间 {} 断开连接", left.seat, room_id);

    // 判断是否清空房间
    if connections.is_empty() {
        if let Some(game) = room.lobby.lock().game.take() {
            game.terminate();
        }
        state.rooms.remove(&room_id);
        info!("房间 {} 已空，已被移除", room_id);
        return;
    }

    broadcast(connections.iter(), &ServerMessage::PlayerLeft { seat: left.seat }, None).await;

    // 如果房主断开，转移房主权限
    let new_host = {
        let mut lobby = room.lobby.lock();
        if lobby.host != connection_id {
            None
        } else {
            connections.iter().min_by_key(|(_, c)| c.seat).map(|(&id, c)| {
                lobby.host = id;
                let nickname = lobby.seats.get(c.seat).map_or("未知玩家".to_string(), |s| s.nickname.clone());
                (c.seat, nickname)
            })
        }
    };
    if let Some((seat, nickname)) = new_host {
        let info_msg = ServerMessage::info(format!("房主已断开，新房主是 {}", nickname));
        broadcast(connections.iter(), &info_msg, None).await;
        info!("房间 {} 的房主已转移给座位 {}", room_id, seat);
    }
}

/// 向房间内所有连接广播消息
async fn broadcast(
    connections: impl Iterator<Item = (&ConnectionId, &PlayerConnection)>,
    message: &ServerMessage,
    exclude: Option<ConnectionId>,
) {
    for (connection_id, conn) in connections {
        if Some(*connection_id) == exclude {
            continue;
        }
        if conn.sender.send(message.clone()).await.is_err() {
            // 发送失败，说明该玩家也断开了，后续由其自己的 handle_socket 任务处理
            warn!("向座位 {} 发送消息失败（可能已断开）", conn.seat);
        }
    }
}
