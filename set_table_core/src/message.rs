use crate::card::{ClassicRules, Slot};
use crate::player::PlayerId;
use crate::ui::UiEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RoomId = Uuid;
pub type ConnectionId = Uuid;

// --- 客户端 -> 服务器 的消息 ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    // --- 房间管理消息 ---
    /// 创建一个新房间，创建者成为房主并坐在 0 号座位
    CreateRoom { nickname: String },
    /// 加入一个还没开始游戏的房间
    JoinRoom { room_id: RoomId, nickname: String },

    // --- 游戏内消息 ---
    /// 房主开始游戏，可以补充若干电脑玩家
    StartGame { computer_players: usize },
    /// 按下牌桌上的一个格子
    KeyPressed { slot: Slot },
    /// 房主提前结束游戏
    StopGame,
}

// --- 服务器 -> 客户端 的消息 ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// 成功加入或创建房间后，私密地发给该玩家
    RoomJoined {
        room_id: RoomId,
        your_seat: PlayerId,
        host: PlayerId,
        seats: Vec<SeatInfo>,
    },
    PlayerJoined { seat: PlayerId, nickname: String },
    PlayerLeft { seat: PlayerId },

    /// 游戏开始，`players` 包含电脑玩家，`rules` 用来解码牌面
    GameStarted { table_size: usize, rules: ClassicRules, players: Vec<SeatInfo> },
    /// 牌局中的界面通知，原样转发给房间里的每个连接
    Ui(UiEvent),
    GameOver { winners: Vec<PlayerId> },

    Info { message: String },
    Error { message: String },
}

/// 座位信息
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SeatInfo {
    pub seat: PlayerId,
    pub nickname: String,
    pub human: bool,
}

impl From<UiEvent> for ServerMessage {
    fn from(event: UiEvent) -> Self {
        ServerMessage::Ui(event)
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        ServerMessage::Info { message: message.into() }
    }
}
