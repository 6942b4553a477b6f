//! # 找组合 (Set) 游戏核心逻辑库
//!
//! 这个 `core` crate 包含了实时多人找组合游戏的并发核心:
//! 共享牌桌、每个玩家一个线程的玩家 actor、负责发牌和判定的庄家 actor，
//! 以及客户端-服务器通信消息的定义。
//! 它与具体的界面和网络实现解耦，界面只通过 [`UserInterface`] 接收通知，
//! 组合是否合法由可替换的 [`SetOracle`] 判定。

mod card;
mod claims;
mod config;
mod dealer;
mod error;
mod game;
mod message;
mod player;
mod table;
mod ui;

pub use card::*;

pub use claims::*;

pub use config::*;

pub use dealer::*;

pub use error::*;

pub use game::*;

pub use message::*;

pub use player::*;

pub use table::*;

pub use ui::*;
