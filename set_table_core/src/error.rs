use crate::player::PlayerId;
use thiserror::Error;

/// 核心库对外暴露的错误类型
///
/// 只有构造阶段 (读取配置、创建牌局、启动线程) 会返回错误；
/// 各个 actor 的主循环内部不会产生错误，失败都体现为状态转换。
#[derive(Debug, Error)]
pub enum GameError {
    #[error("读取配置失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("解析配置失败: {0}")]
    Config(#[from] serde_json::Error),
    #[error("配置无效: {0}")]
    InvalidConfig(String),
    #[error("无法启动线程 {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("玩家 {0} 不存在")]
    UnknownPlayer(PlayerId),
}
