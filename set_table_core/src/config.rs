use crate::card::ClassicRules;
use crate::error::GameError;
use crate::player::PlayerId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 一局游戏的静态配置，运行期间只读
///
/// 所有时间字段的单位都是毫秒，方便直接写在 JSON 配置文件里。
/// 缺省的字段使用 [`Config::default`] 中的值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub table_size: usize,   // 牌桌格子数 (3 行 x 4 列)
    pub feature_count: usize,
    pub feature_size: usize,
    pub deck_size: usize,    // 牌组张数，不能超过 feature_size^feature_count
    pub human_players: usize,
    pub computer_players: usize,
    pub player_names: Vec<String>,
    pub turn_timeout_millis: u64,  // 每轮时长，到时后重新洗牌
    pub turn_timeout_warning_millis: u64,  // 剩余时间低于该值时进入警告模式
    pub point_freeze_millis: u64,
    pub penalty_freeze_millis: u64,
    pub table_delay_millis: u64,   // 每次放牌/收牌的人为延迟
    pub computer_key_delay_millis: u64,
    pub hints: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_size: 12,
            feature_count: 4,
            feature_size: 3,
            deck_size: 81,
            human_players: 2,
            computer_players: 0,
            player_names: Vec::new(),
            turn_timeout_millis: 60_000,
            turn_timeout_warning_millis: 10_000,
            point_freeze_millis: 1_000,
            penalty_freeze_millis: 3_000,
            table_delay_millis: 100,
            computer_key_delay_millis: 10,
            hints: false,
        }
    }
}

impl Config {
    /// 从 JSON 文件读取配置并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GameError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// 没有给出 `deck_size` 时使用特征设置能表示的全部牌
    pub fn from_json(text: &str) -> Result<Self, GameError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let derive_deck = value.get("deck_size").is_none();
        let mut config: Config = serde_json::from_value(value)?;
        if derive_deck {
            config.deck_size = config.full_deck()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GameError> {
        let rules = self.rules();
        if self.table_size == 0 {
            return Err(GameError::InvalidConfig("table_size 必须大于 0".to_string()));
        }
        if self.feature_count == 0 || self.feature_size < 2 {
            return Err(GameError::InvalidConfig(format!("非法的特征设置: {}", rules)));
        }
        if self.deck_size > self.full_deck()? {
            return Err(GameError::InvalidConfig(format!(
                "deck_size {} 超过了 {} 能表示的牌数",
                self.deck_size, rules
            )));
        }
        if self.players() == 0 {
            return Err(GameError::InvalidConfig("至少需要一名玩家".to_string()));
        }
        if self.turn_timeout_millis == 0 {
            return Err(GameError::InvalidConfig("turn_timeout_millis 必须大于 0".to_string()));
        }
        // 为 0 时电脑玩家会在没有牌可按时空转
        if self.computer_key_delay_millis == 0 {
            return Err(GameError::InvalidConfig("computer_key_delay_millis 必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 特征设置能表示的全部牌数
    fn full_deck(&self) -> Result<usize, GameError> {
        let rules = self.rules();
        rules
            .deck_size()
            .ok_or_else(|| GameError::InvalidConfig(format!("特征设置能表示的牌数过多: {}", rules)))
    }

    pub fn players(&self) -> usize {
        self.human_players + self.computer_players
    }

    /// 玩家编号 [0, human_players) 是真人，其后是电脑
    pub fn is_human(&self, player: PlayerId) -> bool {
        player < self.human_players
    }

    pub fn player_name(&self, player: PlayerId) -> String {
        self.player_names
            .get(player)
            .cloned()
            .unwrap_or_else(|| format!("Player {}", player + 1))
    }

    pub fn rules(&self) -> ClassicRules {
        ClassicRules::new(self.feature_count, self.feature_size)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_millis)
    }

    pub fn turn_timeout_warning(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_warning_millis)
    }

    pub fn point_freeze(&self) -> Duration {
        Duration::from_millis(self.point_freeze_millis)
    }

    pub fn penalty_freeze(&self) -> Duration {
        Duration::from_millis(self.penalty_freeze_millis)
    }

    pub fn table_delay(&self) -> Duration {
        Duration::from_millis(self.table_delay_millis)
    }

    pub fn computer_key_delay(&self) -> Duration {
        Duration::from_millis(self.computer_key_delay_millis)
    }
}
