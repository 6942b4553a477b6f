use crate::card::{ClassicRules, SetOracle, Slot};
use crate::claims::ClaimQueue;
use crate::config::Config;
use crate::dealer::{Dealer, DealerHandle};
use crate::error::GameError;
use crate::player::{Player, PlayerHandle, PlayerId};
use crate::table::Table;
use crate::ui::UserInterface;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// 一局完整的游戏: 牌桌、请求队列、所有玩家和庄家
pub struct Game {
    dealer: Dealer,
    handle: GameHandle,
}

/// 从外部 (键盘、网络) 操作一局游戏的句柄
#[derive(Clone)]
pub struct GameHandle {
    players: Vec<PlayerHandle>,
    dealer: DealerHandle,
    table: Arc<Table>,
    table_size: usize,
}

impl Game {
    /// 校验配置并创建所有组件。真人玩家的编号排在电脑玩家之前。
    pub fn new(config: Config, ui: Arc<dyn UserInterface>, oracle: Arc<dyn SetOracle>) -> Result<Self, GameError> {
        config.validate()?;
        let config = Arc::new(config);
        let table = Arc::new(Table::new(&config, ui.clone(), oracle.clone()));
        let claims = Arc::new(ClaimQueue::new());

        let players: Vec<Player> = (0..config.players())
            .map(|id| Player::new(id, config.is_human(id), &config, table.clone(), claims.clone(), ui.clone()))
            .collect();
        info!(
            "创建牌局: {} 名真人玩家, {} 名电脑玩家, 牌组 {} 张",
            config.human_players, config.computer_players, config.deck_size
        );

        let table_size = config.table_size;
        let dealer = Dealer::new(config, table.clone(), claims, oracle, ui, players);
        let handle = GameHandle {
            players: dealer.players().to_vec(),
            dealer: dealer.handle(),
            table,
            table_size,
        };
        Ok(Self { dealer, handle })
    }

    /// 使用经典规则 (特征数和取值数来自配置)
    pub fn with_classic_rules(config: Config, ui: Arc<dyn UserInterface>) -> Result<Self, GameError> {
        let rules: ClassicRules = config.rules();
        Self::new(config, ui, Arc::new(rules))
    }

    pub fn handle(&self) -> GameHandle {
        self.handle.clone()
    }

    /// 在当前线程运行到游戏结束，返回赢家
    pub fn run(self) -> Vec<PlayerId> {
        self.dealer.run()
    }

    /// 在名为 `dealer` 的线程中运行
    pub fn spawn(self) -> Result<JoinHandle<Vec<PlayerId>>, GameError> {
        thread::Builder::new()
            .name("dealer".to_string())
            .spawn(move || self.run())
            .map_err(|source| GameError::Spawn { name: "dealer".to_string(), source })
    }
}

impl GameHandle {
    /// 把一次按键交给玩家。输入被丢弃时返回 `Ok(false)`。
    pub fn key_pressed(&self, player: PlayerId, slot: Slot) -> Result<bool, GameError> {
        if slot >= self.table_size {
            warn!("玩家 {} 按下了不存在的格子 {}", player, slot);
            return Ok(false);
        }
        Ok(self.player(player)?.key_pressed(slot))
    }

    pub fn player(&self, player: PlayerId) -> Result<&PlayerHandle, GameError> {
        self.players.get(player).ok_or(GameError::UnknownPlayer(player))
    }

    pub fn players(&self) -> &[PlayerHandle] {
        &self.players
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// 所有玩家当前的分数，按编号排列
    pub fn scores(&self) -> Vec<u32> {
        self.players.iter().map(PlayerHandle::score).collect()
    }

    pub fn terminate(&self) {
        info!("收到终止信号");
        self.dealer.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.dealer.is_terminated()
    }

    pub fn table(&self) -> &Table {
        &self.table
    }
}
