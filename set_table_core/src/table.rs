use crate::card::{CardId, SetOracle, Slot, Triple};
use crate::config::Config;
use crate::player::PlayerId;
use crate::ui::{UiEvent, UserInterface};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// 牌桌的可变部分，始终在 `Table::state` 锁内访问
///
/// 不变式: `slot_to_card[s] == Some(c)` 当且仅当 `card_to_slot[c] == Some(s)`
struct TableState {
    slot_to_card: Vec<Option<CardId>>,
    card_to_slot: Vec<Option<Slot>>,
    // 庄家正在整理牌桌 (发牌、补牌、收牌)，玩家放/取标记必须等待
    dealer_busy: bool,
    closed: bool,
}

/// 所有玩家都能看到的共享牌桌
///
/// 牌的放置和移除只由庄家调用；玩家只能放置或移除自己的标记，
/// 而标记操作会在 `dealer_busy` 期间阻塞。
pub struct Table {
    state: Mutex<TableState>,
    changed: Condvar,
    ui: Arc<dyn UserInterface>,
    oracle: Arc<dyn SetOracle>,
    delay: Duration,
}

/// 庄家整理牌桌期间持有的守卫，析构时自动放开闸门
pub struct Restructure<'a> {
    table: &'a Table,
}

impl Drop for Restructure<'_> {
    fn drop(&mut self) {
        self.table.set_dealer_busy(false);
    }
}

impl Table {
    pub fn new(config: &Config, ui: Arc<dyn UserInterface>, oracle: Arc<dyn SetOracle>) -> Self {
        Self {
            state: Mutex::new(TableState {
                slot_to_card: vec![None; config.table_size],
                card_to_slot: vec![None; config.deck_size],
                dealer_busy: false,
                closed: false,
            }),
            changed: Condvar::new(),
            ui,
            oracle,
            delay: config.table_delay(),
        }
    }

    pub fn table_size(&self) -> usize {
        self.state.lock().slot_to_card.len()
    }

    // --- 庄家使用的牌操作 ---

    /// 把一张牌放到空格子上
    pub fn place_card(&self, card: CardId, slot: Slot) {
        {
            let mut state = self.state.lock();
            let free = matches!(state.slot_to_card.get(slot), Some(None))
                && matches!(state.card_to_slot.get(card), Some(None));
            if !free {
                warn!("无法把牌 {} 放到格子 {}: 格子或牌已被占用", card, slot);
                return;
            }
            state.card_to_slot[card] = Some(slot);
            state.slot_to_card[slot] = Some(card);
            self.ui.dispatch(UiEvent::PlaceCard { card, slot });
            self.changed.notify_all();
        }
        self.pause();
    }

    /// 移走格子上的牌，返回被移走的牌
    pub fn remove_card(&self, slot: Slot) -> Option<CardId> {
        let card = {
            let mut state = self.state.lock();
            let card = state.slot_to_card.get_mut(slot)?.take()?;
            state.card_to_slot[card] = None;
            self.ui.dispatch(UiEvent::RemoveCard { slot });
            self.changed.notify_all();
            card
        };
        self.pause();
        Some(card)
    }

    /// 进入整理状态，返回的守卫析构时结束整理
    pub fn restructure(&self) -> Restructure<'_> {
        self.set_dealer_busy(true);
        Restructure { table: self }
    }

    pub fn set_dealer_busy(&self, busy: bool) {
        let mut state = self.state.lock();
        state.dealer_busy = busy;
        self.changed.notify_all();
    }

    pub fn is_dealer_busy(&self) -> bool {
        self.state.lock().dealer_busy
    }

    /// 关闭牌桌: 唤醒所有等待闸门的玩家，之后的标记操作全部失败
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    // --- 玩家使用的标记操作 ---

    /// 在格子上放置玩家的标记，返回标记下面的牌。
    /// 庄家整理期间阻塞；格子为空或牌桌已关闭时返回 `None`。
    pub fn place_token(&self, player: PlayerId, slot: Slot) -> Option<CardId> {
        let mut state = self.state.lock();
        while state.dealer_busy && !state.closed {
            self.changed.wait(&mut state);
        }
        if state.closed {
            return None;
        }
        let card = state.slot_to_card.get(slot).copied().flatten()?;
        self.ui.dispatch(UiEvent::PlaceToken { player, slot });
        self.changed.notify_all();
        Some(card)
    }

    /// 移除玩家的标记。格子上的牌已经被移走时不通知界面。
    pub fn remove_token(&self, player: PlayerId, slot: Slot) -> bool {
        let mut state = self.state.lock();
        while state.dealer_busy && !state.closed {
            self.changed.wait(&mut state);
        }
        if state.closed {
            return false;
        }
        let occupied = state.slot_to_card.get(slot).copied().flatten().is_some();
        if occupied {
            self.ui.dispatch(UiEvent::RemoveToken { player, slot });
        }
        self.changed.notify_all();
        occupied
    }

    /// 清除若干格子上所有玩家的标记 (只影响界面)
    pub fn remove_tokens_at(&self, slots: &[Slot]) {
        let _state = self.state.lock();
        for &slot in slots {
            self.ui.dispatch(UiEvent::RemoveTokensAt { slot });
        }
    }

    pub fn remove_all_tokens(&self) {
        let _state = self.state.lock();
        self.ui.dispatch(UiEvent::RemoveAllTokens);
    }

    // --- 只读快照 ---

    pub fn card_at(&self, slot: Slot) -> Option<CardId> {
        self.state.lock().slot_to_card.get(slot).copied().flatten()
    }

    pub fn slot_of(&self, card: CardId) -> Option<Slot> {
        self.state.lock().card_to_slot.get(card).copied().flatten()
    }

    /// 三个格子上是否仍然是这三张牌
    pub fn holds(&self, slots: &[Slot; 3], cards: &Triple) -> bool {
        let state = self.state.lock();
        slots
            .iter()
            .zip(cards)
            .all(|(&slot, &card)| state.slot_to_card.get(slot).copied().flatten() == Some(card))
    }

    pub fn count_cards(&self) -> usize {
        self.state.lock().slot_to_card.iter().flatten().count()
    }

    /// 有牌的格子，按格子编号升序
    pub fn slots_on_table(&self) -> Vec<Slot> {
        let state = self.state.lock();
        state
            .slot_to_card
            .iter()
            .enumerate()
            .filter_map(|(slot, card)| card.map(|_| slot))
            .collect()
    }

    pub fn cards_on_table(&self) -> Vec<CardId> {
        self.state.lock().slot_to_card.iter().flatten().copied().collect()
    }

    pub fn has_any_set(&self) -> bool {
        let cards = self.cards_on_table();
        !self.oracle.find_sets(&cards, 1).is_empty()
    }

    /// 把牌桌上所有的合法组合打印到日志
    pub fn hints(&self) {
        let cards = self.cards_on_table();
        for set in self.oracle.find_sets(&cards, usize::MAX) {
            let mut slots: Vec<Slot> = set.iter().filter_map(|&card| self.slot_of(card)).collect();
            slots.sort_unstable();
            let features: Vec<Vec<usize>> = set.iter().map(|&card| self.oracle.features(card)).collect();
            info!("提示: 找到组合 slots: {:?} features: {:?}", slots, features);
        }
    }

    fn pause(&self) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let state = self.state.lock();
        for (slot, card) in state.slot_to_card.iter().enumerate() {
            if let Some(card) = card {
                assert_eq!(state.card_to_slot[*card], Some(slot));
            }
        }
        for (card, slot) in state.card_to_slot.iter().enumerate() {
            if let Some(slot) = slot {
                assert_eq!(state.slot_to_card[*slot], Some(card));
            }
        }
    }
}
