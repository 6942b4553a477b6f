use crate::card::{CardId, Slot, Triple};
use crate::player::PlayerId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// 玩家提交给庄家的验证请求，携带提交时刻的快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub player: PlayerId,
    pub ticket: u64,  // 玩家自增的请求编号，判决会原样带回
    pub slots: [Slot; 3],
    pub cards: Triple,
}

impl Claim {
    pub fn touches(&self, cards: &[CardId]) -> bool {
        self.cards.iter().any(|card| cards.contains(card))
    }
}

#[derive(Default)]
struct QueueState {
    order: VecDeque<PlayerId>,  // 先到先服务
    pending: HashMap<PlayerId, Claim>,  // 同时用作去重集合
    woken: bool,
    terminated: bool,
}

/// 庄家的验证请求队列
///
/// 每个玩家最多只有一个排队中的请求，重复提交会被忽略。
/// 庄家在这个队列的条件变量上睡眠，新请求或终止信号都会唤醒它。
#[derive(Default)]
pub struct ClaimQueue {
    state: Mutex<QueueState>,
    wake: Condvar,
}

impl ClaimQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提交请求。玩家已有排队中的请求或游戏已终止时返回 false。
    pub fn submit(&self, claim: Claim) -> bool {
        let mut state = self.state.lock();
        if state.terminated || state.pending.contains_key(&claim.player) {
            return false;
        }
        state.order.push_back(claim.player);
        state.pending.insert(claim.player, claim);
        state.woken = true;
        self.wake.notify_all();
        true
    }

    /// 撤回玩家排队中的请求
    pub fn withdraw(&self, player: PlayerId) -> Option<Claim> {
        let mut state = self.state.lock();
        let claim = state.pending.remove(&player)?;
        state.order.retain(|&p| p != player);
        Some(claim)
    }

    /// 撤回所有涉及这些牌的请求，返回被撤回的玩家
    pub fn withdraw_touching(&self, cards: &[CardId]) -> Vec<PlayerId> {
        let mut state = self.state.lock();
        let stale: Vec<PlayerId> = state
            .order
            .iter()
            .copied()
            .filter(|player| state.pending.get(player).is_some_and(|claim| claim.touches(cards)))
            .collect();
        for player in &stale {
            state.pending.remove(player);
        }
        state.order.retain(|player| !stale.contains(player));
        stale
    }

    /// 取出最早提交的请求
    pub fn next(&self) -> Option<Claim> {
        let mut state = self.state.lock();
        let player = state.order.pop_front()?;
        state.pending.remove(&player)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.order.clear();
        state.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.state.lock().pending.contains_key(&player)
    }

    /// 外部终止信号，同时唤醒正在睡眠的庄家
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        state.terminated = true;
        state.woken = true;
        self.wake.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// 睡眠直到超时、有新请求或收到终止信号
    pub fn sleep(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.woken && !state.terminated {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.woken = false;
    }
}
