use crate::card::{CardId, Slot};
use crate::claims::{Claim, ClaimQueue};
use crate::config::Config;
use crate::error::GameError;
use crate::table::Table;
use crate::ui::{UiEvent, UserInterface};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub type PlayerId = usize;

/// 一个组合的牌数
pub const SET_SIZE: usize = 3;

/// 每个玩家最多缓存的按键数
pub const KEY_QUEUE_CAPACITY: usize = 3;

/// 冻结期间向界面汇报剩余时间的间隔
const FREEZE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerPhase {
    /// 正常选牌
    Idle,
    /// 已选满三张，等待庄家判决
    AwaitingVerdict,
    /// 判决失败，冻结中
    Penalized,
    /// 判决成功，冻结中
    Awarded,
}

/// 庄家给出的判决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Awarded,
    Penalized,
    /// 没有判决，只是清空选择回到空闲状态
    Reset,
}

/// 玩家线程与外界之间的信箱，所有字段都在同一把锁里
struct Inbox {
    keys: VecDeque<Slot>,
    input_enabled: bool,  // 庄家控制的整轮开关
    verdict: Option<(u64, Verdict)>,
    invalidated: Vec<CardId>,
    reset: bool,
    terminated: bool,

    // 以下字段由玩家线程发布，只供外界读取
    phase: PlayerPhase,
    score: u32,
    selection: Vec<(Slot, CardId)>,
}

impl Inbox {
    fn accepting(&self) -> bool {
        self.input_enabled && self.phase == PlayerPhase::Idle && !self.terminated
    }
}

struct Shared {
    id: PlayerId,
    human: bool,
    inbox: Mutex<Inbox>,
    signal: Condvar,
}

/// 玩家的命令接口，可以在任意线程间克隆共享
///
/// 庄家和输入源 (键盘、电脑玩家) 只能通过它下达命令，
/// 选择、分数等状态只有玩家自己的线程会修改。
#[derive(Clone)]
pub struct PlayerHandle {
    shared: Arc<Shared>,
}

impl PlayerHandle {
    fn new(id: PlayerId, human: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                human,
                inbox: Mutex::new(Inbox {
                    keys: VecDeque::with_capacity(KEY_QUEUE_CAPACITY),
                    input_enabled: false,
                    verdict: None,
                    invalidated: Vec::new(),
                    reset: false,
                    terminated: false,
                    phase: PlayerPhase::Idle,
                    score: 0,
                    selection: Vec::new(),
                }),
                signal: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.shared.id
    }

    pub fn is_human(&self) -> bool {
        self.shared.human
    }

    /// 按键输入。当前不接受输入或按键缓存已满时丢弃，返回 false。
    pub fn key_pressed(&self, slot: Slot) -> bool {
        let mut inbox = self.lock();
        if !inbox.accepting() || inbox.keys.len() >= KEY_QUEUE_CAPACITY {
            return false;
        }
        inbox.keys.push_back(slot);
        self.shared.signal.notify_all();
        true
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting()
    }

    /// 庄家在每轮开始和结束时打开/关闭输入
    pub fn set_input_enabled(&self, enabled: bool) {
        let mut inbox = self.lock();
        inbox.input_enabled = enabled;
        if !enabled {
            inbox.keys.clear();
        }
        self.shared.signal.notify_all();
    }

    /// 投递对编号为 `ticket` 的请求的判决
    pub fn deliver(&self, ticket: u64, verdict: Verdict) {
        let mut inbox = self.lock();
        inbox.verdict = Some((ticket, verdict));
        self.shared.signal.notify_all();
    }

    /// 强制清空选择并回到空闲状态，玩家在等待判决时也可以调用
    pub fn force_reset(&self) {
        let mut inbox = self.lock();
        inbox.reset = true;
        inbox.keys.clear();
        self.shared.signal.notify_all();
    }

    /// 通知玩家这些牌已被别人拿走；选择中包含其中任何一张的玩家会自行重置
    pub fn invalidate(&self, cards: &[CardId]) {
        let mut inbox = self.lock();
        inbox.invalidated.extend_from_slice(cards);
        self.shared.signal.notify_all();
    }

    pub fn terminate(&self) {
        let mut inbox = self.lock();
        inbox.terminated = true;
        self.shared.signal.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    pub fn score(&self) -> u32 {
        self.lock().score
    }

    pub fn phase(&self) -> PlayerPhase {
        self.lock().phase
    }

    pub fn selection(&self) -> Vec<Slot> {
        self.lock().selection.iter().map(|&(slot, _)| slot).collect()
    }

    /// 当前选择的格子，以及放标记时格子上的牌
    pub fn selected_cards(&self) -> Vec<(Slot, CardId)> {
        self.lock().selection.clone()
    }

    /// 电脑玩家使用: 阻塞直到可以继续按键，游戏终止时返回 false
    fn wait_for_input_room(&self) -> bool {
        let mut inbox = self.lock();
        loop {
            if inbox.terminated {
                return false;
            }
            if inbox.accepting() && inbox.keys.len() < KEY_QUEUE_CAPACITY {
                return true;
            }
            self.shared.signal.wait(&mut inbox);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.shared.inbox.lock()
    }

    #[cfg(test)]
    pub(crate) fn shared_verdict(&self) -> Option<(u64, Verdict)> {
        self.lock().verdict
    }

    #[cfg(test)]
    pub(crate) fn shared_invalidated(&self) -> Vec<CardId> {
        self.lock().invalidated.clone()
    }
}

/// 玩家线程从信箱取出的命令，按优先级排列
enum Command {
    Reset,
    Invalidate(Vec<CardId>),
    Key(Slot),
}

/// 玩家 actor，运行在自己的线程里，独占自己的选择和分数
pub struct Player {
    handle: PlayerHandle,
    table: Arc<Table>,
    claims: Arc<ClaimQueue>,
    ui: Arc<dyn UserInterface>,
    table_size: usize,
    point_freeze: Duration,
    penalty_freeze: Duration,
    key_delay: Duration,

    selection: Vec<(Slot, CardId)>,  // 标记所在的格子以及放标记时格子上的牌
    score: u32,
    phase: PlayerPhase,
    ticket: u64,
    outstanding: Option<u64>,  // 正在等待判决的请求编号
    clear_on_next_key: bool,   // 罚时结束后的下一次按键只用来清空选择
}

impl Player {
    pub fn new(
        id: PlayerId,
        human: bool,
        config: &Config,
        table: Arc<Table>,
        claims: Arc<ClaimQueue>,
        ui: Arc<dyn UserInterface>,
    ) -> Self {
        Self {
            handle: PlayerHandle::new(id, human),
            table,
            claims,
            ui,
            table_size: config.table_size,
            point_freeze: config.point_freeze(),
            penalty_freeze: config.penalty_freeze(),
            key_delay: config.computer_key_delay(),
            selection: Vec::with_capacity(SET_SIZE),
            score: 0,
            phase: PlayerPhase::Idle,
            ticket: 0,
            outstanding: None,
            clear_on_next_key: false,
        }
    }

    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> PlayerId {
        self.handle.id()
    }

    /// 在名为 `player-{id}` 的线程中运行玩家主循环
    pub fn spawn(self) -> Result<JoinHandle<()>, GameError> {
        let name = format!("player-{}", self.id());
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|source| GameError::Spawn { name, source })
    }

    /// 玩家线程的主循环
    pub fn run(mut self) {
        info!("线程 player-{} 启动", self.id());
        let computer = if self.handle.is_human() {
            None
        } else {
            self.spawn_computer()
                .inspect_err(|e| warn!("{}", e))
                .ok()
        };

        while let Some(command) = self.next_command() {
            match command {
                Command::Reset => self.reset(),
                Command::Invalidate(cards) => self.invalidate(&cards),
                Command::Key(slot) => self.press(slot),
            }
        }

        // 电脑输入线程在同一个信箱上等待，确保它也能退出
        self.handle.terminate();
        if let Some(computer) = computer {
            let _ = computer.join();
        }
        info!("线程 player-{} 终止", self.id());
    }

    /// 取出下一条命令，没有命令时睡眠；收到终止信号时返回 `None`
    fn next_command(&self) -> Option<Command> {
        let shared = &self.handle.shared;
        let mut inbox = shared.inbox.lock();
        loop {
            if inbox.terminated {
                return None;
            }
            if inbox.reset {
                inbox.reset = false;
                inbox.invalidated.clear();
                inbox.verdict = None;
                return Some(Command::Reset);
            }
            if !inbox.invalidated.is_empty() {
                return Some(Command::Invalidate(std::mem::take(&mut inbox.invalidated)));
            }
            // 不在等待判决时收到的判决都是过期的
            inbox.verdict = None;
            if let Some(slot) = inbox.keys.pop_front() {
                shared.signal.notify_all();
                return Some(Command::Key(slot));
            }
            shared.signal.wait(&mut inbox);
        }
    }

    // --- 选牌 ---

    fn press(&mut self, slot: Slot) {
        if slot >= self.table_size {
            warn!("玩家 {} 按下了不存在的格子 {}", self.id(), slot);
            return;
        }
        if self.phase != PlayerPhase::Idle || self.table.card_at(slot).is_none() {
            return;
        }
        if self.clear_on_next_key {
            self.clear_on_next_key = false;
            self.clear_selection(&[]);
            return;
        }

        if let Some(index) = self.selection.iter().position(|&(s, _)| s == slot) {
            self.table.remove_token(self.id(), slot);
            self.selection.remove(index);
            self.publish();
            return;
        }
        if self.selection.len() >= SET_SIZE {
            return;
        }
        if let Some(card) = self.table.place_token(self.id(), slot) {
            self.selection.push((slot, card));
            self.publish();
        }
        if self.selection.len() == SET_SIZE {
            self.submit();
        }
    }

    /// 选满三张后提交请求，并阻塞等待判决
    fn submit(&mut self) {
        self.ticket += 1;
        let claim = Claim {
            player: self.id(),
            ticket: self.ticket,
            slots: [self.selection[0].0, self.selection[1].0, self.selection[2].0],
            cards: [self.selection[0].1, self.selection[1].1, self.selection[2].1],
        };

        self.set_phase(PlayerPhase::AwaitingVerdict);
        if !self.claims.submit(claim) {
            debug!("玩家 {} 的请求没有进入队列", self.id());
            self.set_phase(PlayerPhase::Idle);
            return;
        }
        self.outstanding = Some(self.ticket);

        let verdict = self.await_verdict();
        self.outstanding = None;
        match verdict {
            None => {}
            Some(Verdict::Awarded) => self.point(),
            Some(Verdict::Penalized) => self.penalty(),
            Some(Verdict::Reset) => {
                self.claims.withdraw(self.id());
                self.reset();
            }
        }
    }

    /// 等待当前请求的判决。终止时返回 `None`，
    /// 被重置或选择中的牌被别人拿走时返回 `Verdict::Reset`。
    fn await_verdict(&mut self) -> Option<Verdict> {
        let shared = self.handle.shared.clone();
        let mut inbox = shared.inbox.lock();
        loop {
            if inbox.terminated {
                // 已经送达的得分判决仍然计分，不再冻结
                if matches!(inbox.verdict, Some((t, Verdict::Awarded)) if Some(t) == self.outstanding) {
                    self.score += 1;
                    inbox.score = self.score;
                    self.ui.dispatch(UiEvent::SetScore { player: self.id(), score: self.score });
                }
                return None;
            }
            if inbox.reset {
                inbox.reset = false;
                inbox.invalidated.clear();
                inbox.verdict = None;
                return Some(Verdict::Reset);
            }
            if !inbox.invalidated.is_empty() {
                let cards = std::mem::take(&mut inbox.invalidated);
                if self.holds_any(&cards) {
                    drop(inbox);
                    self.clear_selection(&cards);
                    return Some(Verdict::Reset);
                }
                continue;
            }
            if let Some((ticket, verdict)) = inbox.verdict.take() {
                if Some(ticket) == self.outstanding {
                    return Some(verdict);
                }
                debug!("玩家 {} 丢弃过期判决 #{}", self.id(), ticket);
                continue;
            }
            shared.signal.wait(&mut inbox);
        }
    }

    // --- 判决之后 ---

    /// 得分: 分数加一，冻结，然后清空选择
    fn point(&mut self) {
        self.set_phase(PlayerPhase::Awarded);
        self.score += 1;
        self.publish();
        self.ui.dispatch(UiEvent::SetScore { player: self.id(), score: self.score });
        info!("玩家 {} 得分，当前 {} 分", self.id(), self.score);

        if !self.freeze(self.point_freeze) {
            return;
        }
        // 这三张牌连同标记已经被庄家收走
        self.selection.clear();
        self.publish();
        self.set_phase(PlayerPhase::Idle);
    }

    /// 罚时: 冻结，结束后保留选择，下一次按键会把它清空
    fn penalty(&mut self) {
        self.set_phase(PlayerPhase::Penalized);
        info!("玩家 {} 被罚时", self.id());
        if !self.freeze(self.penalty_freeze) {
            return;
        }
        self.clear_on_next_key = true;
        self.set_phase(PlayerPhase::Idle);
    }

    /// 冻结一段时间，每秒向界面汇报一次剩余时间。
    /// 期间收到终止信号立即返回 false。
    fn freeze(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let shared = &self.handle.shared;
        let mut inbox = shared.inbox.lock();
        loop {
            if inbox.terminated {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let millis = (deadline - now).as_millis() as u64;
            MutexGuard::unlocked(&mut inbox, || {
                self.ui.dispatch(UiEvent::SetFreeze { player: self.id(), millis });
            });
            let wake = deadline.min(now + FREEZE_TICK);
            while !inbox.terminated && Instant::now() < wake {
                if shared.signal.wait_until(&mut inbox, wake).timed_out() {
                    break;
                }
            }
        }
        drop(inbox);
        self.ui.dispatch(UiEvent::SetFreeze { player: self.id(), millis: 0 });
        true
    }

    // --- 重置 ---

    /// 整轮结束时的重置: 庄家会统一清除界面上的标记
    fn reset(&mut self) {
        self.selection.clear();
        self.clear_on_next_key = false;
        self.outstanding = None;
        self.publish();
        self.set_phase(PlayerPhase::Idle);
    }

    /// 别人拿走了 `cards`，如果选择中有其中的牌就整体作废
    fn invalidate(&mut self, cards: &[CardId]) {
        if self.holds_any(cards) {
            debug!("玩家 {} 的选择被其他玩家的组合作废", self.id());
            self.clear_selection(cards);
        }
    }

    /// 清空选择并移除界面上的标记；`removed` 中的牌所在格子的标记已经被庄家清掉
    fn clear_selection(&mut self, removed: &[CardId]) {
        for (slot, card) in std::mem::take(&mut self.selection) {
            if !removed.contains(&card) {
                self.table.remove_token(self.id(), slot);
            }
        }
        self.clear_on_next_key = false;
        self.publish();
        self.set_phase(PlayerPhase::Idle);
    }

    fn holds_any(&self, cards: &[CardId]) -> bool {
        self.selection.iter().any(|(_, card)| cards.contains(card))
    }

    fn set_phase(&mut self, phase: PlayerPhase) {
        self.phase = phase;
        let mut inbox = self.handle.lock();
        inbox.phase = phase;
        if phase != PlayerPhase::Idle {
            inbox.keys.clear();
        }
        self.handle.shared.signal.notify_all();
    }

    fn publish(&self) {
        let mut inbox = self.handle.lock();
        inbox.score = self.score;
        inbox.selection = self.selection.clone();
    }

    // --- 电脑玩家 ---

    /// 为电脑玩家启动一个额外的线程，不断随机按键；
    /// 不能输入或按键缓存已满时在信箱的条件变量上等待
    fn spawn_computer(&self) -> Result<JoinHandle<()>, GameError> {
        let handle = self.handle.clone();
        let table_size = self.table_size;
        let delay = self.key_delay;
        let name = format!("computer-{}", self.id());
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!("线程 computer-{} 启动", handle.id());
                let mut rng = rand::rng();
                while handle.wait_for_input_room() {
                    handle.key_pressed(rng.random_range(0..table_size));
                    thread::sleep(delay);
                }
                info!("线程 computer-{} 终止", handle.id());
            })
            .map_err(|source| GameError::Spawn { name, source })
    }
}

// --- 单元测试 ---
