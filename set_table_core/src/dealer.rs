use crate::card::{CardId, SetOracle, Slot};
use crate::claims::{Claim, ClaimQueue};
use crate::config::Config;
use crate::player::{Player, PlayerHandle, PlayerId, Verdict};
use crate::table::Table;
use crate::ui::{UiEvent, UserInterface};
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 正常模式下庄家的唤醒间隔
const TICK: Duration = Duration::from_secs(1);

/// 倒计时进入警告模式后的唤醒间隔
const WARNING_TICK: Duration = Duration::from_millis(10);

/// 外部终止信号
#[derive(Clone)]
pub struct DealerHandle {
    claims: Arc<ClaimQueue>,
}

impl DealerHandle {
    pub fn terminate(&self) {
        self.claims.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.claims.is_terminated()
    }
}

/// 庄家 actor
///
/// 独占牌组，负责所有牌的移动、判决、计时和结束判定。
/// 每一轮: 发牌 -> 打开输入 -> 计时循环 -> 关闭输入 -> 收牌，直到游戏结束。
pub struct Dealer {
    config: Arc<Config>,
    table: Arc<Table>,
    claims: Arc<ClaimQueue>,
    oracle: Arc<dyn SetOracle>,
    ui: Arc<dyn UserInterface>,
    players: Vec<PlayerHandle>,
    unstarted: Vec<Player>,
    threads: Vec<JoinHandle<()>>,

    deck: Vec<CardId>,
    deadline: Instant,  // 本轮结束 (重新洗牌) 的时间
    tick: Duration,
    finished: bool,     // 满足了结束条件
}

impl Dealer {
    pub fn new(
        config: Arc<Config>,
        table: Arc<Table>,
        claims: Arc<ClaimQueue>,
        oracle: Arc<dyn SetOracle>,
        ui: Arc<dyn UserInterface>,
        players: Vec<Player>,
    ) -> Self {
        let deck = (0..config.deck_size).collect();
        let turn_timeout = config.turn_timeout();
        Self {
            config,
            table,
            claims,
            oracle,
            ui,
            players: players.iter().map(Player::handle).collect(),
            unstarted: players,
            threads: Vec::new(),
            deck,
            deadline: Instant::now() + turn_timeout,
            tick: TICK,
            finished: false,
        }
    }

    pub fn handle(&self) -> DealerHandle {
        DealerHandle { claims: self.claims.clone() }
    }

    pub fn players(&self) -> &[PlayerHandle] {
        &self.players
    }

    /// 庄家线程的主循环，返回赢家
    pub fn run(mut self) -> Vec<PlayerId> {
        info!("线程 dealer 启动");
        self.start_players();
        while !self.should_finish() {
            self.place_cards_on_table();
            if self.config.hints {
                self.table.hints();
            }
            self.set_input_enabled(true);
            self.timer_loop();
            self.set_input_enabled(false);
            self.update_timer_display();
            self.remove_all_cards_from_table();
        }
        self.table.remove_all_tokens();
        let winners = self.finish();
        info!("线程 dealer 终止");
        winners
    }

    /// 计时循环，直到本轮超时或游戏结束
    fn timer_loop(&mut self) {
        self.deadline = Instant::now() + self.config.turn_timeout();
        info!("新一轮开始，牌组剩余 {} 张", self.deck.len());
        while !self.terminated() && Instant::now() < self.deadline {
            self.sleep_until_woken_or_timeout();
            self.update_timer_display();
            self.process_claims();
            self.finished = self.finished || self.game_over();
        }
        for player in &self.players {
            player.force_reset();
        }
    }

    // --- 结束判定 ---

    fn terminated(&self) -> bool {
        self.finished || self.claims.is_terminated()
    }

    /// 收到外部终止信号，或满足了结束条件
    pub fn should_finish(&self) -> bool {
        self.terminated() || self.game_over()
    }

    /// 牌组里已经没有组合，而牌桌上仍有组合
    fn game_over(&self) -> bool {
        self.oracle.find_sets(&self.deck, 1).is_empty() && self.table.has_any_set()
    }

    // --- 处理验证请求 ---

    /// 按提交顺序处理所有排队中的请求
    pub fn process_claims(&mut self) {
        while let Some(claim) = self.claims.next() {
            self.judge(claim);
        }
    }

    /// 判定一个请求。快照中的牌必须仍在原来的格子上，并且构成组合。
    fn judge(&mut self, claim: Claim) {
        let Some(player) = self.players.get(claim.player).cloned() else {
            warn!("收到未知玩家 {} 的请求", claim.player);
            return;
        };
        let intact = self.table.holds(&claim.slots, &claim.cards);
        if !intact || !self.oracle.is_set(&claim.cards) {
            info!("玩家 {} 的组合 {:?} 不合法 (牌桌未变: {})", claim.player, claim.cards, intact);
            player.deliver(claim.ticket, Verdict::Penalized);
            return;
        }

        info!("玩家 {} 找到组合 {:?}", claim.player, claim.cards);
        // 闸门要在通知其他玩家之前关上，直到补牌结束。
        // 否则已经处理完作废通知的玩家还能在旧牌上放标记。
        let table = self.table.clone();
        let _busy = table.restructure();
        player.deliver(claim.ticket, Verdict::Awarded);

        let withdrawn = self.claims.withdraw_touching(&claim.cards);
        if !withdrawn.is_empty() {
            debug!("撤回了玩家 {:?} 的请求", withdrawn);
        }
        for other in self.players.iter().filter(|p| p.id() != claim.player) {
            other.invalidate(&claim.cards);
        }

        table.remove_tokens_at(&claim.slots);
        for &slot in &claim.slots {
            table.remove_card(slot);
        }
        self.deal_into(claim.slots.to_vec());
    }

    // --- 发牌与收牌 ---

    /// 用牌组中的牌填满所有空格子
    fn place_cards_on_table(&mut self) {
        let table = self.table.clone();
        let _busy = table.restructure();
        let empty: Vec<Slot> = (0..table.table_size()).filter(|&slot| table.card_at(slot).is_none()).collect();
        self.deal_into(empty);
    }

    /// 以随机顺序向这些格子发随机的牌，牌组用完就留空
    fn deal_into(&mut self, mut slots: Vec<Slot>) {
        let mut rng = rand::rng();
        slots.shuffle(&mut rng);
        for slot in slots {
            if self.deck.is_empty() {
                break;
            }
            let card = self.deck.swap_remove(rng.random_range(0..self.deck.len()));
            self.table.place_card(card, slot);
        }
    }

    /// 把牌桌上所有的牌收回牌组，并清空所有玩家的选择和请求队列
    fn remove_all_cards_from_table(&mut self) {
        let table = self.table.clone();
        let _busy = table.restructure();
        table.remove_all_tokens();
        let mut slots = table.slots_on_table();
        slots.shuffle(&mut rand::rng());
        for slot in slots {
            if let Some(card) = table.remove_card(slot) {
                self.deck.push(card);
            }
        }
        for player in &self.players {
            player.force_reset();
        }
        self.claims.clear();
        self.update_timer_display();
    }

    // --- 计时 ---

    fn sleep_until_woken_or_timeout(&self) {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        self.claims.sleep(self.tick.min(remaining));
    }

    /// 刷新倒计时显示；剩余时间低于警告阈值时改用更短的唤醒间隔
    fn update_timer_display(&mut self) {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let warn = !remaining.is_zero() && remaining < self.config.turn_timeout_warning();
        self.tick = if warn { WARNING_TICK } else { TICK };
        self.ui.dispatch(UiEvent::SetCountdown { millis: remaining.as_millis() as u64, warn });
    }

    fn set_input_enabled(&self, enabled: bool) {
        for player in &self.players {
            player.set_input_enabled(enabled);
        }
    }

    // --- 玩家线程 ---

    fn start_players(&mut self) {
        for player in self.unstarted.drain(..) {
            let id = player.id();
            match player.spawn() {
                Ok(thread) => self.threads.push(thread),
                Err(e) => warn!("玩家 {} 无法启动: {}", id, e),
            }
        }
    }

    /// 终止所有玩家线程并等待退出，然后宣布赢家
    fn finish(&mut self) -> Vec<PlayerId> {
        for player in self.players.iter().rev() {
            player.terminate();
        }
        self.table.close();
        for thread in self.threads.drain(..).rev() {
            if thread.join().is_err() {
                warn!("有玩家线程异常退出");
            }
        }

        let scores: Vec<(PlayerId, u32)> = self.players.iter().map(|p| (p.id(), p.score())).collect();
        let winners = winners(&scores);
        info!("游戏结束，得分 {:?}，赢家 {:?}", scores, winners);
        self.ui.dispatch(UiEvent::AnnounceWinners { players: winners.clone() });
        winners
    }
}

/// 所有拿到最高分的玩家，平分时都是赢家
pub fn winners(scores: &[(PlayerId, u32)]) -> Vec<PlayerId> {
    let Some(best) = scores.iter().map(|&(_, score)| score).max() else {
        return Vec::new();
    };
    scores.iter().filter(|&&(_, score)| score == best).map(|&(player, _)| player).collect()
}

// --- 单元测试 ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{ClassicRules, Triple};
    use crate::ui::RecordingUi;
    use parking_lot::Mutex;

    /// 记录每次判定的顺序，并总是给出固定结论
    struct ScriptedOracle {
        answer: bool,
        asked: Mutex<Vec<Triple>>,
    }

    impl SetOracle for ScriptedOracle {
        fn is_set(&self, cards: &Triple) -> bool {
            self.asked.lock().push(*cards);
            self.answer
        }
        fn find_sets(&self, cards: &[CardId], limit: usize) -> Vec<Triple> {
            ClassicRules::default().find_sets(cards, limit)
        }
        fn features(&self, card: CardId) -> Vec<usize> {
            vec![card]
        }
    }

    struct Fixture {
        dealer: Dealer,
        table: Arc<Table>,
        claims: Arc<ClaimQueue>,
        ui: Arc<RecordingUi>,
    }

    /// 玩家线程不启动，只检查庄家发出的命令
    fn setup(oracle: Arc<dyn SetOracle>, players: usize) -> Fixture {
        let config = Arc::new(Config {
            table_delay_millis: 0,
            human_players: players,
            ..Config::default()
        });
        let ui = Arc::new(RecordingUi::new());
        let table = Arc::new(Table::new(&config, ui.clone(), oracle.clone()));
        let claims = Arc::new(ClaimQueue::new());
        let players = (0..players)
            .map(|id| Player::new(id, true, &config, table.clone(), claims.clone(), ui.clone()))
            .collect();
        let dealer = Dealer::new(config, table.clone(), claims.clone(), oracle, ui.clone(), players);
        Fixture { dealer, table, claims, ui }
    }

    fn claim(player: PlayerId, ticket: u64, slots: [Slot; 3], cards: Triple) -> Claim {
        Claim { player, ticket, slots, cards }
    }

    /// 把牌放到格子上，并从牌组里拿走
    fn lay(f: &mut Fixture, layout: &[(CardId, Slot)]) {
        for &(card, slot) in layout {
            f.dealer.deck.retain(|&c| c != card);
            f.table.place_card(card, slot);
        }
    }

    fn assert_deck_and_table_disjoint(f: &Fixture) {
        for card in f.table.cards_on_table() {
            assert!(!f.dealer.deck.contains(&card), "牌 {} 同时在牌组和牌桌上", card);
        }
        f.table.assert_consistent();
    }

    #[test]
    fn test_winners_include_ties() {
        assert_eq!(winners(&[(0, 2), (1, 5), (2, 5)]), vec![1, 2]);
        assert_eq!(winners(&[(0, 0), (1, 0)]), vec![0, 1]);
        assert_eq!(winners(&[(3, 1)]), vec![3]);
        assert!(winners(&[]).is_empty());
    }

    #[test]
    fn test_initial_deal_fills_table() {
        let mut f = setup(Arc::new(ClassicRules::default()), 1);
        f.dealer.place_cards_on_table();
        assert_eq!(f.table.count_cards(), 12);
        assert_eq!(f.dealer.deck.len(), 81 - 12);
        assert!(!f.table.is_dealer_busy());
        assert_deck_and_table_disjoint(&f);
    }

    #[test]
    fn test_deal_with_short_deck_leaves_slots_empty() {
        let mut f = setup(Arc::new(ClassicRules::default()), 1);
        f.dealer.deck = vec![4, 8];
        f.dealer.place_cards_on_table();
        assert_eq!(f.table.count_cards(), 2);
        assert!(f.dealer.deck.is_empty());
    }

    #[test]
    fn test_clear_returns_cards_to_deck() {
        let mut f = setup(Arc::new(ClassicRules::default()), 2);
        f.dealer.place_cards_on_table();
        f.claims.submit(claim(1, 1, [0, 1, 2], [0, 1, 2]));
        f.dealer.remove_all_cards_from_table();

        assert_eq!(f.table.count_cards(), 0);
        assert_eq!(f.dealer.deck.len(), 81);
        assert!(f.claims.is_empty());
        assert_eq!(f.ui.count(|e| *e == UiEvent::RemoveAllTokens), 1);
        assert!(!f.table.is_dealer_busy());
        let mut deck = f.dealer.deck.clone();
        deck.sort_unstable();
        assert_eq!(deck, (0..81).collect::<Vec<_>>());
    }

    #[test]
    fn test_valid_claim_replaces_cards() {
        let mut f = setup(Arc::new(ClassicRules::default()), 2);
        lay(&mut f, &[(0, 3), (1, 7), (2, 11), (5, 0)]);
        f.dealer.deck = vec![20, 30, 40, 50];
        f.claims.submit(claim(0, 1, [3, 7, 11], [0, 1, 2]));

        f.dealer.process_claims();

        for slot in [3, 7, 11] {
            let card = f.table.card_at(slot).expect("格子应被补上");
            assert!([20, 30, 40, 50].contains(&card));
        }
        assert_eq!(f.dealer.deck.len(), 1);
        assert_eq!(f.table.card_at(0), Some(5));
        assert_eq!(f.ui.count(|e| matches!(e, UiEvent::RemoveTokensAt { .. })), 3);
        assert_eq!(f.ui.count(|e| matches!(e, UiEvent::RemoveCard { .. })), 3);
        assert!(!f.table.is_dealer_busy());
        assert_deck_and_table_disjoint(&f);

        let requester = f.dealer.players[0].shared_verdict();
        assert_eq!(requester, Some((1, Verdict::Awarded)));
        // 其他玩家收到作废通知，但没有判决
        assert_eq!(f.dealer.players[1].shared_verdict(), None);
        assert_eq!(f.dealer.players[1].shared_invalidated(), vec![0, 1, 2]);
        assert!(f.dealer.players[0].shared_invalidated().is_empty());
    }

    #[test]
    fn test_valid_claim_with_empty_deck_leaves_slots_empty() {
        let mut f = setup(Arc::new(ClassicRules::default()), 1);
        lay(&mut f, &[(0, 0), (1, 1), (2, 2)]);
        f.dealer.deck.clear();
        f.claims.submit(claim(0, 1, [0, 1, 2], [0, 1, 2]));
        f.dealer.process_claims();
        assert_eq!(f.table.count_cards(), 0);
    }

    #[test]
    fn test_invalid_claim_leaves_board_untouched() {
        let mut f = setup(Arc::new(ClassicRules::default()), 1);
        lay(&mut f, &[(0, 0), (1, 1), (3, 2)]);
        f.ui.clear();
        f.claims.submit(claim(0, 4, [0, 1, 2], [0, 1, 3]));

        f.dealer.process_claims();

        assert_eq!(f.dealer.players[0].shared_verdict(), Some((4, Verdict::Penalized)));
        assert_eq!(f.table.cards_on_table(), vec![0, 1, 3]);
        assert!(f.ui.events().is_empty());
    }

    #[test]
    fn test_stale_claim_is_penalized() {
        let mut f = setup(Arc::new(ClassicRules::default()), 2);
        lay(&mut f, &[(0, 0), (1, 1), (2, 2), (9, 5)]);
        f.dealer.deck = vec![60, 61, 62];
        // 两个玩家的请求重叠在格子 2 上
        f.claims.submit(claim(0, 1, [0, 1, 2], [0, 1, 2]));
        f.claims.submit(claim(1, 1, [2, 5, 1], [2, 9, 1]));
        f.dealer.process_claims();
        assert_eq!(f.dealer.players[0].shared_verdict(), Some((1, Verdict::Awarded)));
        // 玩家 1 的请求涉及被拿走的牌，已被撤回，不会再判定
        assert_eq!(f.dealer.players[1].shared_verdict(), None);

        // 如果撤回之后才提交，快照已经过期，按不合法处理
        f.claims.submit(claim(1, 2, [2, 5, 1], [2, 9, 1]));
        f.dealer.process_claims();
        assert_eq!(f.dealer.players[1].shared_verdict(), Some((2, Verdict::Penalized)));
        assert_deck_and_table_disjoint(&f);
    }

    #[test]
    fn test_bystander_tokens_follow_refilled_cards() {
        let oracle = Arc::new(ScriptedOracle { answer: true, asked: Mutex::new(Vec::new()) });
        let mut f = setup(oracle, 2);
        f.dealer.place_cards_on_table();

        // 玩家 1 真正运行，不停地在格子 0 和 1 上放下/拿起标记
        let bystander = f.dealer.players[1].clone();
        let thread = f.dealer.unstarted.remove(1).spawn().unwrap();
        bystander.set_input_enabled(true);
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let presser = {
            let bystander = bystander.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut slot = 0;
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    bystander.key_pressed(slot);
                    slot = 1 - slot;
                }
            })
        };

        // 玩家 0 一次次拿走格子 0、1、2 上的牌
        for ticket in 1..=10 {
            let slots = [0, 1, 2];
            let cards = slots.map(|slot| f.table.card_at(slot).unwrap());
            f.claims.submit(claim(0, ticket, slots, cards));
            f.dealer.process_claims();
            std::thread::sleep(Duration::from_millis(2));
        }

        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        presser.join().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        // 标记要么落在补上的新牌上，要么已经作废
        for (slot, card) in bystander.selected_cards() {
            assert_eq!(f.table.card_at(slot), Some(card), "格子 {} 上的标记指向已被拿走的牌", slot);
        }
        assert!(!f.table.is_dealer_busy());
        assert_deck_and_table_disjoint(&f);

        bystander.terminate();
        thread.join().unwrap();
    }

    #[test]
    fn test_claims_are_judged_in_arrival_order() {
        let oracle = Arc::new(ScriptedOracle { answer: false, asked: Mutex::new(Vec::new()) });
        let mut f = setup(oracle.clone(), 3);
        lay(&mut f, &[(0, 0), (1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);
        f.claims.submit(claim(2, 1, [3, 4, 5], [3, 4, 5]));
        f.claims.submit(claim(0, 1, [0, 1, 2], [0, 1, 2]));
        f.claims.submit(claim(1, 1, [1, 2, 3], [1, 2, 3]));
        f.dealer.process_claims();
        assert_eq!(*oracle.asked.lock(), vec![[3, 4, 5], [0, 1, 2], [1, 2, 3]]);
    }

    #[test]
    fn test_game_over_when_only_table_has_sets() {
        let mut f = setup(Arc::new(ClassicRules::default()), 1);
        lay(&mut f, &[(0, 0), (1, 1), (2, 2)]);
        // 3=0100, 4=1100, 6=0200: 没有组合
        f.dealer.deck = vec![3, 4, 6];
        assert!(f.dealer.should_finish());
    }

    #[test]
    fn test_game_continues_when_deck_has_sets() {
        let mut f = setup(Arc::new(ClassicRules::default()), 1);
        lay(&mut f, &[(0, 0), (1, 1), (2, 2)]);
        // 3=0100, 4=1100, 5=2100: 组成一个组合
        f.dealer.deck = vec![3, 4, 5];
        assert!(!f.dealer.should_finish());
    }

    #[test]
    fn test_game_continues_when_neither_has_sets() {
        let mut f = setup(Arc::new(ClassicRules::default()), 1);
        lay(&mut f, &[(0, 0), (1, 1), (3, 2)]);
        f.dealer.deck = vec![4, 6, 7];
        assert!(!f.dealer.should_finish());
    }

    #[test]
    fn test_terminate_signal_finishes() {
        let f = setup(Arc::new(ClassicRules::default()), 1);
        assert!(!f.dealer.should_finish());
        f.dealer.handle().terminate();
        assert!(f.dealer.should_finish());
        assert!(f.dealer.handle().is_terminated());
    }

    #[test]
    fn test_countdown_switches_to_warning() {
        let mut f = setup(Arc::new(ClassicRules::default()), 1);
        f.dealer.deadline = Instant::now() + Duration::from_secs(30);
        f.dealer.update_timer_display();
        assert_eq!(f.dealer.tick, TICK);

        f.dealer.deadline = Instant::now() + Duration::from_secs(5);
        f.dealer.update_timer_display();
        assert_eq!(f.dealer.tick, WARNING_TICK);

        f.dealer.deadline = Instant::now();
        f.dealer.update_timer_display();
        assert_eq!(f.dealer.tick, TICK);

        let warnings: Vec<bool> = f
            .ui
            .events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::SetCountdown { warn, .. } => Some(warn),
                _ => None,
            })
            .collect();
        assert_eq!(warnings, vec![false, true, false]);
    }
}
