use set_table_core::{CardId, Config, Game, GameHandle, PlayerId, PlayerPhase, RecordingUi, SetOracle, Triple, UiEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_config(humans: usize, computers: usize) -> Config {
    Config {
        human_players: humans,
        computer_players: computers,
        turn_timeout_millis: 400,
        turn_timeout_warning_millis: 200,
        point_freeze_millis: 20,
        penalty_freeze_millis: 20,
        table_delay_millis: 0,
        computer_key_delay_millis: 1,
        ..Config::default()
    }
}

/// 按顺序重放界面通知，检查牌桌和标记始终合法
fn replay(events: &[UiEvent]) {
    let mut slots: HashMap<usize, usize> = HashMap::new();
    let mut tokens: HashMap<PlayerId, HashSet<usize>> = HashMap::new();

    for event in events {
        match event {
            UiEvent::PlaceCard { card, slot } => {
                assert!(!slots.contains_key(slot), "格子 {} 上已经有牌", slot);
                assert!(!slots.values().any(|c| c == card), "牌 {} 已经在牌桌上", card);
                slots.insert(*slot, *card);
            }
            UiEvent::RemoveCard { slot } => {
                assert!(slots.remove(slot).is_some(), "格子 {} 上没有牌", slot);
            }
            UiEvent::PlaceToken { player, slot } => {
                let selection = tokens.entry(*player).or_default();
                selection.insert(*slot);
                assert!(selection.len() <= 3, "玩家 {} 选了超过三张牌", player);
            }
            UiEvent::RemoveToken { player, slot } => {
                tokens.entry(*player).or_default().remove(slot);
            }
            UiEvent::RemoveTokensAt { slot } => {
                for selection in tokens.values_mut() {
                    selection.remove(slot);
                }
            }
            UiEvent::RemoveAllTokens => tokens.clear(),
            _ => {}
        }
    }
    assert!(slots.is_empty(), "游戏结束时牌桌上还有牌");
}

#[test]
fn test_computer_players_until_terminated() {
    let ui = Arc::new(RecordingUi::new());
    let game = Game::with_classic_rules(fast_config(0, 3), ui.clone()).unwrap();
    let handle = game.handle();
    let dealer = game.spawn().unwrap();

    // 至少经历一次整轮超时
    thread::sleep(Duration::from_millis(1_000));
    handle.terminate();
    let winners = dealer.join().unwrap();

    let events = ui.events();
    replay(&events);

    let scores = handle.scores();
    let best = scores.iter().copied().max().unwrap();
    let expected: Vec<PlayerId> = (0..scores.len()).filter(|&p| scores[p] == best).collect();
    assert_eq!(winners, expected);
    assert_eq!(events.last(), Some(&UiEvent::AnnounceWinners { players: winners }));
    assert!(events.iter().any(|e| *e == UiEvent::RemoveAllTokens));
}

#[test]
fn test_game_ends_when_deck_runs_dry() {
    // 12 张牌一次发完，牌组为空而牌桌上有组合 (0, 1, 2)
    let config = Config {
        deck_size: 12,
        turn_timeout_millis: 60_000,
        hints: true,
        ..fast_config(1, 0)
    };
    let ui = Arc::new(RecordingUi::new());
    let game = Game::with_classic_rules(config, ui.clone()).unwrap();
    let handle = game.handle();

    let start = Instant::now();
    let winners = game.spawn().unwrap().join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(30), "应当在整轮超时之前结束");
    assert!(!handle.is_terminated(), "没有外部终止信号");
    assert_eq!(winners, vec![0]);
    assert_eq!(ui.count(|e| matches!(e, UiEvent::PlaceCard { .. })), 12);
    replay(&ui.events());
}

/// 任意三张不同的牌都算组合，牌组永远不会先于牌桌耗尽组合
struct AnyThree;

impl SetOracle for AnyThree {
    fn is_set(&self, cards: &Triple) -> bool {
        let [a, b, c] = *cards;
        a != b && b != c && a != c
    }

    fn find_sets(&self, cards: &[CardId], limit: usize) -> Vec<Triple> {
        cards.chunks_exact(3).take(limit).map(|chunk| [chunk[0], chunk[1], chunk[2]]).collect()
    }

    fn features(&self, card: CardId) -> Vec<usize> {
        vec![card]
    }
}

/// 不停重试直到按键被接受
fn press(handle: &GameHandle, player: PlayerId, slot: usize, deadline: Instant) {
    while !handle.key_pressed(player, slot).unwrap() {
        assert!(Instant::now() < deadline, "玩家 {} 的按键一直被丢弃", player);
        thread::sleep(Duration::from_millis(1));
    }
}

fn wait_until(deadline: Instant, what: &str, mut done: impl FnMut() -> bool) {
    while !done() {
        assert!(Instant::now() < deadline, "等待超时: {}", what);
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_human_finds_a_set() {
    let ui = Arc::new(RecordingUi::new());
    let config = Config { turn_timeout_millis: 60_000, ..fast_config(2, 0) };
    let game = Game::new(config, ui.clone(), Arc::new(AnyThree)).unwrap();
    let handle = game.handle();
    let dealer = game.spawn().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    wait_until(deadline, "输入打开", || handle.players().iter().all(|p| p.is_accepting()));
    assert!(handle.table().has_any_set());

    // 玩家 1 先选中格子 0 和 5，其中格子 0 会被玩家 0 拿走
    press(&handle, 1, 0, deadline);
    press(&handle, 1, 5, deadline);
    let bystander = handle.player(1).unwrap();
    wait_until(deadline, "玩家 1 选好两张牌", || bystander.selection() == vec![0, 5]);

    let table = handle.table();
    let taken: Vec<CardId> = (0..3).map(|slot| table.card_at(slot).unwrap()).collect();
    for slot in 0..3 {
        press(&handle, 0, slot, deadline);
    }

    // 玩家 0 得一分，三张牌离开牌桌
    wait_until(deadline, "组合被收走", || {
        handle.scores()[0] == 1 && taken.iter().all(|&card| table.slot_of(card).is_none())
    });
    // 玩家 1 的选择被整体作废，没有受罚
    wait_until(deadline, "玩家 1 回到空闲", || {
        bystander.phase() == PlayerPhase::Idle && bystander.selection().is_empty()
    });
    assert_eq!(handle.scores(), vec![1, 0]);

    handle.terminate();
    assert_eq!(dealer.join().unwrap(), vec![0]);
    assert_eq!(handle.scores(), vec![1, 0]);
    replay(&ui.events());
}
