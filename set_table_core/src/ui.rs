use crate::card::{CardId, Slot};
use crate::player::PlayerId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 核心逻辑发给界面的通知，全部是单向的，核心从不读取返回值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiEvent {
    PlaceCard { card: CardId, slot: Slot },
    RemoveCard { slot: Slot },
    PlaceToken { player: PlayerId, slot: Slot },
    RemoveToken { player: PlayerId, slot: Slot },
    /// 清除某个格子上所有玩家的标记
    RemoveTokensAt { slot: Slot },
    RemoveAllTokens,
    SetScore { player: PlayerId, score: u32 },
    /// 冻结剩余时间，0 表示解冻
    SetFreeze { player: PlayerId, millis: u64 },
    /// 本轮倒计时，`warn` 为真时界面应切换成警告样式
    SetCountdown { millis: u64, warn: bool },
    AnnounceWinners { players: Vec<PlayerId> },
}

/// 界面接收端
pub trait UserInterface: Send + Sync {
    fn dispatch(&self, event: UiEvent);
}

/// 丢弃所有通知
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUi;

impl UserInterface for NullUi {
    fn dispatch(&self, _: UiEvent) {}
}

/// 把通知写进 tracing 日志，适合无界面运行
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUi;

impl UserInterface for TracingUi {
    fn dispatch(&self, event: UiEvent) {
        debug!(?event, "界面通知");
    }
}

/// 记录所有通知，主要供测试使用
#[derive(Debug, Default)]
pub struct RecordingUi {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&UiEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl UserInterface for RecordingUi {
    fn dispatch(&self, event: UiEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_ui_keeps_order() {
        let ui = RecordingUi::new();
        ui.dispatch(UiEvent::PlaceCard { card: 3, slot: 0 });
        ui.dispatch(UiEvent::RemoveCard { slot: 0 });
        assert_eq!(
            ui.events(),
            vec![UiEvent::PlaceCard { card: 3, slot: 0 }, UiEvent::RemoveCard { slot: 0 }]
        );
        assert_eq!(ui.count(|e| matches!(e, UiEvent::RemoveCard { .. })), 1);
        ui.clear();
        assert!(ui.events().is_empty());
    }

    #[test]
    fn test_sinks_accept_events() {
        let sinks: Vec<Box<dyn UserInterface>> = vec![Box::new(NullUi), Box::new(TracingUi)];
        for sink in sinks {
            sink.dispatch(UiEvent::AnnounceWinners { players: vec![0, 2] });
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = UiEvent::SetCountdown { millis: 9_500, warn: true };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"SetCountdown":{"millis":9500,"warn":true}}"#);
    }
}
