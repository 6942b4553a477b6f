use serde::{Deserialize, Serialize};
use std::fmt;

// --- 核心数据结构定义 ---

/// 牌的编号，范围是 `0..deck_size`
pub type CardId = usize;

/// 牌桌上的格子编号，范围是 `0..table_size`
pub type Slot = usize;

/// 三张牌组成的一个组合 (Set)
pub type Triple = [CardId; 3];

/// 组合判定器
///
/// 核心逻辑只通过这个 trait 判断三张牌是否构成合法组合，
/// 以及在一堆牌里搜索合法组合。具体规则（特征如何编码、怎样才算合法）
/// 与并发核心解耦，可以替换成任意实现。
pub trait SetOracle: Send + Sync {
    /// 三张牌是否构成合法组合
    fn is_set(&self, cards: &Triple) -> bool;

    /// 在 `cards` 中最多找出 `limit` 个合法组合
    fn find_sets(&self, cards: &[CardId], limit: usize) -> Vec<Triple>;

    /// 把牌解码成特征值，只用于提示和日志
    fn features(&self, card: CardId) -> Vec<usize>;
}

/// 经典规则：每张牌有 `feature_count` 个特征，每个特征有 `feature_size` 种取值。
/// 三张牌在每个特征上要么全部相同，要么全部不同，才算一个组合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassicRules {
    pub feature_count: usize,
    pub feature_size: usize,
}

impl Default for ClassicRules {
    fn default() -> Self {
        Self { feature_count: 4, feature_size: 3 }
    }
}

impl ClassicRules {
    pub fn new(feature_count: usize, feature_size: usize) -> Self {
        Self { feature_count, feature_size }
    }

    /// 一副完整牌组的张数 (默认 3^4 = 81)，超出 `usize` 时为 `None`
    pub fn deck_size(&self) -> Option<usize> {
        let exponent = u32::try_from(self.feature_count).ok()?;
        self.feature_size.checked_pow(exponent)
    }

    /// 按 `feature_size` 进制拆分牌的编号，低位是第一个特征
    pub fn card_to_features(&self, card: CardId) -> Vec<usize> {
        let mut features = Vec::with_capacity(self.feature_count);
        let mut rest = card;
        for _ in 0..self.feature_count {
            features.push(rest % self.feature_size);
            rest /= self.feature_size;
        }
        features
    }
}

impl SetOracle for ClassicRules {
    fn is_set(&self, cards: &Triple) -> bool {
        let [a, b, c] = *cards;
        // 同一张牌不能出现两次
        if a == b || b == c || a == c {
            return false;
        }
        let (fa, fb, fc) = (
            self.card_to_features(a),
            self.card_to_features(b),
            self.card_to_features(c),
        );
        (0..self.feature_count).all(|i| {
            let (x, y, z) = (fa[i], fb[i], fc[i]);
            (x == y && y == z) || (x != y && y != z && x != z)
        })
    }

    fn find_sets(&self, cards: &[CardId], limit: usize) -> Vec<Triple> {
        let mut found = Vec::new();
        if limit == 0 {
            return found;
        }
        for (i, &a) in cards.iter().enumerate() {
            for (j, &b) in cards.iter().enumerate().skip(i + 1) {
                for &c in &cards[j + 1..] {
                    let triple = [a, b, c];
                    if self.is_set(&triple) {
                        found.push(triple);
                        if found.len() >= limit {
                            return found;
                        }
                    }
                }
            }
        }
        found
    }

    fn features(&self, card: CardId) -> Vec<usize> {
        self.card_to_features(card)
    }
}

// --- 实现辅助功能 ---

impl fmt::Display for ClassicRules {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} 个特征 x {} 种取值", self.feature_count, self.feature_size)?;
        match self.deck_size() {
            Some(size) => write!(f, " ({} 张牌)", size),
            None => write!(f, " (牌数溢出)"),
        }
    }
}

// --- 单元测试 ---
