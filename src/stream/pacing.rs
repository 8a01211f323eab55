// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 推流节拍控制
//!
//! 固定目标间隔出帧. 落后时 (推理或编码超过一个间隔) 按策略处理:
//! - `drop_if_behind = true`:  放弃错过的节拍, 从当前时刻重新计时, 不补发
//! - `drop_if_behind = false`: 保留原有节拍, 立即连续出帧直到追上

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingPolicy {
    /// 目标帧间隔 (毫秒), 0 表示不限速
    pub target_interval_ms: u64,
    pub drop_if_behind: bool,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            target_interval_ms: 30,
            drop_if_behind: true,
        }
    }
}

impl PacingPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.target_interval_ms)
    }
}

pub struct Pacer {
    interval: Duration,
    drop_if_behind: bool,
    next: Option<Instant>,
    skipped: u64,
}

impl Pacer {
    pub fn new(policy: PacingPolicy) -> Self {
        Self {
            interval: policy.interval(),
            drop_if_behind: policy.drop_if_behind,
            next: None,
            skipped: 0,
        }
    }

    /// 到下一个节拍还需等待多久, 并推进节拍. 第一次调用立即返回 0.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        if self.interval.is_zero() {
            return Duration::ZERO;
        }

        let deadline = self.next.unwrap_or(now);
        if deadline >= now {
            self.next = Some(deadline + self.interval);
            return deadline - now;
        }

        if self.drop_if_behind {
            let behind = now - deadline;
            self.skipped += (behind.as_nanos() / self.interval.as_nanos()) as u64;
            self.next = Some(now + self.interval);
        } else {
            self.next = Some(deadline + self.interval);
        }
        Duration::ZERO
    }

    /// 阻塞到下一个节拍
    pub fn wait(&mut self) {
        let delay = self.next_delay(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    /// 因落后而放弃的节拍数
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
