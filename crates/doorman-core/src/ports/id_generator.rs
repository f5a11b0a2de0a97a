//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: Clock ベースの ULID

use std::sync::{Arc, Mutex};

use ulid::Ulid;

use crate::domain::InstanceId;
use crate::ports::Clock;

/// IdGenerator は instance ID を生成
pub trait IdGenerator: Send + Sync {
    fn generate_instance_id(&self) -> InstanceId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の時刻を timestamp 部分に使うので、テストでも生成順に並びます。
/// 同じミリ秒内（や時計の巻き戻り）では直前の ID を increment して単調増加を保ちます。
/// history の「新しい順」は ID 順に依存しています。
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
    last: Mutex<Ulid>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(Ulid::nil()),
        }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_instance_id(&self) -> InstanceId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let candidate = Ulid::from_parts(timestamp_ms, rand::random());

        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let next = if candidate.timestamp_ms() <= last.timestamp_ms() {
            last.increment().unwrap_or(candidate)
        } else {
            candidate
        };
        *last = next;
        InstanceId::from(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));

        let id1 = id_gen.generate_instance_id();
        let id2 = id_gen.generate_instance_id();

        assert_ne!(id1, id2);
    }

    #[test]
    fn ids_increase_within_one_millisecond() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let ids: Vec<InstanceId> = (0..50).map(|_| id_gen.generate_instance_id()).collect();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn timestamp_comes_from_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id = id_gen.generate_instance_id();

        assert_eq!(
            id.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }
}
