//! Ports - 抽象化レイヤー
//!
//! 外部とのインターフェース（時刻、ID、ネットワーク信号、永続化、
//! 各データドメインの SyncUnit）を trait として定義します。

pub mod clock;
pub mod connectivity;
pub mod id_generator;
pub mod sync_unit;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock, TokioClock};
pub use self::connectivity::Connectivity;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::sync_unit::SyncUnit;
pub use self::task_store::{Admission, TaskStore, Transition};
