//! curbside-dispatch: scheduling sinks and the turn runner

pub mod memory;
pub mod sink;
pub mod turn;
pub mod warehouse_sink;

pub use memory::MemoryIncidentStore;
pub use sink::{commit_outcome, CommitOutcome, CommitReport, SchedulingSink};
pub use turn::{with_timeout, EntryState, SchedulingTurn, TurnEntry, TurnReport};
pub use warehouse_sink::WarehouseSink;
