//! Domain model (keys, schedule, retention, outcomes, errors).
//!
//! I/O を一切持たない層です。時刻は引数で受け取り、副作用は ports 側に置きます。

pub mod errors;
pub mod ids;
pub mod key;
pub mod outcome;
pub mod retention;
pub mod schedule;

pub use self::errors::{ErrorKind, IngestError, NotifyError, ReadError, RemoteError, StoreError};
pub use self::ids::{BatchId, StagingId};
pub use self::key::{
    ArtifactKey, Band, Combo, DEFAULT_COMBOS, DEFAULT_SECTORS, Resolution, Sector, floor_to_grid,
    format_capture_time,
};
pub use self::outcome::{FetchOutcome, GroupOutcome};
pub use self::retention::{ContentClass, Namespace, RetentionPolicy};
pub use self::schedule::{Schedule, WindowGroup};
