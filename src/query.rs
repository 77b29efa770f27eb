//! Query requests routed through the Index (spec.md §3, "Query" and §6
//! "Control surface").

use uuid::Uuid;

use crate::expr::Expression;
use crate::ids::RowIdBitmap;
use crate::slice::TableSlice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    Exact,
    Estimate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractPolicy {
    PreserveIds,
    DropIds,
}

/// Where matching slices/counts are delivered. A thin wrapper over an
/// mpsc sender so query execution doesn't need to know who's listening.
#[derive(Clone)]
pub struct Sink<T>(tokio::sync::mpsc::UnboundedSender<T>);

impl<T> Sink<T> {
    pub fn new() -> (Sink<T>, tokio::sync::mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Sink(tx), rx)
    }

    pub fn send(&self, value: T) {
        // Receiver drop just means the caller stopped listening; not an
        // error condition for the producer side.
        let _ = self.0.send(value);
    }
}

pub enum QueryCmd {
    Count { mode: CountMode, sink: Sink<u64> },
    Extract { policy: ExtractPolicy, sink: Sink<TableSlice>, requested: u64 },
    Erase,
}

pub struct Query {
    pub id: Uuid,
    pub expr: Expression,
    /// Restricts the universe this query runs over. An empty bitmap means
    /// unrestricted -- callers resolve that to "the partition's full id
    /// range" before it reaches partition/store code, which always treats
    /// a bitmap literally (spec.md §3, "Query").
    pub ids: RowIdBitmap,
    pub cmd: QueryCmd,
}

impl Query {
    pub fn is_unrestricted(&self) -> bool {
        self.ids.is_empty()
    }
}
