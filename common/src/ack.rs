use crate::types::CommandRecord;

/// Timestamp of the newest backend command seen since boot. Commands at or
/// below the cursor have already been handled and are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckCursor {
    last_ts: u64,
}

impl AckCursor {
    pub fn last_ts(&self) -> u64 {
        self.last_ts
    }

    /// Advances past `record` if it is new and reports whether it is an
    /// acknowledgement to act on. Any newer command moves the cursor, ack
    /// or not.
    pub fn observe(&mut self, record: &CommandRecord) -> bool {
        if record.ts <= self.last_ts {
            return false;
        }
        self.last_ts = record.ts;
        record.is_ack()
    }
}
