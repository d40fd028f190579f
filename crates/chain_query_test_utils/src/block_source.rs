use futures::channel::mpsc;

/// A block source that emits the block numbers it is told to.
#[derive(Clone, Debug)]
pub struct BlockFeed {
    sender: mpsc::UnboundedSender<u64>,
}

impl BlockFeed {
    /// Constructs a feed and the stream of block numbers it emits.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self { sender }, receiver)
    }

    /// Emits a block number. Returns whether the stream is still consumed.
    pub fn push(&self, block_number: u64) -> bool {
        self.sender.unbounded_send(block_number).is_ok()
    }

    /// Ends the stream.
    pub fn close(&self) {
        self.sender.close_channel();
    }
}
