/// Where an arriving block number falls relative to the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOrder {
    Current,
    /// Already acknowledged: a retransmission caused by a lost ACK.
    Duplicate,
    /// Beyond the expected block; impossible from a well-behaved peer.
    Ahead,
}

pub const FIRST_BLOCK: u16 = 1;

const HALF_RANGE: u16 = 0x8000;

pub fn next(block: u16) -> u16 {
    block.wrapping_add(1)
}

pub fn classify(received: u16, expected: u16) -> BlockOrder {
    match expected.wrapping_sub(received) {
        0 => BlockOrder::Current,
        behind if behind < HALF_RANGE => BlockOrder::Duplicate,
        _ => BlockOrder::Ahead,
    }
}
