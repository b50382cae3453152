#![no_main]

use libfuzzer_sys::fuzz_target;
use solidus::transaction::Transaction;

fuzz_target!(|data: &[u8]| {
    // Transactions arrive from the network and from the wallet file;
    // varint-prefixed containers inside must bound their allocations
    // and decoding must never panic on arbitrary bytes.
    let _ = solidus::codec::deserialize::<Transaction>(data);
});
