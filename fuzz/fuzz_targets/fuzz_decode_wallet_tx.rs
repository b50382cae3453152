#![no_main]

use libfuzzer_sys::fuzz_target;
use solidus::wallet::tx::WalletTx;

fuzz_target!(|data: &[u8]| {
    // WalletTx is the deepest persisted record: a transaction plus
    // merkle branch, supporting ancestors and the spent bitmap. A
    // truncated or hostile wallet file must surface a decode error,
    // never a panic, and the bitmap must come out output-sized.
    if let Ok(wtx) = solidus::codec::deserialize::<WalletTx>(data) {
        assert_eq!(wtx.spent.len(), wtx.tx.outputs.len());
    }
});
