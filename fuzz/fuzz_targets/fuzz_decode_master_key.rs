#![no_main]

use libfuzzer_sys::fuzz_target;
use solidus::crypto::crypter::MasterKey;

fuzz_target!(|data: &[u8]| {
    let _ = solidus::codec::deserialize::<MasterKey>(data);
});
