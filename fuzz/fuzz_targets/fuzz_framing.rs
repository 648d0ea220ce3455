//! Fuzz target for message framing and tokenizing.
//!
//! Arbitrary bytes read from the channel must never panic the framer or the
//! tokenizer, and every command they yield must respect the caps.

#![no_main]

use fifoexec::protocol::{decode, frame, ArgVector, DELIMITER, MAX_ARGS};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let message = decode(data);

    for command in frame(&message) {
        assert!(!command.is_empty());
        assert!(!command.contains(DELIMITER));

        let argv = ArgVector::parse(command).expect("framed command has a token");
        assert!(argv.as_slice().len() <= MAX_ARGS);
        assert!(argv.as_slice().iter().all(|arg| !arg.is_empty()));
    }
});
