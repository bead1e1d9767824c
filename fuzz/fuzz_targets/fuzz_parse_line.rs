//! Fuzz target for the trace line grammar.
//!
//! Feeds arbitrary lines through the parser's record classifiers to find:
//! - Panics from unexpected input
//! - Regex pathologies on adversarial records
//! - Unescaping bugs in path extraction

#![no_main]

use libfuzzer_sys::fuzz_target;

use cachetrace::parser::{parse_file_access, parse_fork_child};

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        // Skip extremely large inputs to avoid timeout (not a real bug)
        if line.len() > 10_000 {
            return;
        }

        let _ = parse_fork_child(line);
        let _ = parse_file_access(line);
    }
});
