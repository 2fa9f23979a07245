//! Hash utilities for installed-file verification.
//!
//! Manifests record md5 digests as lowercase hex. This module provides
//! streaming computation so multi-gigabyte assets never sit in memory.

use crate::progress::ProgressSink;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 1024 * 1024;

/// Compute the md5 of a file as lowercase hex, reporting bytes read.
pub fn compute_file_md5(path: &Path, sink: &dyn ProgressSink) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut context = md5::Context::new();

    loop {
        let bytes_read = reader.read(&mut buf)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buf[..bytes_read]);
        sink.report(bytes_read as u64);
    }

    Ok(format!("{:x}", context.compute()))
}
