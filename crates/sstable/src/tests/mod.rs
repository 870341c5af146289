mod merge_tests;
mod writer_tests;

use crate::*;
use memtable::Record;
use std::path::Path;
use std::sync::Arc;

/// Writes `records` as table `label` into `dir` and opens it.
pub(crate) fn build(dir: &Path, label: u64, records: &[Record], options: &TableOptions) -> Arc<SSTable> {
    let info = write_table(dir, label, 1, records, options).unwrap();
    Arc::new(SSTable::open(&info.toc_path, &options.keys).unwrap())
}

pub(crate) fn numbered(n: u32, timestamp: u64) -> Vec<Record> {
    (0..n)
        .map(|i| Record::put(format!("key{:05}", i), format!("value{}", i), timestamp))
        .collect()
}

pub(crate) fn small_degrees() -> TableOptions {
    TableOptions {
        index_degree: 3,
        summary_degree: 2,
        ..TableOptions::default()
    }
}
